// This file contains the reference comparison steps: dnadiff-based insertion calling, QUAST, the
// Circos alignment plots and mutation calling in the mutation regions.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{Mutation, MutationRegion, MutationType};
use crate::ledger::{Content, Table, ALIGNMENT_NOTES, ALIGNMENT_TITLE, CONTIG_ALIGNMENT_TITLE,
                    LARGE_INDEL_TITLE, MUTATION_METHODS, MUTATION_TITLE, REFERENCE_METHODS,
                    SNP_INDEL_TITLE, STATS_TITLE};
use crate::mapping::{index_bam, minimap_illumina_fastq, minimap_ont_fastq};
use crate::metrics::{QuastMetrics, ReferenceMetrics};
use crate::misc::{check_write, create_dir, format_kmg, pretty_ticks, quit_with_error,
                  write_file};
use crate::pipeline::Pipeline;
use crate::runner::std_files;


pub const REFERENCE_IDENTITY_MIN: f64 = 98.0;
pub const REFERENCE_ALIGNMENT_MIN: f64 = 97.0;
pub const MIN_INDEL_SIZE: u64 = 25;
const CIRCOS_TICKS: usize = 12;


/// An unaligned stretch of a sequence, in BED-style coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Gap {
    pub contig: String,
    pub start: u64,
    pub stop: u64,
}

impl Gap {
    pub fn length(&self) -> u64 { self.stop - self.start }
}


/// One alignment row of a dnadiff .1coords file.
#[derive(Clone, Debug, PartialEq)]
pub struct CoordsRow {
    pub reference_start: u64,
    pub reference_end: u64,
    pub query_start: u64,
    pub query_end: u64,
    pub reference: String,
    pub query: String,
}

impl CoordsRow {
    pub fn from_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 13 {
            return None;
        }
        let coordinate = |i: usize| parts[i].trim().parse::<u64>().ok();
        let (r1, r2) = (coordinate(0)?, coordinate(1)?);
        let (q1, q2) = (coordinate(2)?, coordinate(3)?);
        Some(CoordsRow { reference_start: r1.min(r2), reference_end: r1.max(r2),
                         query_start: q1.min(q2), query_end: q1.max(q2),
                         reference: parts[11].to_string(), query: parts[12].to_string() })
    }
}


pub fn call_insertions(p: &mut Pipeline) {
    p.log.main_process("Calling insertions");
    let insertions_dir = p.start_step("insertions");
    let reference_fasta = reference_fasta(p);
    let genome = p.genome_fasta();

    p.log.sub_process("Running dnadiff against the reference");
    let prefix = insertions_dir.join("vs_reference");
    let (stdout, stderr) = std_files(&prefix);
    p.run_command(&format!("dnadiff -p {} {} {} 1>{} 2>{}", prefix.display(),
                           reference_fasta.display(), genome.display(), stdout.display(),
                           stderr.display()));
    let method = format!("The genome assembly was aligned against the reference sequencing using \
                          dnadiff (v {}).", p.config.derived.version("dnadiff"));
    p.report.add_method(REFERENCE_METHODS, &method);

    let mut metrics = ReferenceMetrics::default();
    let report_lines = p.runner.read_lines(&with_suffix(&prefix, ".report"));
    let reference_size: usize = p.config.derived.reference_contigs.iter().map(|(_, l)| l).sum();
    if let Some((identity, aligned_bases)) = parse_dnadiff_report(&report_lines) {
        metrics.identity = identity;
        metrics.aligned_bases = aligned_bases;
        if reference_size > 0 {
            metrics.aligned_fraction = 100.0 * aligned_bases as f64 / reference_size as f64;
        }
        if identity <= REFERENCE_IDENTITY_MIN {
            let warning = format!("Identity with the reference ({:.2}%) is less than {:.2}%",
                                  identity, REFERENCE_IDENTITY_MIN);
            p.add_warning(&warning, &ALIGNMENT_NOTES);
        }
        if metrics.aligned_fraction <= REFERENCE_ALIGNMENT_MIN {
            let warning = format!("Fraction of the reference alignment ({:.2}%) is less than \
                                   {:.2}%", metrics.aligned_fraction, REFERENCE_ALIGNMENT_MIN);
            p.add_warning(&warning, &ALIGNMENT_NOTES);
        }
    }

    p.log.sub_process("Finding reference and query specific insertions");
    let one_coords = with_suffix(&prefix, ".1coords");
    let coords: Vec<CoordsRow> = p.runner.read_lines(&one_coords).iter()
        .filter_map(|l| CoordsRow::from_line(l)).collect();
    write_file(&insertions_dir.join("reference.sizes"),
               &sizes_text(&p.config.derived.reference_contigs));
    write_file(&insertions_dir.join("genome.sizes"), &sizes_text(&p.config.state.genome));

    let reference_aligned = group_intervals(coords.iter()
        .map(|c| (c.reference.clone(), c.reference_start, c.reference_end)));
    let genome_aligned = group_intervals(coords.iter()
        .map(|c| (c.query.clone(), c.query_start, c.query_end)));
    let reference_insertions = unaligned_regions(&p.config.derived.reference_contigs,
                                                 &reference_aligned, MIN_INDEL_SIZE);
    let genome_insertions = unaligned_regions(&p.config.state.genome, &genome_aligned,
                                              MIN_INDEL_SIZE);
    write_file(&insertions_dir.join("reference_insertions.bed"), &gaps_text(&reference_insertions));
    write_file(&insertions_dir.join("genome_insertions.bed"), &gaps_text(&genome_insertions));
    metrics.reference_insertion_count = reference_insertions.len();
    metrics.query_insertion_count = genome_insertions.len();

    let indel_section = p.report.section_mut(&[LARGE_INDEL_TITLE]);
    indel_section.set("Reference insertions", Content::Table(gaps_table(&reference_insertions)));
    indel_section.set("Query insertions", Content::Table(gaps_table(&genome_insertions)));
    p.report.add_method(REFERENCE_METHODS, "Large insertions or deletions were found as the \
                                            complement of aligned regions.");

    let (snps, small_indels) = count_snps(&p.runner.read_lines(&with_suffix(&prefix, ".snps")));
    metrics.snp_count = snps;
    metrics.small_indel_count = small_indels;
    let mut snp_table = Table::new(&["SNPs", "small indels"]);
    snp_table.push(vec![snps.to_string(), small_indels.to_string()]);
    p.report.section_mut(&[SNP_INDEL_TITLE]).set("counts", Content::Table(snp_table));

    if p.config.derived.mutation_region_bed.is_some() {
        let deletions = deleted_regions(&p.config.derived.mutation_regions,
                                        &reference_insertions);
        let lines: String = deletions.iter().map(|d| format!("{}\n", d.to_line())).collect();
        write_file(&insertions_dir.join("amr_deletions.bed"), &lines);
        p.config.state.amr_deletions = deletions;
    }

    let yaml = p.output_dir().join("reference_metrics.yaml");
    check_write(metrics.save_to_yaml(&yaml), &yaml);
    p.config.state.one_coords = Some(one_coords);
    p.finish_step(&insertions_dir);
}


fn reference_fasta(p: &Pipeline) -> PathBuf {
    match &p.config.derived.reference_fasta {
        Some(fasta) => fasta.clone(),
        None => quit_with_error("no reference FASTA is available"),
    }
}


fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", prefix.display(), suffix))
}


/// Average identity and aligned reference bases from the first AvgIdentity and AlignedBases
/// lines of a dnadiff report.
pub fn parse_dnadiff_report(report_lines: &[String]) -> Option<(f64, u64)> {
    let second_column = |key: &str| report_lines.iter()
        .find(|l| l.split_whitespace().next() == Some(key))
        .and_then(|l| l.split_whitespace().nth(1).map(String::from));
    let identity = second_column("AvgIdentity")?.parse().ok()?;
    let aligned = second_column("AlignedBases")?;
    let aligned = aligned.split('(').next()?.parse().ok()?;
    Some((identity, aligned))
}


/// Counts SNPs and small indels in a dnadiff .snps file. A '.' on either side marks an indel.
pub fn count_snps(snps_lines: &[String]) -> (usize, usize) {
    let (mut snps, mut indels) = (0, 0);
    for line in snps_lines {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 3 {
            continue;
        }
        if parts[1] == "." || parts[2] == "." {
            indels += 1;
        } else {
            snps += 1;
        }
    }
    (snps, indels)
}


fn group_intervals(intervals: impl Iterator<Item = (String, u64, u64)>)
        -> BTreeMap<String, Vec<(u64, u64)>> {
    let mut grouped: BTreeMap<String, Vec<(u64, u64)>> = BTreeMap::new();
    for (contig, start, end) in intervals {
        grouped.entry(contig).or_default().push((start, end));
    }
    grouped
}


/// The stretches of each contig not covered by any aligned interval, keeping those of at least
/// min_size bases.
pub fn unaligned_regions(contigs: &[(String, usize)], aligned: &BTreeMap<String, Vec<(u64, u64)>>,
                         min_size: u64) -> Vec<Gap> {
    let mut gaps = Vec::new();
    for (contig, length) in contigs {
        let length = *length as u64;
        let mut intervals = aligned.get(contig).cloned().unwrap_or_default();
        intervals.sort_unstable();
        let mut position = 0;
        for (start, end) in intervals {
            if start > position {
                gaps.push(Gap { contig: contig.clone(), start: position, stop: start });
            }
            position = position.max(end);
        }
        if length > position {
            gaps.push(Gap { contig: contig.clone(), start: position, stop: length });
        }
    }
    gaps.retain(|g| g.length() >= min_size);
    gaps
}


/// The complement of the gaps within each contig.
pub fn aligned_regions(contig: &str, length: u64, gaps: &[Gap]) -> Vec<(u64, u64)> {
    let mut regions = Vec::new();
    let mut position = 0;
    for gap in gaps.iter().filter(|g| g.contig == contig) {
        if gap.start > position {
            regions.push((position, gap.start));
        }
        position = position.max(gap.stop);
    }
    if length > position {
        regions.push((position, length));
    }
    regions
}


/// Mutation regions of a deletion-capable type that overlap an unaligned reference region.
pub fn deleted_regions(regions: &[MutationRegion], reference_gaps: &[Gap]) -> Vec<MutationRegion> {
    regions.iter()
        .filter(|r| matches!(r.kind, MutationType::LargeDeletion | MutationType::Any))
        .filter(|r| reference_gaps.iter().any(|g| {
            g.contig == r.contig && (g.start as i64) < r.stop && r.start < g.stop as i64
        }))
        .cloned()
        .collect()
}


fn sizes_text(contigs: &[(String, usize)]) -> String {
    let mut sorted = contigs.to_vec();
    sorted.sort();
    sorted.iter().map(|(name, length)| format!("{}\t{}\n", name, length)).collect()
}


fn gaps_text(gaps: &[Gap]) -> String {
    gaps.iter()
        .map(|g| format!("{}\t{}\t{}\t{}\n", g.contig, g.start, g.stop, g.length()))
        .collect()
}


fn gaps_table(gaps: &[Gap]) -> Table {
    let mut table = Table::new(&["contig", "start", "stop", "length"]);
    for g in gaps {
        table.push(vec![g.contig.clone(), g.start.to_string(), g.stop.to_string(),
                        g.length().to_string()]);
    }
    table
}


pub fn quast_genome(p: &mut Pipeline) {
    p.log.main_process("Running Quast of the genome vs. the reference sequence");
    let quast_dir = p.start_step("quast");
    let (stdout, stderr) = std_files(&quast_dir.join("quast"));
    p.run_command(&format!("quast.py -R {} -o {} {} 1>{} 2>{}", reference_fasta(p).display(),
                           quast_dir.display(), p.genome_fasta().display(), stdout.display(),
                           stderr.display()));
    let report_tsv = quast_dir.join("report.tsv");
    p.require_output(&report_tsv, "QUAST report");
    if let Some(metrics) = parse_quast_report(&p.runner.read_lines(&report_tsv)) {
        let mut table = Table::new(&["metric", "value"]);
        for row in metrics.rows() {
            table.push(row);
        }
        p.report.section_mut(&[STATS_TITLE]).set("QUAST", Content::Table(table));
        let yaml = p.output_dir().join("quast_metrics.yaml");
        check_write(metrics.save_to_yaml(&yaml), &yaml);
    }
    let method = format!("The genome assembly was compared with the reference using QUAST \
                          (v {}).", p.config.derived.version("quast"));
    p.report.add_method(REFERENCE_METHODS, &method);
    p.finish_step(&quast_dir);
}


/// Converts QUAST's per-100-kbp mismatch and indel rates into counts over the whole assembly.
pub fn parse_quast_report(report_lines: &[String]) -> Option<QuastMetrics> {
    let value = |key: &str| report_lines.iter()
        .map(|l| l.split('\t').collect::<Vec<_>>())
        .find(|parts| parts.len() > 1 && parts[0] == key)
        .and_then(|parts| parts[1].trim().parse::<f64>().ok());
    let total_length = value("Total length (>= 0 bp)")?;
    let per_genome = total_length / 100000.0;
    Some(QuastMetrics {
        total_length: total_length as u64,
        mismatches: (value("# mismatches per 100 kbp")? * per_genome) as u64,
        indels: (value("# indels per 100 kbp")? * per_genome) as u64,
    })
}


pub fn draw_circos(p: &mut Pipeline) {
    p.log.main_process("Drawing Circos plot of assembly v. reference alignment");
    let circos_dir = p.start_step("circos");
    let data_dir = p.config.opts.data_dir.clone();
    let coords: Vec<CoordsRow> = match &p.config.state.one_coords {
        Some(one_coords) => p.runner.read_lines(one_coords).iter()
            .filter_map(|l| CoordsRow::from_line(l)).collect(),
        None => Vec::new(),
    };
    let aligned = group_intervals(coords.iter()
        .map(|c| (c.reference.clone(), c.reference_start, c.reference_end)));
    let reference_contigs = p.config.derived.reference_contigs.clone();
    let gaps = unaligned_regions(&reference_contigs, &aligned, MIN_INDEL_SIZE);
    let tick_base = p.runner.read_lines(&data_dir.join("tick_base.conf"));

    for (contig, length) in &reference_contigs {
        p.log.sub_process(&format!("Drawing Circos plot for {}", contig));
        let contig_dir = circos_dir.join(contig);
        create_dir(&contig_dir);
        let length = *length as u64;

        let alignment: String = aligned_regions(contig, length, &gaps).iter()
            .map(|(start, end)| format!("{}\t{}\t{}\n", contig, start, end)).collect();
        write_file(&contig_dir.join("alignment.txt"), &alignment);
        let contig_gaps: Vec<Gap> = gaps.iter().filter(|g| &g.contig == contig).cloned().collect();
        let gap_text: String = contig_gaps.iter()
            .map(|g| format!("{}\t{}\t{}\n", g.contig, g.start, g.stop)).collect();
        write_file(&contig_dir.join("gap.txt"), &gap_text);
        write_file(&contig_dir.join("karyotype.txt"),
                   &format!("chr\t-\t{}\t{}\t0\t{}\tplasmid_grey\n", contig, contig, length));

        let ticks = circos_ticks(length);
        let tick_major = if ticks.len() > 1 { ticks[1] - ticks[0] } else { length.max(1) };
        let tick_conf: String = tick_base.iter()
            .map(|l| format!("{}\n", l.replace("TICK_MAJOR", &tick_major.to_string())
                                      .replace("TICK_MINOR", &(tick_major / 5).to_string())))
            .collect();
        write_file(&contig_dir.join("tick.conf"), &tick_conf);
        let tick_text: String = ticks.iter()
            .map(|t| format!("{}\t{}\t{}\t{}\n", contig, t, t, format_kmg(*t, 1))).collect();
        write_file(&contig_dir.join("tick.txt"), &tick_text);

        p.run_command(&format!("(cd {} && circos --conf {})", contig_dir.display(),
                               data_dir.join("circos.conf").display()));
        p.report.section_mut(&[ALIGNMENT_TITLE, CONTIG_ALIGNMENT_TITLE])
            .set(contig, Content::Image(contig_dir.join("circos.png")));
    }
    p.finish_step(&circos_dir);
}


/// Round-number tick positions around a circular contig, without the last one since it would
/// sit on top of the first.
pub fn circos_ticks(length: u64) -> Vec<u64> {
    let mut ticks = pretty_ticks(1.0, length as f64, CIRCOS_TICKS);
    ticks.pop();
    ticks
}


pub fn call_amr_mutations(p: &mut Pipeline) {
    p.log.main_process("Calling AMR mutations");
    let mutations_dir = p.start_step("mutations");
    let reference_fasta = reference_fasta(p);

    let bam = mutations_dir.join("reference_mapping.bam");
    let illumina_fastq = p.config.opts.illumina_fastq.clone();
    let kind_of_reads = if illumina_fastq.is_empty() {
        let ont_fastq = p.ont_fastq();
        minimap_ont_fastq(p, &reference_fasta, &ont_fastq, &bam);
        "ONT"
    } else {
        minimap_illumina_fastq(p, &reference_fasta, &illumina_fastq, &bam);
        "Illumina"
    };
    p.clean_later(&bam);
    let method = format!("{} reads were mapped to the reference sequence using minimap2 (v {}).",
                         kind_of_reads, p.config.derived.version("minimap2"));
    p.report.add_method(MUTATION_METHODS, &method);
    let variant_types = if kind_of_reads == "ONT" { "snps" } else { "snps,indels" };

    let regions = p.config.derived.mutation_regions.clone();
    for (i, region) in regions.iter().enumerate() {
        if region.kind == MutationType::LargeDeletion {
            continue;
        }
        p.log.sub_process(&format!("Finding AMR mutations for {}", region.name));
        let region_dir = mutations_dir.join(format!("region_{}", i));
        create_dir(&region_dir);
        let region_bed = region_dir.join("region.bed");
        write_file(&region_bed, &format!("{}\n", region.to_line()));

        let region_bam = region_dir.join("region.bam");
        p.run_command(&format!("samtools view -L {} -b {} 1>{} 2>{}", region_bed.display(),
                               bam.display(), region_bam.display(),
                               region_dir.join("samtools_view.stderr").display()));
        p.require_output(&region_bam, "Region SAM file");
        index_bam(p, &region_bam);

        let pileup_stderr = region_dir.join("samtools_mpileup.stderr");
        let region_pileup = region_dir.join("region.mpileup");
        p.run_command(&format!("samtools mpileup -g -B -l {} -f {} {} 1>{} 2>{}",
                               region_bed.display(), reference_fasta.display(),
                               region_bam.display(), region_pileup.display(),
                               pileup_stderr.display()));
        p.require_output(&region_pileup, "Region MPILEUP file");
        let text_pileup = region_dir.join("region.pileup");
        p.run_command(&format!("samtools mpileup -B -l {} -f {} {} 1>{} 2>{}",
                               region_bed.display(), reference_fasta.display(),
                               region_bam.display(), text_pileup.display(),
                               pileup_stderr.display()));
        p.require_output(&text_pileup, "Region plain text MPILEUP file");

        let region_vcf = region_dir.join("region.vcf");
        p.run_command(&format!("bcftools call --ploidy 1 -c {} | bcftools view -v {} 2>{} | \
                                sed '/##/d' > {}",
                               region_pileup.display(), variant_types,
                               region_dir.join("bcftools.stderr").display(),
                               region_vcf.display()));
        p.require_output(&region_vcf, "Region VCF file");

        let mutations = parse_region_vcf(&p.runner.read_lines(&region_vcf), region);
        if mutations.is_empty() {
            continue;
        }
        p.report.section_mut(&[MUTATION_TITLE])
            .set(&region.name, Content::Table(mutations_table(&mutations)));
        p.config.state.amr_mutations.push((region.name.clone(), mutations));
    }

    let method = format!("Mutations were identified using samtools mpileup (v {}) and bcftools \
                          (v {}).", p.config.derived.version("samtools"),
                         p.config.derived.version("bcftools"));
    p.report.add_method(MUTATION_METHODS, &method);
    p.finish_step(&mutations_dir);
}


/// Reads the variants from a header-stripped VCF. Variants whose alleles differ in length are
/// small indels and the rest are SNPs.
pub fn parse_region_vcf(vcf_lines: &[String], region: &MutationRegion) -> Vec<Mutation> {
    vcf_lines.iter()
        .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 5 {
                return None;
            }
            let (reference, alternative) = (parts[3].to_string(), parts[4].to_string());
            let kind = if reference.len() == alternative.len() { MutationType::Snp }
                                                                else { MutationType::SmallIndel };
            Some(Mutation { contig: parts[0].to_string(), position: parts[1].parse().ok()?,
                            kind, reference, alternative, drug: region.drug.clone(),
                            note: region.note.clone() })
        })
        .collect()
}


fn mutations_table(mutations: &[Mutation]) -> Table {
    let mut table = Table::new(&["contig", "position", "type", "ref", "alt", "drug", "note"]);
    for m in mutations {
        table.push(vec![m.contig.clone(), m.position.to_string(), m.kind.to_string(),
                        m.reference.clone(), m.alternative.clone(), m.drug.clone(),
                        m.note.clone()]);
    }
    table
}
