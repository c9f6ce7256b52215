// This file contains the assembly steps (miniasm, wtdbg2, Flye and SPAdes) and the assembly
// evaluation and coverage checks that follow them.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use std::io;
use std::path::Path;

use crate::ledger::{ASSEMBLY_METHODS, ASSEMBLY_NOTES};
use crate::mapping::{contig_coverage, map_illumina_fastq, mean_depth, minimap_ont_fastq,
                     ContigCoverage};
use crate::metrics::AssemblyMetrics;
use crate::misc::{check_write, load_file_lines, load_fasta, write_fasta};
use crate::pipeline::Pipeline;
use crate::runner::std_files;


pub const FRAGMENTED_CONTIG_COUNT: usize = 4;
pub const SMALL_CONTIG_MAX: usize = 3000;
pub const SPADES_MIN_CONTIG: usize = 1000;
pub const ONT_COVERAGE_MIN: f64 = 30.0;
pub const ILLUMINA_COVERAGE_MIN: f64 = 30.0;


pub fn miniasm_ont_fastq(p: &mut Pipeline) {
    p.log.main_process("Assembling ONT reads using minimap2/miniasm");
    let assembly_dir = p.start_step("ont_assembly");
    let fastq = p.ont_fastq();

    p.log.sub_process("Running minimap2 in all v. all mode");
    let paf = assembly_dir.join("ont_vs_ont.paf");
    p.run_command(&format!("minimap2 -x ava-ont -t {} {} {} 1>{} 2>{}", p.threads(),
                           fastq.display(), fastq.display(), paf.display(),
                           assembly_dir.join("minimap_ava.stderr").display()));
    p.require_output(&paf, "ONT all v. all PAF");

    p.log.sub_process("Running miniasm");
    let gfa = assembly_dir.join("ont_miniasm.gfa");
    p.run_command(&format!("miniasm -s 1750 -h 1000 -I .5 -f {} {} 1>{} 2>{}", fastq.display(),
                           paf.display(), gfa.display(),
                           assembly_dir.join("miniasm.stderr").display()));
    p.require_output(&gfa, "ONT miniasm GFA");

    p.log.sub_process("Converting miniasm assembly to FASTA");
    let fasta = assembly_dir.join("ont_miniasm.fasta");
    if gfa.is_file() {
        check_write(gfa_to_fasta(&gfa, &fasta), &fasta);
    }
    p.require_output(&fasta, "ONT miniasm FASTA");
    p.set_genome(&fasta);
    p.report.add_method(ASSEMBLY_METHODS, "ONT reads were assembled using miniasm.");
    p.finish_step(&assembly_dir);
}


/// Writes the segments of a GFA as FASTA.
pub fn gfa_to_fasta(gfa: &Path, fasta: &Path) -> io::Result<()> {
    let seqs: Vec<(String, String)> = load_file_lines(gfa).iter()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            if parts.next()? != "S" {
                return None;
            }
            let name = parts.next()?;
            let seq = parts.next()?;
            Some((name.to_string(), seq.to_string()))
        })
        .collect();
    write_fasta(fasta, &seqs)
}


pub fn wtdbg2_ont_fastq(p: &mut Pipeline) {
    p.log.main_process("Assembling ONT reads using wtdbg2");
    let assembly_dir = p.start_step("ont_assembly");
    let fastq = p.ont_fastq();
    let genome_size = p.config.opts.genome_size.clone().unwrap_or_default();

    p.log.sub_process("Running wtdbg2");
    let prefix = assembly_dir.join("assembly");
    let layout = assembly_dir.join("assembly.ctg.lay.gz");
    let (stdout, stderr) = std_files(&assembly_dir.join("wtdbg2"));
    p.run_command(&format!("wtdbg2 -t {} -i {} -fo {} -g {} -xont 1> {} 2> {}", p.threads(),
                           fastq.display(), prefix.display(), genome_size, stdout.display(),
                           stderr.display()));
    p.require_output(&layout, "WTDBG2 layout");

    p.log.sub_process("Running wtpoa-cns");
    let fasta = assembly_dir.join("assembly.fasta");
    let (stdout, stderr) = std_files(&assembly_dir.join("wtpoa"));
    p.run_command(&format!("wtpoa-cns -t {} -i {} -fo {} 1> {} 2> {}", p.threads(),
                           layout.display(), fasta.display(), stdout.display(),
                           stderr.display()));
    p.require_output(&fasta, "WTDBG2 assembly fasta");
    p.set_genome(&fasta);
    p.report.add_method(ASSEMBLY_METHODS, "ONT reads were assembled using wtdbg2.");
    p.finish_step(&assembly_dir);
}


pub fn flye_ont_fastq(p: &mut Pipeline) {
    p.log.main_process("Assembling ONT reads using flye");
    let assembly_dir = p.start_step("ont_assembly");
    let fastq = p.ont_fastq();
    let genome_size = p.config.opts.genome_size.clone().unwrap_or_default();
    let read_type = if p.config.opts.error_correct { "--nano-corr" } else { "--nano-raw" };

    p.log.sub_process("Running flye");
    let (stdout, stderr) = std_files(&assembly_dir.join("flye"));
    p.run_command(&format!("flye --plasmid {} {} --meta --asm-coverage 75 --genome-size {} \
                            --out-dir {} --threads {} 1> {} 2> {}",
                           read_type, fastq.display(), genome_size, assembly_dir.display(),
                           p.threads(), stdout.display(), stderr.display()));
    let fasta = assembly_dir.join("assembly.fasta");
    p.require_output(&fasta, "Flye fasta");
    p.set_genome(&fasta);

    let method = format!("ONT reads were assembled using Flye (v {}).",
                         p.config.derived.version("flye"));
    p.report.add_method(ASSEMBLY_METHODS, &method);

    let info_lines = p.runner.read_lines(&assembly_dir.join("assembly_info.txt"));
    let open_contigs = open_flye_contigs(&info_lines);
    if !open_contigs.is_empty() {
        let warning = format!("Flye reported {} open contigs ({}); assembly may be incomplete.",
                              open_contigs.len(), open_contigs.join(", "));
        p.add_warning(&warning, &ASSEMBLY_NOTES);
    }
    p.finish_step(&assembly_dir);
}


/// The contigs that Flye's assembly_info.txt marks as not circular.
pub fn open_flye_contigs(info_lines: &[String]) -> Vec<String> {
    let Some(header) = info_lines.first() else { return Vec::new(); };
    let Some(circ_column) = header.split('\t').position(|c| c.trim() == "circ.")
        else { return Vec::new(); };
    info_lines.iter().skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.get(circ_column).map(|c| c.trim()) == Some("N") {
                Some(parts[0].to_string())
            } else {
                None
            }
        })
        .collect()
}


pub fn spades_illumina_fastq(p: &mut Pipeline) {
    p.log.main_process("Assembling Illumina FASTQ data with SPAdes");
    let spades_dir = p.start_step("spades");
    let fastqs = p.config.opts.illumina_fastq.clone();
    let paired = fastqs.len() == 2;
    let input = if paired {
        format!("-1 {} -2 {}", fastqs[0].display(), fastqs[1].display())
    } else {
        format!("-s {}", fastqs.first().map(|f| f.display().to_string()).unwrap_or_default())
    };
    let (stdout, stderr) = std_files(&spades_dir.join("spades"));
    p.run_command(&format!("spades.py {} -o {} -t {} --careful -k auto 1>{} 2>{}", input,
                           spades_dir.display(), p.threads(), stdout.display(),
                           stderr.display()));
    let spades_fasta = spades_dir.join(if paired { "scaffolds.fasta" } else { "contigs.fasta" });
    p.require_output(&spades_fasta, "SPAdes assembly");

    p.log.sub_process("Repairing contig names after SPAdes");
    let assembly_fasta = spades_dir.join("assembly.fasta");
    repair_contig_names(p, &spades_fasta, &assembly_fasta, spades_contig_name,
                        SPADES_MIN_CONTIG + 1);
    p.require_output(&assembly_fasta, "Genome assembly");
    p.set_genome(&assembly_fasta);
    let method = format!("Illumina reads were assembled using SPAdes (v {}).",
                         p.config.derived.version("spades"));
    p.report.add_method(ASSEMBLY_METHODS, &method);
    p.finish_step(&spades_dir);
}


/// NODE_3_length_5120_cov_21.4 -> contig_3
pub fn spades_contig_name(header: &str) -> String {
    let renamed = header.replace("NODE", "contig");
    match renamed.find("_length") {
        Some(i) => renamed[..i].to_string(),
        None => renamed,
    }
}


/// Copies a FASTA, rewriting each header and dropping sequences shorter than min_length. Does
/// nothing in a fake run whose input was never made.
pub fn repair_contig_names(p: &Pipeline, input: &Path, output: &Path, rename: fn(&str) -> String,
                           min_length: usize) {
    if p.runner.is_fake() && !input.is_file() {
        return;
    }
    let seqs: Vec<(String, String)> = load_fasta(input).into_iter()
        .filter(|(_, _, seq)| seq.len() >= min_length)
        .map(|(_, header, seq)| (rename(&header), seq))
        .collect();
    check_write(write_fasta(output, &seqs), output);
}


pub fn evaluate_assembly(p: &mut Pipeline) {
    p.log.main_process("Evaluating assembly");
    let genome = p.config.state.genome.clone();
    let metrics = AssemblyMetrics::new(&genome, SMALL_CONTIG_MAX);
    if genome.len() > FRAGMENTED_CONTIG_COUNT {
        let warning = format!("Assembly produced {} contigs, more than usually expected; \
                               assembly may be fragmented", genome.len());
        p.add_warning(&warning, &ASSEMBLY_NOTES);
    }
    let small_contigs: Vec<&str> = genome.iter()
        .filter(|(_, length)| *length <= SMALL_CONTIG_MAX).map(|(name, _)| name.as_str())
        .collect();
    if !small_contigs.is_empty() {
        let warning = format!("Assembly produced {} small contigs ({}); assembly may include \
                               spurious sequences.", small_contigs.len(), small_contigs.join(", "));
        p.add_warning(&warning, &ASSEMBLY_NOTES);
    }
    let yaml = p.output_dir().join("assembly_metrics.yaml");
    check_write(metrics.save_to_yaml(&yaml), &yaml);
}


pub fn assembly_info(p: &mut Pipeline) {
    p.log.main_process("Getting assembly description/coverage");
    let info_dir = p.start_step("info");
    let genome = p.genome_fasta();

    if let Some(ont_fastq) = p.config.state.ont_fastq.clone() {
        let bam = info_dir.join("ont_coverage.bam");
        minimap_ont_fastq(p, &genome, &ont_fastq, &bam);
        p.clean_later(&bam);
        let coverage = contig_coverage(p, &bam, &info_dir.join("ont_coverage.tsv"));
        for warning in coverage_warnings("ONT", &coverage, ONT_COVERAGE_MIN) {
            p.add_warning(&warning, &ASSEMBLY_NOTES);
        }
    }
    if !p.config.opts.illumina_fastq.is_empty() {
        let bam = info_dir.join("illumina_coverage.bam");
        map_illumina_fastq(p, &genome, &bam);
        p.clean_later(&bam);
        let coverage = contig_coverage(p, &bam, &info_dir.join("illumina_coverage.tsv"));
        for warning in coverage_warnings("Illumina", &coverage, ILLUMINA_COVERAGE_MIN) {
            p.add_warning(&warning, &ASSEMBLY_NOTES);
        }
    }
    p.finish_step(&info_dir);
}


/// Low overall coverage, contigs below the minimum and contigs below a fifth of the mean.
pub fn coverage_warnings(read_type: &str, coverage: &[ContigCoverage], min_coverage: f64)
        -> Vec<String> {
    if coverage.is_empty() {
        return Vec::new();
    }
    let mean = mean_depth(coverage);
    let mut warnings = Vec::new();
    if mean <= min_coverage {
        warnings.push(format!("{} mean coverage ({:.0}X) is less than the recommended minimum \
                               ({:.0}X).", read_type, mean, min_coverage));
    }
    let mut sorted = coverage.to_vec();
    sorted.sort_by(|a, b| b.length.cmp(&a.length));
    for contig in sorted.iter().filter(|c| c.mean_depth < min_coverage) {
        warnings.push(format!("{} coverage of {} ({:.0}X) is less than the recommended minimum \
                               ({:.0}X).", read_type, contig.contig, contig.mean_depth,
                              min_coverage));
    }
    for contig in sorted.iter().filter(|c| mean > 0.0 && c.mean_depth / mean < 0.2) {
        warnings.push(format!("{} coverage of {} ({:.0}X) is less than 1/5 the mean coverage \
                               ({:.0}X).", read_type, contig.contig, contig.mean_depth, mean));
    }
    warnings
}
