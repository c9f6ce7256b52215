// This file contains the polishing steps: Racon, Medaka and Nanopolish with ONT reads, and Pilon
// with Illumina reads.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::{Path, PathBuf};

use crate::assembly::repair_contig_names;
use crate::ledger::{ASSEMBLY_METHODS, ASSEMBLY_NOTES};
use crate::mapping::{contig_coverage, index_bam, map_illumina_fastq, mean_depth,
                     minimap_ont_fastq, ContigCoverage};
use crate::misc::{quit_with_error, write_file};
use crate::pipeline::Pipeline;
use crate::runner::std_files;


pub const PILON_COVERAGE_MIN: f64 = 25.0;
const NANOPOLISH_ATTEMPTS: usize = 3;


pub fn racon_ont_assembly(p: &mut Pipeline) {
    p.log.main_process("Running Racon on assembly");
    let racon_dir = p.start_step("racon");
    let fastq = p.ont_fastq();

    let mut input_assembly = p.genome_fasta();
    for i in 0..p.config.opts.racon_rounds {
        p.log.sub_process(&format!("Running minimap2 round {}", i));
        let paf = racon_dir.join(format!("ont_rva_{}.paf", i));
        p.run_command(&format!("minimap2 -x map-ont -m 10 -t {} {} {} 1>{} 2>{}", p.threads(),
                               input_assembly.display(), fastq.display(), paf.display(),
                               racon_dir.join(format!("minimap_rva_{}.stderr", i)).display()));
        p.require_output(&paf, "ONT reads v. assembly PAF");

        p.log.sub_process(&format!("Running racon round {}", i));
        let racon_fasta = racon_dir.join(format!("ont_racon_{}.fasta", i));
        p.run_command(&format!("racon -m 8 -x 6 -g -8 -w 500 -t {} {} {} {} 1>{} 2>{}",
                               p.threads(), fastq.display(), paf.display(),
                               input_assembly.display(), racon_fasta.display(),
                               racon_dir.join(format!("racon_{}.stderr", i)).display()));
        p.require_output(&racon_fasta, "ONT racon assembly");
        input_assembly = racon_fasta;
    }

    p.log.sub_process("Repairing contig names");
    let assembly_fasta = racon_dir.join("assembly.fasta");
    repair_contig_names(p, &input_assembly, &assembly_fasta, strip_coordinates, 0);
    p.require_output(&assembly_fasta, "Genome assembly");
    p.set_genome(&assembly_fasta);
    let method = format!("The genome assembly was polished using ONT reads and Racon (v {}) \
                          over {} rounds.", p.config.derived.version("racon"),
                         p.config.opts.racon_rounds);
    p.report.add_method(ASSEMBLY_METHODS, &method);
    p.finish_step(&racon_dir);
}


/// Drops everything from the first colon (e.g. "contig_1:0-5000" -> "contig_1").
pub fn strip_coordinates(header: &str) -> String {
    match header.find(':') {
        Some(i) => header[..i].to_string(),
        None => header.to_string(),
    }
}


fn medaka_contig_name(header: &str) -> String {
    strip_coordinates(header).replace("_segment", "_")
}


fn pilon_contig_name(header: &str) -> String {
    header.replace("_pilon", "")
}


pub fn medaka_ont_assembly(p: &mut Pipeline) {
    p.log.main_process("Running Medaka on ONT assembly");
    let medaka_dir = p.start_step("medaka");
    let raw_fastq = match &p.config.state.ont_raw_fastq {
        Some(fastq) => fastq.clone(),
        None => p.ont_fastq(),
    };

    p.log.sub_process("Starting medaka");
    let consensus = medaka_dir.join("consensus.fasta");
    let (stdout, stderr) = std_files(&medaka_dir.join("medaka"));
    p.run_command(&format!("medaka_consensus -m r941_min_high_g360 -i {} -d {} -o {} -t {} \
                            1>{} 2>{}",
                           raw_fastq.display(), p.genome_fasta().display(), medaka_dir.display(),
                           p.threads(), stdout.display(), stderr.display()));
    p.require_output(&consensus, "Medaka FASTA");
    p.clean_later(&medaka_dir.join("calls_to_draft.bam"));

    p.log.sub_process("Repairing contig names after Medaka");
    let assembly_fasta = medaka_dir.join("assembly.fasta");
    repair_contig_names(p, &consensus, &assembly_fasta, medaka_contig_name, 0);
    p.require_output(&assembly_fasta, "Genome assembly");
    p.set_genome(&assembly_fasta);
    let method = format!("The genome assembly was polished using ONT reads and Medaka (v {}).",
                         p.config.derived.version("medaka"));
    p.report.add_method(ASSEMBLY_METHODS, &method);
    p.finish_step(&medaka_dir);
}


pub fn nanopolish_ont_assembly(p: &mut Pipeline) {
    p.log.main_process("Running Nanopolish on ONT assembly");
    let nanopolish_dir = p.start_step("nanopolish");
    let fastq = p.ont_fastq();
    let genome = p.genome_fasta();
    let Some(fast5_dir) = p.config.opts.ont_fast5.clone() else {
        let message = "Need both ONT FAST5 and ONT FASTQ data to run Nanopolish";
        p.log.error(message);
        quit_with_error(message);
    };

    p.log.sub_process("Mapping ONT reads to the genome assembly");
    let mut bam = nanopolish_dir.join("minimap.bam");
    minimap_ont_fastq(p, &genome, &fastq, &bam);
    p.clean_later(&bam);

    let coverage = contig_coverage(p, &bam, &nanopolish_dir.join("contig_coverage.tsv"));
    let max_coverage = p.config.opts.max_nanopolish_coverage;
    if needs_downsampling(&coverage, max_coverage) {
        p.log.sub_process(&format!("Downsampling ONT mappings to {:.0}X", max_coverage));
        bam = downsample_bam(p, &nanopolish_dir, &bam, &coverage, max_coverage);
    }

    p.log.sub_process("Indexing FAST5 data");
    let seq_files = match &p.config.opts.albacore_seq_file {
        Some(file) => file.clone(),
        None => write_sequencing_summaries(p, &nanopolish_dir),
    };
    let (stdout, stderr) = std_files(&nanopolish_dir.join("index"));
    p.run_command(&format!("nanopolish index -d {} -f {} {} 1>{} 2>{}", fast5_dir.display(),
                           seq_files.display(), fastq.display(), stdout.display(),
                           stderr.display()));

    let prefix = nanopolish_dir.join("nanopolish");
    let ranges_file = PathBuf::from(format!("{}_ranges.txt", prefix.display()));
    p.run_command(&format!("nanopolish_makerange.py {} > {}", genome.display(),
                           ranges_file.display()));
    let ranges: Vec<String> = p.runner.read_lines(&ranges_file).into_iter()
        .filter_map(|l| l.split_whitespace().next().map(String::from))
        .collect();

    p.log.sub_process(&format!("Running Nanopolish on {} ranges", ranges.len()));
    run_nanopolish_ranges(p, &ranges, &prefix, &fastq, &bam, &genome);

    p.log.sub_process("Merging Nanopolish results");
    let nanopolish_fasta = nanopolish_dir.join("assembly.fasta");
    p.run_command(&format!("nanopolish vcf2fasta -g {} {}.*.vcf 1>{}", genome.display(),
                           prefix.display(), nanopolish_fasta.display()));
    p.require_output(&nanopolish_fasta, "Nanopolish FASTA");
    p.set_genome(&nanopolish_fasta);
    let method = format!("The genome assembly was polished using ONT reads and Nanopolish \
                          (v {}).", p.config.derived.version("nanopolish"));
    p.report.add_method(ASSEMBLY_METHODS, &method);
    p.finish_step(&nanopolish_dir);
}


/// Downsampling kicks in when any contig is well over the maximum coverage.
pub fn needs_downsampling(coverage: &[ContigCoverage], max_coverage: f64) -> bool {
    coverage.iter().any(|c| c.mean_depth > max_coverage * 1.25)
}


/// The fraction of a contig's alignments to keep so that it lands at the maximum coverage.
pub fn downsampling_fraction(depth: f64, max_coverage: f64) -> f64 {
    if depth <= 0.0 { 1.0 } else { (max_coverage / depth).min(1.0) }
}


fn downsample_bam(p: &mut Pipeline, nanopolish_dir: &Path, bam: &Path,
                  coverage: &[ContigCoverage], max_coverage: f64) -> PathBuf {
    let mut contig_bams = Vec::new();
    for contig in coverage {
        let contig_bam = nanopolish_dir.join(format!("{}.bam", contig.contig));
        // samtools reads the integer part of -s as a seed, so a full contig is kept by omitting it.
        let fraction = downsampling_fraction(contig.mean_depth, max_coverage);
        let sampling = if fraction < 1.0 { format!("-s {:.4} ", fraction) } else { String::new() };
        p.run_command(&format!("samtools view -b {}{} \"{}\" > {}", sampling, bam.display(),
                               contig.contig, contig_bam.display()));
        p.clean_later(&contig_bam);
        contig_bams.push(contig_bam);
    }
    let downsampled = nanopolish_dir.join("downsampled.bam");
    if contig_bams.len() > 1 {
        let inputs: Vec<String> = contig_bams.iter().map(|b| b.display().to_string()).collect();
        p.run_command(&format!("samtools merge {} {}", downsampled.display(), inputs.join(" ")));
    } else if let Some(contig_bam) = contig_bams.first() {
        p.run_command(&format!("cp {} {}", contig_bam.display(), downsampled.display()));
    }
    p.clean_later(&downsampled);
    index_bam(p, &downsampled);
    downsampled
}


// Lists every basecalling sequencing_summary.txt under the ONT FASTQ directory.
fn write_sequencing_summaries(p: &Pipeline, nanopolish_dir: &Path) -> PathBuf {
    let list_file = nanopolish_dir.join("sequencing_summaries.txt");
    let mut summaries: Vec<String> = Vec::new();
    if let Some(fastq_dir) = &p.config.state.ont_fastq_dir {
        if let Ok(entries) = fs::read_dir(fastq_dir) {
            for entry in entries.flatten() {
                let summary = entry.path().join("sequencing_summary.txt");
                if summary.is_file() {
                    summaries.push(summary.display().to_string());
                }
            }
        }
    }
    summaries.sort();
    let mut contents = summaries.join("\n");
    contents.push('\n');
    write_file(&list_file, &contents);
    list_file
}


// Runs nanopolish variants on each range in parallel, retrying failures. Quits if any range
// never produced a VCF.
fn run_nanopolish_ranges(p: &Pipeline, ranges: &[String], prefix: &Path, fastq: &Path,
                         bam: &Path, genome: &Path) {
    let pool = match ThreadPoolBuilder::new().num_threads(p.threads()).build() {
        Ok(pool) => pool,
        Err(e) => quit_with_error(&format!("failed to start Nanopolish threads\n{}", e)),
    };
    let (stdout, stderr) = std_files(prefix);
    let runner = &p.runner;
    let log = &p.log;
    let failed: Vec<(String, String)> = pool.install(|| {
        ranges.par_iter().filter_map(|range| {
            let vcf = PathBuf::from(format!("{}.{}.vcf", prefix.display(), range));
            let command = format!("nanopolish variants --faster --consensus -o {} -w {} -r {} \
                                   -b {} -g {} -t 1 --min-candidate-frequency 0.1 \
                                   1>>{} 2>>{}",
                                  vcf.display(), range, fastq.display(), bam.display(),
                                  genome.display(), stdout.display(), stderr.display());
            for attempt in 1..=NANOPOLISH_ATTEMPTS {
                if runner.try_run(log, &command) && runner.file_ok(&vcf) {
                    return None;
                }
                log.sub_process(&format!("Nanopolish VCF {} failed (attempt {})", vcf.display(),
                                         attempt));
            }
            Some((range.clone(), command))
        }).collect()
    });
    if let Some((range, command)) = failed.first() {
        let message = format!("Nanopolish failed on range {} after {} attempts: {}", range,
                              NANOPOLISH_ATTEMPTS, command);
        log.error(&message);
        quit_with_error(&message);
    }
}


pub fn pilon_assembly(p: &mut Pipeline) {
    p.log.main_process("Running Pilon on genome assembly");
    let pilon_dir = p.start_step("pilon");
    let genome = p.genome_fasta();

    p.log.sub_process("Mapping Illumina reads to assembly");
    let bam = pilon_dir.join("mapping.bam");
    let method = map_illumina_fastq(p, &genome, &bam);
    p.clean_later(&bam);
    p.report.add_method(ASSEMBLY_METHODS, &method);

    let coverage = contig_coverage(p, &bam, &pilon_dir.join("coverage.tsv"));
    if !coverage.is_empty() {
        let pilon_coverage = mean_depth(&coverage);
        if pilon_coverage < PILON_COVERAGE_MIN {
            let warning = format!("Illumina coverage for Pilon ({:.0}X) is below the recommended \
                                   minimum ({:.0}X).", pilon_coverage, PILON_COVERAGE_MIN);
            p.add_warning(&warning, &ASSEMBLY_NOTES);
        }
    }

    p.log.sub_process("Running Pilon");
    let pilon_prefix = pilon_dir.join("pilon");
    let pilon_fasta = pilon_dir.join("pilon.fasta");
    let bam_option = if p.config.opts.illumina_fastq.len() == 1 { "--unpaired" } else { "--frags" };
    let (stdout, stderr) = std_files(&pilon_prefix);
    p.run_command(&format!("pilon --genome {} {} {} --output {} 1> {} 2> {}", genome.display(),
                           bam_option, bam.display(), pilon_prefix.display(), stdout.display(),
                           stderr.display()));
    p.require_output(&pilon_fasta, "Pilon FASTA");

    p.log.sub_process("Repairing contig names after Pilon");
    let assembly_fasta = pilon_dir.join("assembly.fasta");
    repair_contig_names(p, &pilon_fasta, &assembly_fasta, pilon_contig_name, 0);
    p.require_output(&assembly_fasta, "Genome assembly");
    p.set_genome(&assembly_fasta);
    let method = format!("The Illumina mappings were then used to error-correct the assembly \
                          with Pilon (v {}).", p.config.derived.version("pilon"));
    p.report.add_method(ASSEMBLY_METHODS, &method);
    p.finish_step(&pilon_dir);
}
