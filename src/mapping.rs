// This file contains read-mapping helpers shared by the polishing, coverage and mutation steps.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::misc::quit_with_error;
use crate::pipeline::Pipeline;
use crate::runner::std_files;


/// Illumina reads with a mean length at or below this are mapped with bwa aln.
pub const SHORT_READ_MAX_LENGTH: f64 = 65.0;


#[derive(Clone, Debug, PartialEq)]
pub struct ContigCoverage {
    pub contig: String,
    pub length: u64,
    pub mean_depth: f64,
}


fn prefix_of(bam: &Path) -> PathBuf {
    bam.with_extension("")
}


pub fn minimap_ont_fastq(p: &Pipeline, genome: &Path, fastq: &Path, bam: &Path) {
    let (_, stderr) = std_files(&prefix_of(bam));
    p.run_command(&format!("minimap2 -a -t {} -x map-ont {} {} 2>{} | samtools sort -@ {} -o {} \
                            -T reads.tmp - 1>/dev/null 2>/dev/null",
                           p.threads(), genome.display(), fastq.display(), stderr.display(),
                           p.threads(), bam.display()));
    p.require_output(bam, "BAM");
    index_bam(p, bam);
}


pub fn minimap_illumina_fastq(p: &Pipeline, genome: &Path, fastqs: &[PathBuf], bam: &Path) {
    let (_, stderr) = std_files(&prefix_of(bam));
    p.run_command(&format!("minimap2 -a -t {} -x sr {} {} 2>{} | samtools sort -@ {} -o {} \
                            -T reads.tmp - 1>/dev/null 2>/dev/null",
                           p.threads(), genome.display(), join_paths(fastqs), stderr.display(),
                           p.threads(), bam.display()));
    p.require_output(bam, "BAM");
    index_bam(p, bam);
}


pub fn bwa_index_fasta(p: &Pipeline, fasta: &Path) {
    let bwa_index = PathBuf::from(format!("{}.bwt", fasta.display()));
    if !p.runner.is_fake() && bwa_index.is_file() {
        return;
    }
    p.log.sub_process("Indexing FASTA with bwa index");
    let (stdout, stderr) = std_files(&PathBuf::from(format!("{}_index",
                                                            fasta.with_extension("").display())));
    p.run_command(&format!("bwa index {} 1>{} 2>{}", fasta.display(), stdout.display(),
                           stderr.display()));
    p.require_output(&bwa_index, "BWA index");
}


pub fn bwa_short_illumina_fastq(p: &Pipeline, genome: &Path, fastqs: &[PathBuf], bam: &Path) {
    let prefix = prefix_of(bam).display().to_string();
    bwa_index_fasta(p, genome);
    let mut sais = Vec::new();
    for (i, fastq) in fastqs.iter().enumerate() {
        let sai = PathBuf::from(format!("{}_aln_{}.sai", prefix, i));
        let (_, stderr) = std_files(&PathBuf::from(format!("{}_aln", prefix)));
        p.run_command(&format!("bwa aln -t {} {} {} 1>{} 2>{}", p.threads(), genome.display(),
                               fastq.display(), sai.display(), stderr.display()));
        p.require_output(&sai, "BWA SAI");
        sais.push(sai);
    }
    let read_type = if fastqs.len() > 1 { "sampe" } else { "samse" };
    let (_, stderr) = std_files(&PathBuf::from(format!("{}_sam", prefix)));
    p.run_command(&format!("bwa {} {} {} {} 2>{} | samtools sort -T {}.tmp -o {} - \
                            1>/dev/null 2>/dev/null",
                           read_type, genome.display(), join_paths(&sais), join_paths(fastqs),
                           stderr.display(), prefix, bam.display()));
    p.require_output(bam, "BAM");
    index_bam(p, bam);
}


/// Maps the Illumina reads with whichever aligner suits their length. Returns a methods
/// sentence naming the aligner used.
pub fn map_illumina_fastq(p: &Pipeline, genome: &Path, bam: &Path) -> String {
    let fastqs = p.config.opts.illumina_fastq.clone();
    let short_reads = p.config.derived.illumina_mean_length
        .is_some_and(|l| l <= SHORT_READ_MAX_LENGTH);
    if short_reads {
        bwa_short_illumina_fastq(p, genome, &fastqs, bam);
        "Illumina reads were mapped to the genome assembly using bwa aln.".to_string()
    } else {
        minimap_illumina_fastq(p, genome, &fastqs, bam);
        format!("Illumina reads were mapped to the genome assembly using minimap2 (v {}).",
                p.config.derived.version("minimap2"))
    }
}


pub fn index_bam(p: &Pipeline, bam: &Path) {
    p.run_command(&format!("samtools index {} 1>/dev/null 2>/dev/null", bam.display()));
    p.require_output(&PathBuf::from(format!("{}.bai", bam.display())), "BAM index");
}


/// Runs samtools depth over every position and summarises it per contig. A fake run yields no
/// coverage.
pub fn contig_coverage(p: &Pipeline, bam: &Path, depth_tsv: &Path) -> Vec<ContigCoverage> {
    p.run_command(&format!("samtools depth -a {} > {}", bam.display(), depth_tsv.display()));
    if p.runner.is_fake() && !depth_tsv.is_file() {
        return Vec::new();
    }
    p.require_output(depth_tsv, "Coverage TSV");
    match summarise_depth(depth_tsv) {
        Ok(coverage) => coverage,
        Err(e) => quit_with_error(&format!("failed to read {}\n{}", depth_tsv.display(), e)),
    }
}


/// Per-contig mean depth from samtools depth output (contig, position, depth), keeping the
/// contigs in file order.
pub fn summarise_depth(depth_tsv: &Path) -> io::Result<Vec<ContigCoverage>> {
    let reader = BufReader::new(File::open(depth_tsv)?);
    let mut coverage: Vec<ContigCoverage> = Vec::new();
    let mut total_depth = 0u64;
    for line in reader.lines() {
        let line = line?;
        let mut parts = line.split('\t');
        let (Some(contig), Some(_), Some(depth)) = (parts.next(), parts.next(), parts.next())
            else { continue; };
        let depth: u64 = depth.trim().parse().unwrap_or(0);
        if coverage.last().map(|c| c.contig.as_str()) != Some(contig) {
            finish_contig(&mut coverage, total_depth);
            coverage.push(ContigCoverage { contig: contig.to_string(), length: 0,
                                           mean_depth: 0.0 });
            total_depth = 0;
        }
        if let Some(last) = coverage.last_mut() {
            last.length += 1;
        }
        total_depth += depth;
    }
    finish_contig(&mut coverage, total_depth);
    Ok(coverage)
}


fn finish_contig(coverage: &mut [ContigCoverage], total_depth: u64) {
    if let Some(last) = coverage.last_mut() {
        if last.length > 0 {
            last.mean_depth = total_depth as f64 / last.length as f64;
        }
    }
}


/// Length-weighted mean depth over all contigs.
pub fn mean_depth(coverage: &[ContigCoverage]) -> f64 {
    let total_length: u64 = coverage.iter().map(|c| c.length).sum();
    if total_length == 0 {
        return 0.0;
    }
    coverage.iter().map(|c| c.mean_depth * c.length as f64).sum::<f64>() / total_length as f64
}


pub fn join_paths(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(" ")
}
