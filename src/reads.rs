// This file contains the read-handling steps: watching a live ONT run, basecalling,
// demultiplexing, error correction and read-set statistics.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use seq_io::fastq::Record;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::ledger::{Content, Table, ASSEMBLY_NOTES, BASECALLING_METHODS, STATS_TITLE};
use crate::metrics::ReadSetMetrics;
use crate::misc::{check_write, create_dir, fastq_reader, format_kmg, load_fasta,
                  quit_with_error, spinner};
use crate::pipeline::{select_barcodes, Pipeline, BARCODE_MIN_PERCENT};
use crate::plan::{PlanEntry, Step};
use crate::runner::std_files;


pub const ONT_N50_MIN: u64 = 2500;

// A live run is assumed to write this many reads per FAST5 file.
const READS_PER_FAST5: i64 = 1000;
const WATCH_SLEEP: Duration = Duration::from_secs(10);
const LORMA_QUALITY: u8 = 25;


pub fn watch_ont(p: &mut Pipeline) {
    p.log.main_process("Watching ONT run in progress");
    let opts = p.config.opts.clone();
    let Some(watch_dir) = opts.ont_watch.clone() else { return; };
    let fastq_dir = p.start_step("ont_fastq");
    let batches_dir = fastq_dir.join("watch");
    create_dir(&batches_dir);

    let max_time = Duration::from_secs_f64(opts.ont_watch_max_time.max(0.0) * 3600.0);
    let between_time = Duration::from_secs_f64(opts.ont_watch_between_time.max(0.0) * 60.0);
    let start_time = Instant::now();
    let mut last_new_time = start_time;
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut batch_fastqs = Vec::new();
    let (guppy_stdout, guppy_stderr) = std_files(&fastq_dir.join("guppy"));

    let pb = spinner("watching for new FAST5 files...");
    loop {
        if start_time.elapsed() >= max_time {
            break;
        }
        let new_fast5: Vec<PathBuf> = list_fast5(&watch_dir).into_iter()
            .filter(|f| !seen.contains(f)).collect();
        if new_fast5.is_empty() {
            if last_new_time.elapsed() >= between_time || p.runner.is_fake() {
                break;
            }
            thread::sleep(WATCH_SLEEP);
            continue;
        }
        last_new_time = Instant::now();

        let batch_dir = batches_dir.join(batch_fastqs.len().to_string());
        let guppy_dir = batch_dir.join("guppy");
        create_dir(&guppy_dir);
        for fast5 in new_fast5 {
            p.run_command(&format!("ln -rs {} {}", fast5.display(), batch_dir.display()));
            seen.insert(fast5);
        }
        p.run_command(&format!("guppy_basecaller -i {} -s {} --device \"cuda:0\" \
                                --flowcell FLO-MIN106 --kit SQK-RBK004 1>{} 2>{}",
                               batch_dir.display(), guppy_dir.display(), guppy_stdout.display(),
                               guppy_stderr.display()));
        let merged_fastq = guppy_dir.join("ont_raw.fastq");
        p.run_command(&format!("cat {}/*.fastq > {}", guppy_dir.display(),
                               merged_fastq.display()));
        p.require_output(&merged_fastq, "ONT raw FASTQ file");
        batch_fastqs.push(merged_fastq);

        pb.set_message(format!("{} FAST5 files basecalled", seen.len()));
        if seen.len() as i64 * READS_PER_FAST5 >= opts.ont_watch_min_reads {
            break;
        }
        thread::sleep(WATCH_SLEEP);
    }
    pb.finish_and_clear();

    if seen.is_empty() && !p.runner.is_fake() {
        let message = "No reads were basecalled through --ont-watch.";
        p.log.error(message);
        quit_with_error(message);
    }
    let raw_fastq = fastq_dir.join("ont_raw.fastq");
    let batch_list: Vec<String> = batch_fastqs.iter().map(|f| f.display().to_string()).collect();
    if !batch_list.is_empty() {
        p.run_command(&format!("cat {} > {}", batch_list.join(" "), raw_fastq.display()));
    }
    p.require_output(&raw_fastq, "ONT raw FASTQ file");
    for batch_fastq in batch_fastqs {
        p.clean_later(&batch_fastq);
    }
    set_raw_fastq(p, &fastq_dir, &raw_fastq);
    add_guppy_method(p);
    p.finish_step(&fastq_dir);
}


fn list_fast5(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else { return Vec::new(); };
    let mut files: Vec<PathBuf> = entries.flatten().map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "fast5"))
        .collect();
    files.sort();
    files
}


pub fn guppy_ont_fast5(p: &mut Pipeline) {
    p.log.main_process("Basecalling ONT reads with Guppy");
    let Some(fast5_dir) = p.config.opts.ont_fast5.clone() else { return; };
    let fastq_dir = p.start_step("ont_fastq");

    p.log.sub_process("Running Guppy on raw ONT FAST5");
    let (stdout, stderr) = std_files(&fastq_dir.join("guppy"));
    p.run_command(&format!("guppy_basecaller -i {} -r -s {} --num_callers 14 \
                            --gpu_runners_per_device 8 --device \"cuda:0\" --fast5_out \
                            --flowcell FLO-MIN106 --kit SQK-RBK004 1>{} 2>{}",
                           fast5_dir.display(), fastq_dir.display(), stdout.display(),
                           stderr.display()));

    p.log.sub_process("Merging Guppy runs into raw ONT FASTQ");
    let raw_fastq = fastq_dir.join("ont_raw.fastq");
    p.run_command(&format!("cat {}/*.fastq > {}", fastq_dir.display(), raw_fastq.display()));
    p.require_output(&raw_fastq, "ONT raw FASTQ file");

    set_raw_fastq(p, &fastq_dir, &raw_fastq);
    add_guppy_method(p);
    p.finish_step(&fastq_dir);
}


fn set_raw_fastq(p: &mut Pipeline, fastq_dir: &Path, raw_fastq: &Path) {
    p.config.state.ont_fastq_dir = Some(fastq_dir.to_path_buf());
    p.config.state.ont_raw_fastq = Some(raw_fastq.to_path_buf());
    p.config.state.ont_fastq = Some(raw_fastq.to_path_buf());
}


fn add_guppy_method(p: &mut Pipeline) {
    let method = format!("ONT reads were basecalled using guppy (v {}).",
                         p.config.derived.version("guppy"));
    p.report.add_method(BASECALLING_METHODS, &method);
}


/// Demultiplexes with qcat. A single barcode carries on in this pipeline; several barcodes
/// replace the rest of the plan with one sub-pipeline per barcode.
pub fn qcat_ont_fastq(p: &mut Pipeline) {
    p.log.main_process("Demultiplexing and trimming reads with qcat");
    let demux_dir = p.start_step("demultiplex");
    let input_fastq = match &p.config.state.ont_raw_fastq {
        Some(fastq) => fastq.clone(),
        None => p.ont_fastq(),
    };

    p.log.sub_process("Running qcat on raw ONT FASTQ");
    let (stdout, stderr) = std_files(&demux_dir.join("qcat"));
    p.run_command(&format!("qcat --trim --guppy --min-score 65 --kit RBK004 -t {} -f {} -b {} \
                            1>{} 2>{}",
                           p.threads(), input_fastq.display(), demux_dir.display(),
                           stdout.display(), stderr.display()));

    let summary_tsv = demux_dir.join("barcode_summary.tsv");
    p.run_command(&format!("cat {} | grep -E 'barcode[0-9]+' | \
                            awk '{{OFS=\"\\t\"; print $1,$2,$(NF - 1)}}' > {}",
                           stderr.display(), summary_tsv.display()));
    p.require_output(&summary_tsv, "Barcode summary");
    let barcodes = select_barcodes(&p.runner.read_lines(&summary_tsv), BARCODE_MIN_PERCENT);
    p.config.state.demultiplexed_dir = Some(demux_dir.clone());
    p.config.state.barcodes = barcodes.clone();

    let method = format!("ONT reads were demultiplexed and trimmed using qcat (v {}).",
                         p.config.derived.version("qcat"));
    p.report.add_method(BASECALLING_METHODS, &method);

    match barcodes.len() {
        0 => {
            if !p.runner.is_fake() {
                let message = format!("no barcode holds at least {}% of the reads",
                                      BARCODE_MIN_PERCENT);
                p.log.error(&message);
                quit_with_error(&message);
            }
        }
        1 => {
            p.config.state.ont_fastq = Some(demux_dir.join(format!("{}.fastq", barcodes[0])));
        }
        _ => {
            if !p.config.opts.only_basecall {
                p.log.sub_process(&format!("Found {} barcodes: {}", barcodes.len(),
                                           barcodes.join(", ")));
                p.plan.replace_remaining(vec![
                    PlanEntry::with_args(Step::StartBarcodeAnalysis, barcodes),
                    PlanEntry::new(Step::CleanUp)]);
            }
        }
    }
    p.finish_step(&demux_dir);
}


pub fn ont_fastq_info(p: &mut Pipeline) {
    p.log.main_process("Getting ONT FASTQ info");
    let fastq = p.ont_fastq();
    if p.runner.is_fake() && !fastq.is_file() {
        return;
    }
    let metrics = read_set_metrics(&[fastq]);
    p.log.sub_process(&format!("{} reads, {} bases, N50 {}", metrics.count,
                               format_kmg(metrics.bases, 1), metrics.n50));
    if metrics.n50 <= ONT_N50_MIN {
        let warning = format!("ONT N50 ({}) is less than the recommended minimum ({}).",
                              metrics.n50, ONT_N50_MIN);
        p.add_warning(&warning, &ASSEMBLY_NOTES);
    }
    let yaml = p.output_dir().join("ont_read_metrics.yaml");
    check_write(metrics.save_to_yaml(&yaml), &yaml);
    report_read_metrics(p, "ONT reads", &metrics);
}


pub fn illumina_fastq_info(p: &mut Pipeline) {
    p.log.main_process("Getting Illumina FASTQ info");
    let fastqs = p.config.opts.illumina_fastq.clone();
    if p.runner.is_fake() && fastqs.iter().any(|f| !f.is_file()) {
        return;
    }
    let metrics = read_set_metrics(&fastqs);
    p.log.sub_process(&format!("{} reads, {} bases, mean length {:.1}", metrics.count,
                               format_kmg(metrics.bases, 1), metrics.mean_length));
    let yaml = p.output_dir().join("illumina_read_metrics.yaml");
    check_write(metrics.save_to_yaml(&yaml), &yaml);
    report_read_metrics(p, "Illumina reads", &metrics);
}


fn report_read_metrics(p: &mut Pipeline, title: &str, metrics: &ReadSetMetrics) {
    let mut table = Table::new(&["metric", "value"]);
    for row in metrics.rows() {
        table.push(row);
    }
    p.report.section_mut(&[STATS_TITLE]).set(title, Content::Table(table));
}


/// Read-set statistics over one or more FASTQ files (plain or gzipped).
pub fn read_set_metrics(fastqs: &[PathBuf]) -> ReadSetMetrics {
    let mut lengths = Vec::new();
    for fastq in fastqs {
        let mut reader = fastq_reader(fastq);
        while let Some(record) = reader.next() {
            match record {
                Ok(record) => lengths.push(record.seq().len() as u64),
                Err(e) => quit_with_error(&format!("failed to read {}\n{}", fastq.display(), e)),
            }
        }
    }
    lengths.sort_unstable_by(|a, b| b.cmp(a));
    ReadSetMetrics::new(&lengths)
}


/// Mean length of the first reads in a FASTQ, or None if it can't be read.
pub fn mean_read_length(fastq: &Path, max_reads: usize) -> Option<f64> {
    let mut reader = fastq_reader(fastq);
    let (mut total, mut count) = (0usize, 0usize);
    while let Some(Ok(record)) = reader.next() {
        total += record.seq().len();
        count += 1;
        if count >= max_reads {
            break;
        }
    }
    if count == 0 { None } else { Some(total as f64 / count as f64) }
}


pub fn lorma_ont_fastq(p: &mut Pipeline) {
    p.log.main_process("Using lordec-correct to error-correct ONT reads");
    let lorma_dir = p.start_step("lorma");
    let ont_fastq = p.ont_fastq();

    p.log.sub_process("Running LoRMA on the ONT reads");
    let lorma_fasta = lorma_dir.join("lorma.fasta");
    let lorma_fastq = lorma_dir.join("lorma.fastq");
    let (stdout, stderr) = std_files(&lorma_dir.join("lorma"));
    p.run_command(&format!("lordec-correct -c -s 4 -k 19 -g -T {} -i {} -2 {} -o {} 1>{} 2>{}",
                           p.threads(), ont_fastq.display(), ont_fastq.display(),
                           lorma_fasta.display(), stdout.display(), stderr.display()));
    p.require_output(&lorma_fasta, "LoRMA FASTA");

    p.log.sub_process("Converting LoRMA FASTA to a FASTQ");
    if lorma_fasta.is_file() {
        check_write(fasta_to_fastq(&lorma_fasta, &lorma_fastq, LORMA_QUALITY), &lorma_fastq);
    }
    p.require_output(&lorma_fastq, "LoRMA FASTQ");
    p.config.state.ont_fastq = Some(lorma_fastq);
    p.report.add_method(BASECALLING_METHODS, "ONT reads were error-corrected using LoRMA.");
    p.finish_step(&lorma_dir);
}


/// Writes each FASTA record as a FASTQ record with a uniform base quality.
fn fasta_to_fastq(fasta: &Path, fastq: &Path, quality: u8) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(fastq)?);
    let quality_char = (quality + 33) as char;
    for (_, header, seq) in load_fasta(fasta) {
        writeln!(writer, "@{}\n{}\n+\n{}", header, seq,
                 quality_char.to_string().repeat(seq.len()))?;
    }
    writer.flush()
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use crate::misc::load_file_lines;
    use crate::tests::{make_gzipped_test_file, make_test_file};

    #[test]
    fn test_read_set_metrics() {
        let dir = tempdir().unwrap();
        let fastq_1 = dir.path().join("reads_1.fastq");
        let fastq_2 = dir.path().join("reads_2.fastq.gz");
        make_test_file(&fastq_1, "@a\nACGTACGTAC\n+\nIIIIIIIIII\n@b\nACGT\n+\nIIII\n");
        make_gzipped_test_file(&fastq_2, "@c\nACGTAC\n+\nIIIIII\n");
        let metrics = read_set_metrics(&[fastq_1, fastq_2]);
        assert_eq!(metrics.count, 3);
        assert_eq!(metrics.bases, 20);
        assert_eq!(metrics.n50, 6);
        crate::tests::assert_almost_eq(metrics.mean_length, 20.0 / 3.0, 1e-8);
    }

    #[test]
    fn test_mean_read_length() {
        let dir = tempdir().unwrap();
        let fastq = dir.path().join("reads.fastq");
        make_test_file(&fastq, "@a\nACGTACGTAC\n+\nIIIIIIIIII\n@b\nACGT\n+\nIIII\n\
                                @c\nA\n+\nI\n");
        assert_eq!(mean_read_length(&fastq, 2), Some(7.0));
        assert_eq!(mean_read_length(&fastq, 10), Some(5.0));
        let empty = dir.path().join("empty.fastq");
        make_test_file(&empty, "");
        assert_eq!(mean_read_length(&empty, 10), None);
    }

    #[test]
    fn test_fasta_to_fastq() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("lorma.fasta");
        let fastq = dir.path().join("lorma.fastq");
        make_test_file(&fasta, ">read_1 corrected\nACGT\n>read_2\nGG\n");
        fasta_to_fastq(&fasta, &fastq, 25).unwrap();
        assert_eq!(load_file_lines(&fastq),
                   vec!["@read_1 corrected", "ACGT", "+", "::::", "@read_2", "GG", "+", "::"]);
    }

    #[test]
    fn test_list_fast5() {
        let dir = tempdir().unwrap();
        make_test_file(&dir.path().join("b.fast5"), "x");
        make_test_file(&dir.path().join("a.fast5"), "x");
        make_test_file(&dir.path().join("a.fastq"), "x");
        let files = list_fast5(dir.path());
        assert_eq!(files, vec![dir.path().join("a.fast5"), dir.path().join("b.fast5")]);
    }
}
