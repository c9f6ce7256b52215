// This file contains some high-level tests for Pima and functions common to other tests.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{File, read_to_string, set_permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use crate::config::Config;
use crate::options::{Assembler, Options};
use crate::pipeline::{select_barcodes, Pipeline, BARCODE_MIN_PERCENT};
use crate::plan::Step;
use crate::predicates::PREDICATES;
use crate::runner::Runner;


pub fn assert_almost_eq(a: f64, b: f64, epsilon: f64) {
    assert!((a - b).abs() < epsilon,
            "Numbers are not within {:?} of each other: {} vs {}", epsilon, a, b);
}


pub fn make_test_file(file_path: &Path, contents: &str) {
    let mut file = File::create(file_path).unwrap();
    write!(file, "{}", contents).unwrap();
}


pub fn make_gzipped_test_file(file_path: &Path, contents: &str) {
    let mut file = File::create(file_path).unwrap();
    let mut e = GzEncoder::new(Vec::new(), Compression::default());
    e.write_all(contents.as_bytes()).unwrap();
    let _ = file.write_all(&e.finish().unwrap());
}


/// Puts an executable shell script with the given body in dir, so tool lookups can be pointed at
/// a directory of stand-in tools.
pub fn make_fake_tool(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    make_test_file(&path, &format!("#!/bin/sh\n{}\n", body));
    set_permissions(&path, PermissionsExt::from_mode(0o755)).unwrap();
}


fn isolated_runner(fake_run: bool, tool_dir: &Path) -> Runner {
    Runner::new(fake_run).with_search_path(tool_dir)
}


fn bookkeeping_only(data_dir: &Path) -> Options {
    Options { no_amr: true, no_inc: true, no_drawing: true, data_dir: data_dir.to_path_buf(),
              ..Default::default() }
}


#[test]
fn test_no_options() {
    let tools = tempdir().unwrap();
    let p = Pipeline::build(Options::default(), isolated_runner(false, tools.path()));
    assert_eq!(p.ledger.errors, vec!["Nothing to do!", "No output directory given (--output)"]);
    assert_eq!(p.plan.steps(), vec![Step::MakeOutputDir, Step::CleanUp]);
    assert!(p.execute().is_err());
}


#[test]
fn test_genome_only() {
    let dir = tempdir().unwrap();
    let genome = dir.path().join("genome.fasta");
    make_test_file(&genome, ">chromosome\nACGTACGTACGT\n>plasmid\nACGT\n");
    let opts = Options { genome: Some(genome), output: Some(dir.path().join("out")),
                         ..bookkeeping_only(dir.path()) };
    let p = Pipeline::build(opts, isolated_runner(false, dir.path()));
    assert_eq!(p.plan.steps(), vec![Step::MakeOutputDir, Step::CleanUp]);
    assert_eq!(p.ledger.errors, vec!["Nothing to do!"]);
    assert_eq!(p.config.state.genome, vec![("chromosome".to_string(), 12),
                                           ("plasmid".to_string(), 4)]);
}


#[test]
fn test_exactly_one_assembler() {
    let tools = tempdir().unwrap();
    for assembler in [Assembler::Miniasm, Assembler::Wtdbg2, Assembler::Flye] {
        let opts = Options { ont_fastq: Some(PathBuf::from("reads.fastq")), assembler,
                             genome_size: Some("5m".to_string()),
                             output: Some(tools.path().join("out")), ..Default::default() };
        let p = Pipeline::build(opts, isolated_runner(true, tools.path()));
        let steps = p.plan.steps();
        let assemblers: Vec<&Step> = steps.iter().filter(|s| Step::ASSEMBLERS.contains(s))
            .collect();
        assert_eq!(assemblers.len(), 1);
        assert_eq!(steps.contains(&Step::RaconOntAssembly), assembler == Assembler::Miniasm);
    }
}


#[test]
fn test_no_assembly_without_reads() {
    let tools = tempdir().unwrap();
    let opts = Options { genome_size: Some("5m".to_string()),
                         output: Some(tools.path().join("out")), ..Default::default() };
    let p = Pipeline::build(opts, isolated_runner(true, tools.path()));
    assert!(!p.plan.steps().iter().any(|s| Step::ASSEMBLERS.contains(s)));
}


#[test]
fn test_assemblers_need_genome_size() {
    let tools = tempdir().unwrap();
    for (assembler, step) in [(Assembler::Flye, Step::FlyeOntFastq),
                              (Assembler::Wtdbg2, Step::Wtdbg2OntFastq)] {
        let opts = Options { ont_fastq: Some(PathBuf::from("reads.fastq")), assembler,
                             output: Some(tools.path().join("out")), ..Default::default() };
        let p = Pipeline::build(opts, isolated_runner(true, tools.path()));
        let size_errors: Vec<&String> = p.ledger.errors.iter()
            .filter(|e| e.ends_with("requires --genome-size")).collect();
        assert_eq!(size_errors.len(), 1, "{:?}", p.ledger.errors);
        assert!(p.plan.contains(step));
    }
}


#[test]
fn test_failing_version_command() {
    let dir = tempdir().unwrap();
    make_fake_tool(dir.path(), "flye", "exit 2");
    let reads = dir.path().join("reads.fastq");
    make_test_file(&reads, "@read\nACGT\n+\n!!!!\n");
    let opts = Options { ont_fastq: Some(reads), genome_size: Some("5m".to_string()),
                         output: Some(dir.path().join("out")), ..Default::default() };

    let fake = Pipeline::build(Options { fake_run: true, ..opts.clone() },
                               isolated_runner(true, dir.path()));
    assert!(!fake.ledger.errors.iter().any(|e| e.contains("--version")), "{:?}",
            fake.ledger.errors);

    let real = Pipeline::build(opts, isolated_runner(false, dir.path()));
    assert!(real.ledger.errors.contains(&"flye --version failed".to_string()));
    assert!(real.ledger.errors.len() > 1);
}


#[test]
fn test_capabilities_only_grow() {
    let tools = tempdir().unwrap();
    let opts = Options { ont_fastq: Some(PathBuf::from("reads.fastq")),
                         illumina_fastq: vec![PathBuf::from("r1.fastq")],
                         assembler: Assembler::Miniasm, multiplexed: true,
                         ..Default::default() };
    let mut p = Pipeline::unvalidated(Config::new(opts), isolated_runner(true, tools.path()));
    for predicate in PREDICATES.iter() {
        let before = p.config.derived.caps;
        predicate.apply(&mut p);
        assert!(p.config.derived.caps.includes(&before), "{} dropped a capability",
                predicate.name);
    }
    assert!(p.config.derived.caps.will_have_genome_fasta());
}


#[test]
fn test_planning_is_deterministic() {
    let tools = tempdir().unwrap();
    let opts = Options { ont_fastq: Some(PathBuf::from("reads.fastq")),
                         genome_size: Some("4.8m".to_string()), plasmids: true,
                         organism: Some("Bacillus_anthracis".to_string()),
                         output: Some(tools.path().join("out")), ..Default::default() };
    let a = Pipeline::build(opts.clone(), isolated_runner(true, tools.path()));
    let b = Pipeline::build(opts, isolated_runner(true, tools.path()));
    assert_eq!(a.plan, b.plan);
    assert_eq!(a.ledger, b.ledger);
}


#[test]
fn test_missing_bundled_database() {
    let dir = tempdir().unwrap();
    let genome = dir.path().join("genome.fasta");
    make_test_file(&genome, ">chromosome\nACGTACGTACGT\n");
    let opts = Options { genome: Some(genome), no_amr: false,
                         output: Some(dir.path().join("out")),
                         ..bookkeeping_only(dir.path()) };
    let p = Pipeline::build(opts, isolated_runner(false, dir.path()));
    let download_errors: Vec<&String> = p.ledger.errors.iter()
        .filter(|e| e.ends_with("Try --download?")).collect();
    assert_eq!(download_errors.len(), 1);
    assert!(download_errors[0].contains("amr.fasta"));
}


#[test]
fn test_errors_block_execution() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out");
    let opts = Options { ont_fastq: Some(dir.path().join("missing.fastq")),
                         output: Some(output.clone()), ..Default::default() };
    let p = Pipeline::build(opts, isolated_runner(false, dir.path()));
    assert!(p.ledger.has_errors());
    let errors = p.execute().unwrap_err();
    assert!(errors.to_string().starts_with("Errors:\n"));
    assert!(!output.exists());
}


#[test]
fn test_barcode_sub_pipelines() {
    let tools = tempdir().unwrap();
    let summary = vec!["barcode01 9000 60.0".to_string(), "barcode02 5800 38.7".to_string(),
                       "barcode03 200 1.3".to_string()];
    let barcodes = select_barcodes(&summary, BARCODE_MIN_PERCENT);
    let opts = Options { ont_fastq: Some(PathBuf::from("reads.fastq")), multiplexed: true,
                         genome_size: Some("5m".to_string()),
                         output: Some(PathBuf::from("out")), ..Default::default() };
    let mut parent = Pipeline::build(opts, isolated_runner(true, tools.path()));
    assert!(parent.plan.contains(Step::QcatOntFastq));
    parent.config.state.demultiplexed_dir = Some(PathBuf::from("out/demultiplex"));

    let children = parent.barcode_pipelines(&barcodes);
    assert_eq!(children.len(), 2);
    for (child, barcode) in children.iter().zip(["barcode01", "barcode02"]) {
        assert_eq!(child.output_dir(), PathBuf::from("out").join(barcode));
        assert_eq!(child.config.opts.ont_fastq,
                   Some(PathBuf::from(format!("out/demultiplex/{}.fastq", barcode))));
        assert!(child.plan.contains(Step::OntFastqInfo));
        assert!(child.plan.contains(Step::FlyeOntFastq));
        assert!(!child.plan.contains(Step::QcatOntFastq));
    }
}


#[test]
fn test_fake_run_leaves_markers() {
    let dir = tempdir().unwrap();
    let tools = dir.path().join("tools");
    std::fs::create_dir(&tools).unwrap();
    for tool in ["makeblastdb", "blastn", "bedtools", "tectonic"] {
        make_fake_tool(&tools, tool, "echo 2.14.0");
    }
    let genome = dir.path().join("genome.fasta");
    let toxins = dir.path().join("toxins.fasta");
    make_test_file(&genome, ">chromosome\nACGTACGTACGT\n");
    make_test_file(&toxins, ">lef\nACGT\n");
    let output = dir.path().join("out");
    let opts = Options { genome: Some(genome), feature: vec![toxins],
                         output: Some(output.clone()), fake_run: true, verbosity: 0,
                         ..bookkeeping_only(dir.path()) };
    let p = Pipeline::build(opts, isolated_runner(true, &tools));
    assert!(p.ledger.errors.is_empty(), "{:?}", p.ledger.errors);
    assert_eq!(p.plan.steps(), vec![Step::MakeOutputDir, Step::BlastFeatureSets,
                                    Step::MakeReport, Step::CleanUp]);

    let report = p.execute().unwrap();
    assert_eq!(read_to_string(output.join("analysis.txt")).unwrap(),
               "make_output_dir\nblast_feature_sets\nmake_report\nclean_up\n");
    for step_dir in ["features", "report"] {
        assert!(output.join(step_dir).join(".start").is_file());
        assert!(output.join(step_dir).join(".finish").is_file());
    }
    assert!(output.join("report").join("report.yaml").is_file());
    assert!(!output.join("report").join("report.pdf").exists());
    assert!(output.join("log.txt").is_file());
    assert!(output.join("assembly.fasta").is_file());
    assert!(report.section(&[crate::ledger::FEATURE_TITLE]).unwrap().get("toxins").is_some());
}
