// This file contains the pipeline: plan building, plan execution and the barcode sub-pipeline
// spawner.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use std::path::{Path, PathBuf};

use crate::assembly;
use crate::config::Config;
use crate::features;
use crate::ledger::{Ledger, Report, ValidationErrors, SUMMARY_TITLE};
use crate::log::Logger;
use crate::misc::{contig_sizes, create_dir, quit_with_error, try_load_fasta};
use crate::options::Options;
use crate::plan::{Plan, PlanEntry, Step};
use crate::plasmids;
use crate::polish;
use crate::predicates;
use crate::reads;
use crate::reference;
use crate::report;
use crate::runner::{touch, Runner};


/// Barcodes holding less than this percentage of the demultiplexed reads are ignored.
pub const BARCODE_MIN_PERCENT: f64 = 2.5;


/// One pipeline instance: its configuration, plan, ledger and report, plus the logger and
/// command runner that every predicate and step goes through. A barcode sub-pipeline is a
/// separate instance that shares nothing mutable with its parent.
pub struct Pipeline {
    pub config: Config,
    pub plan: Plan,
    pub ledger: Ledger,
    pub report: Report,
    pub log: Logger,
    pub runner: Runner,
}

impl Pipeline {
    /// Builds the plan for the given options by running every validation predicate.
    pub fn build(opts: Options, runner: Runner) -> Pipeline {
        Pipeline::build_from_config(Config::new(opts), runner)
    }

    pub fn build_from_config(config: Config, runner: Runner) -> Pipeline {
        let mut pipeline = Pipeline::unvalidated(config, runner);
        predicates::validate_options(&mut pipeline);
        pipeline
    }

    /// A pipeline with an empty plan and ledger, before any predicate has run.
    pub fn unvalidated(config: Config, runner: Runner) -> Pipeline {
        let log = Logger::new(config.opts.verbosity);
        let report = Report::new(&config.opts.name);
        Pipeline { config, plan: Plan::new(), ledger: Ledger::default(), report, log, runner }
    }

    /// Runs the plan to completion and hands back the finished report. Refuses to start if
    /// validation produced any errors.
    pub fn execute(mut self) -> Result<Report, ValidationErrors> {
        if self.ledger.has_errors() {
            return Err(ValidationErrors(self.ledger.errors.clone()));
        }
        self.run();
        Ok(self.report)
    }

    fn run(&mut self) {
        self.log.main_process("Starting analysis");
        for line in self.plan.numbered_lines() {
            self.log.sub_process(&line);
        }
        while let Some(entry) = self.plan.pop_front() {
            self.dispatch(&entry);
        }
    }

    fn dispatch(&mut self, entry: &PlanEntry) {
        match entry.step {
            Step::MakeOutputDir         => report::make_output_dir(self),
            Step::DownloadDatabases     => report::download_databases(self),
            Step::WatchOnt              => reads::watch_ont(self),
            Step::GuppyOntFast5         => reads::guppy_ont_fast5(self),
            Step::QcatOntFastq          => reads::qcat_ont_fastq(self),
            Step::StartBarcodeAnalysis  => self.start_barcode_analysis(&entry.args),
            Step::OntFastqInfo          => reads::ont_fastq_info(self),
            Step::LormaOntFastq         => reads::lorma_ont_fastq(self),
            Step::MiniasmOntFastq       => assembly::miniasm_ont_fastq(self),
            Step::Wtdbg2OntFastq        => assembly::wtdbg2_ont_fastq(self),
            Step::FlyeOntFastq          => assembly::flye_ont_fastq(self),
            Step::RaconOntAssembly      => polish::racon_ont_assembly(self),
            Step::MedakaOntAssembly     => polish::medaka_ont_assembly(self),
            Step::NanopolishOntAssembly => polish::nanopolish_ont_assembly(self),
            Step::IlluminaFastqInfo     => reads::illumina_fastq_info(self),
            Step::PilonAssembly         => polish::pilon_assembly(self),
            Step::SpadesIlluminaFastq   => assembly::spades_illumina_fastq(self),
            Step::EvaluateAssembly      => assembly::evaluate_assembly(self),
            Step::AssemblyInfo          => assembly::assembly_info(self),
            Step::BlastFeatureSets      => features::blast_feature_sets(self),
            Step::CallInsertions        => reference::call_insertions(self),
            Step::QuastGenome           => reference::quast_genome(self),
            Step::DrawCircos            => reference::draw_circos(self),
            Step::CallAmrMutations      => reference::call_amr_mutations(self),
            Step::DrawAmrMatrix         => features::draw_amr_matrix(self),
            Step::CallPlasmids          => plasmids::call_plasmids(self),
            Step::DrawFeatures          => features::draw_features(self),
            Step::MakeReport            => report::make_report(self),
            Step::CleanUp               => report::clean_up(self),
        }
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.ledger.error(text);
    }

    /// Records a warning on the console, in the ledger and (if a notes path is given) in the
    /// report.
    pub fn add_warning(&mut self, text: &str, notes: &[&str]) {
        self.log.warning(text);
        self.ledger.warning(text);
        if !notes.is_empty() {
            self.report.add_note(notes, text);
        }
    }

    /// Checks that a tool is on the PATH, adding the given error if it isn't.
    pub fn require_tool(&mut self, tool: &str, error: &str) -> bool {
        if self.runner.has_tool(tool) {
            return true;
        }
        self.ledger.error(error);
        false
    }

    /// Checks for a tool and, if present, records the version parsed from one line of its
    /// version command's output.
    pub fn require_versioned_tool(&mut self, tool: &str, key: &str, command: &str, line: usize,
                                  error: &str) {
        if self.require_tool(tool, error) {
            self.record_version(key, command, line);
        }
    }

    pub fn record_version(&mut self, key: &str, command: &str, line: usize) {
        match self.runner.tool_version(&self.log, command, line) {
            Ok(Some(version)) => { self.config.derived.versions.insert(key.to_string(), version); }
            Ok(None) => {}
            Err(error) => self.ledger.error(error),
        }
    }

    pub fn run_command(&self, command: &str) -> Vec<String> {
        self.runner.run(&self.log, command)
    }

    pub fn require_output(&self, filename: &Path, what: &str) {
        self.runner.require_output(&self.log, filename, what, "is missing", "is empty");
    }

    pub fn output_dir(&self) -> PathBuf {
        self.config.output_dir()
    }

    pub fn threads(&self) -> usize {
        self.config.opts.threads.max(1)
    }

    /// Creates a step's working directory and its start marker.
    pub fn start_step(&self, dir_name: &str) -> PathBuf {
        let dir = self.output_dir().join(dir_name);
        create_dir(&dir);
        touch(&dir.join(".start"));
        dir
    }

    pub fn finish_step(&self, dir: &Path) {
        touch(&dir.join(".finish"));
    }

    /// The current genome FASTA, which every post-assembly step needs.
    pub fn genome_fasta(&self) -> PathBuf {
        match &self.config.state.genome_fasta {
            Some(fasta) => fasta.clone(),
            None => quit_with_error("no genome FASTA is available"),
        }
    }

    pub fn ont_fastq(&self) -> PathBuf {
        match &self.config.state.ont_fastq {
            Some(fastq) => fastq.clone(),
            None => quit_with_error("no ONT FASTQ is available"),
        }
    }

    /// Points the pipeline at a new genome FASTA and refreshes the contig sizes. A fake run's
    /// never-created FASTA leaves the sizes empty.
    pub fn set_genome(&mut self, fasta: &Path) {
        self.config.state.genome_fasta = Some(fasta.to_path_buf());
        if self.runner.is_fake() && !fasta.is_file() {
            self.config.state.genome.clear();
            return;
        }
        match try_load_fasta(fasta) {
            Ok(seqs) => self.config.state.genome = contig_sizes(&seqs),
            Err(e) => {
                self.log.error(&e);
                quit_with_error(&e);
            }
        }
    }

    pub fn clean_later(&mut self, filename: &Path) {
        self.config.state.files_to_clean.push(filename.to_path_buf());
    }

    /// Builds one child pipeline per barcode. Each child is planned from scratch on its own
    /// configuration.
    pub fn barcode_pipelines(&self, barcodes: &[String]) -> Vec<Pipeline> {
        barcodes.iter()
            .map(|b| Pipeline::build_from_config(self.config.for_barcode(b), self.runner.clone()))
            .collect()
    }

    /// Plans and runs each barcode's sub-pipeline in turn. A child with configuration errors
    /// ends the whole run, as does any failure while a child executes.
    fn start_barcode_analysis(&mut self, barcodes: &[String]) {
        self.log.main_process("Starting analysis of individual barcodes");
        self.report.root.path_mut(&[SUMMARY_TITLE])
            .set("Barcodes", crate::ledger::Content::Notes(barcodes.to_vec()));
        for child in self.barcode_pipelines(barcodes) {
            let child_dir = child.output_dir();
            if child.plan.is_empty() {
                self.log.sub_process(&format!("Nothing to do for {}", child_dir.display()));
                continue;
            }
            self.log.sub_process(&format!("Analysing {}", child_dir.display()));
            if let Err(errors) = child.execute() {
                let message = format!("barcode analysis in {} failed validation\n{}",
                                      child_dir.display(), errors);
                self.log.error(&message);
                quit_with_error(&message);
            }
        }
    }
}


/// Picks the barcodes from a qcat summary (barcode, read count, percentage) that hold at least
/// the given percentage of reads. Lines that don't parse are ignored.
pub fn select_barcodes(summary_lines: &[String], min_percent: f64) -> Vec<String> {
    let mut barcodes = Vec::new();
    for line in summary_lines {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }
        let Ok(percent) = parts[2].trim_end_matches('%').parse::<f64>() else { continue; };
        if percent >= min_percent {
            barcodes.push(parts[0].to_string());
        }
    }
    barcodes
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_barcodes() {
        let summary = vec!["barcode01 9000 45.0".to_string(),
                           "barcode02 8000 40.0%".to_string(),
                           "barcode03 500 2.5".to_string(),
                           "barcode04 400 2.4".to_string(),
                           "none 100 0.5".to_string(),
                           "Barcode Reads Percent".to_string(),
                           "".to_string()];
        assert_eq!(select_barcodes(&summary, BARCODE_MIN_PERCENT),
                   vec!["barcode01", "barcode02", "barcode03"]);
        assert!(select_barcodes(&[], BARCODE_MIN_PERCENT).is_empty());
    }

    #[test]
    fn test_execute_refuses_with_errors() {
        let mut pipeline = Pipeline::unvalidated(Config::new(Options::default()),
                                                 Runner::new(true));
        pipeline.plan.push(Step::CleanUp);
        pipeline.error("something is wrong");
        let errors = pipeline.execute().unwrap_err();
        assert_eq!(errors.0, vec!["something is wrong".to_string()]);
    }

    #[test]
    fn test_add_warning() {
        let mut pipeline = Pipeline::unvalidated(Config::new(Options::default()),
                                                 Runner::new(true));
        let notes = crate::ledger::ASSEMBLY_NOTES;
        pipeline.add_warning("low coverage", &notes);
        pipeline.add_warning("console only", &[]);
        assert_eq!(pipeline.ledger.warnings, vec!["low coverage", "console only"]);
        assert_eq!(pipeline.report.notes(&notes), vec!["low coverage"]);
    }
}
