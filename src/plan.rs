// This file contains the plan: the ordered list of steps resolved before execution begins.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use std::collections::VecDeque;
use std::fmt;


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    MakeOutputDir,
    DownloadDatabases,
    WatchOnt,
    GuppyOntFast5,
    QcatOntFastq,
    StartBarcodeAnalysis,
    OntFastqInfo,
    LormaOntFastq,
    MiniasmOntFastq,
    Wtdbg2OntFastq,
    FlyeOntFastq,
    RaconOntAssembly,
    MedakaOntAssembly,
    NanopolishOntAssembly,
    IlluminaFastqInfo,
    PilonAssembly,
    SpadesIlluminaFastq,
    EvaluateAssembly,
    AssemblyInfo,
    BlastFeatureSets,
    CallInsertions,
    QuastGenome,
    DrawCircos,
    CallAmrMutations,
    DrawAmrMatrix,
    CallPlasmids,
    DrawFeatures,
    MakeReport,
    CleanUp,
}

impl Step {
    #[cfg(test)]
    pub const ALL: [Step; 29] = [
        Step::MakeOutputDir, Step::DownloadDatabases, Step::WatchOnt, Step::GuppyOntFast5,
        Step::QcatOntFastq, Step::StartBarcodeAnalysis, Step::OntFastqInfo, Step::LormaOntFastq,
        Step::MiniasmOntFastq, Step::Wtdbg2OntFastq, Step::FlyeOntFastq, Step::RaconOntAssembly,
        Step::MedakaOntAssembly, Step::NanopolishOntAssembly, Step::IlluminaFastqInfo,
        Step::PilonAssembly, Step::SpadesIlluminaFastq, Step::EvaluateAssembly,
        Step::AssemblyInfo, Step::BlastFeatureSets, Step::CallInsertions, Step::QuastGenome,
        Step::DrawCircos, Step::CallAmrMutations, Step::DrawAmrMatrix, Step::CallPlasmids,
        Step::DrawFeatures, Step::MakeReport, Step::CleanUp,
    ];

    pub const ASSEMBLERS: [Step; 3] = [Step::MiniasmOntFastq, Step::Wtdbg2OntFastq,
                                       Step::FlyeOntFastq];

    pub fn name(&self) -> &'static str {
        match self {
            Step::MakeOutputDir         => "make_output_dir",
            Step::DownloadDatabases     => "download_databases",
            Step::WatchOnt              => "watch_ont",
            Step::GuppyOntFast5         => "guppy_ont_fast5",
            Step::QcatOntFastq          => "qcat_ont_fastq",
            Step::StartBarcodeAnalysis  => "start_barcode_analysis",
            Step::OntFastqInfo          => "ont_fastq_info",
            Step::LormaOntFastq         => "lorma_ont_fastq",
            Step::MiniasmOntFastq       => "miniasm_ont_fastq",
            Step::Wtdbg2OntFastq        => "wtdbg2_ont_fastq",
            Step::FlyeOntFastq          => "flye_ont_fastq",
            Step::RaconOntAssembly      => "racon_ont_assembly",
            Step::MedakaOntAssembly     => "medaka_ont_assembly",
            Step::NanopolishOntAssembly => "nanopolish_ont_assembly",
            Step::IlluminaFastqInfo     => "illumina_fastq_info",
            Step::PilonAssembly         => "pilon_assembly",
            Step::SpadesIlluminaFastq   => "spades_illumina_fastq",
            Step::EvaluateAssembly      => "evaluate_assembly",
            Step::AssemblyInfo          => "assembly_info",
            Step::BlastFeatureSets      => "blast_feature_sets",
            Step::CallInsertions        => "call_insertions",
            Step::QuastGenome           => "quast_genome",
            Step::DrawCircos            => "draw_circos",
            Step::CallAmrMutations      => "call_amr_mutations",
            Step::DrawAmrMatrix         => "draw_amr_matrix",
            Step::CallPlasmids          => "call_plasmids",
            Step::DrawFeatures          => "draw_features",
            Step::MakeReport            => "make_report",
            Step::CleanUp               => "clean_up",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}


#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanEntry {
    pub step: Step,
    pub args: Vec<String>,
}

impl PlanEntry {
    pub fn new(step: Step) -> Self { PlanEntry { step, args: Vec::new() } }

    pub fn with_args(step: Step, args: Vec<String>) -> Self { PlanEntry { step, args } }
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.step)
        } else {
            write!(f, "{} {}", self.step, self.args.join(" "))
        }
    }
}


/// Built by appending during validation, then consumed from the front during execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    entries: VecDeque<PlanEntry>,
}

impl Plan {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, step: Step) { self.entries.push_back(PlanEntry::new(step)); }

    pub fn extend(&mut self, steps: &[Step]) {
        for step in steps { self.push(*step); }
    }

    pub fn prepend(&mut self, step: Step) { self.entries.push_front(PlanEntry::new(step)); }

    pub fn pop_front(&mut self) -> Option<PlanEntry> { self.entries.pop_front() }

    /// Discards whatever hasn't run yet in favour of the given entries.
    pub fn replace_remaining(&mut self, entries: Vec<PlanEntry>) {
        self.entries = entries.into();
    }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    #[cfg(test)]
    pub fn len(&self) -> usize { self.entries.len() }

    #[cfg(test)]
    pub fn contains(&self, step: Step) -> bool { self.entries.iter().any(|e| e.step == step) }

    #[cfg(test)]
    pub fn steps(&self) -> Vec<Step> { self.entries.iter().map(|e| e.step).collect() }

    #[cfg(test)]
    pub fn names(&self) -> Vec<&'static str> { self.entries.iter().map(|e| e.step.name()).collect() }

    pub fn iter(&self) -> impl Iterator<Item = &PlanEntry> { self.entries.iter() }

    pub fn numbered_lines(&self) -> Vec<String> {
        self.entries.iter().enumerate().map(|(i, e)| format!("{}) {}", i + 1, e)).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_step_names_are_unique() {
        let names: HashSet<&str> = Step::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), Step::ALL.len());
        assert_eq!(Step::FlyeOntFastq.to_string(), "flye_ont_fastq");
    }

    #[test]
    fn test_plan_is_fifo() {
        let mut plan = Plan::new();
        plan.extend(&[Step::OntFastqInfo, Step::FlyeOntFastq]);
        plan.prepend(Step::MakeOutputDir);
        plan.push(Step::CleanUp);
        assert_eq!(plan.names(), vec!["make_output_dir", "ont_fastq_info", "flye_ont_fastq",
                                      "clean_up"]);
        assert_eq!(plan.pop_front().unwrap().step, Step::MakeOutputDir);
        assert_eq!(plan.len(), 3);
        assert!(plan.contains(Step::FlyeOntFastq));
        assert!(!plan.contains(Step::MakeOutputDir));
    }

    #[test]
    fn test_replace_remaining() {
        let mut plan = Plan::new();
        plan.extend(&[Step::QcatOntFastq, Step::OntFastqInfo, Step::FlyeOntFastq, Step::CleanUp]);
        plan.pop_front();
        let barcodes = vec!["barcode01".to_string(), "barcode02".to_string()];
        plan.replace_remaining(vec![PlanEntry::with_args(Step::StartBarcodeAnalysis, barcodes),
                                    PlanEntry::new(Step::CleanUp)]);
        assert_eq!(plan.steps(), vec![Step::StartBarcodeAnalysis, Step::CleanUp]);
        assert_eq!(plan.numbered_lines(),
                   vec!["1) start_barcode_analysis barcode01 barcode02", "2) clean_up"]);
    }
}
