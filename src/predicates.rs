// This file contains the validation predicates. Run in a fixed order, they check the options and
// tools, register the plan's steps and set the capability flags that later predicates rely on.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use regex::Regex;
use std::fs;
use std::path::Path;

use crate::config::{parse_colour, Config, FeatureSet, MutationRegion};
use crate::log::COMMAND_VERBOSITY;
use crate::misc::{contig_sizes, load_file_lines, try_load_fasta};
use crate::options::{Assembler, AMR_DEFAULT_COLOUR, INC_DEFAULT_COLOUR};
use crate::pipeline::Pipeline;
use crate::plan::{PlanEntry, Step};
use crate::mapping::SHORT_READ_MAX_LENGTH;
use crate::reads::mean_read_length;


// Colours for --feature sets, used in turn.
const FEATURE_PALETTE: [&str; 6] = ["#E41A1C", "#4DAF4A", "#984EA3", "#FF7F00", "#A65628",
                                    "#F781BF"];

const ILLUMINA_LENGTH_SAMPLE: usize = 10_000;


/// A condition that switches a predicate off entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Guard {
    UnlessOnlyBasecall,
    UnlessGivenGenome,
    UnlessNoAssembly,
}

impl Guard {
    pub fn blocks(&self, config: &Config) -> bool {
        match self {
            Guard::UnlessOnlyBasecall => config.opts.only_basecall,
            Guard::UnlessGivenGenome  => config.opts.genome.is_some(),
            Guard::UnlessNoAssembly   => config.opts.no_assembly,
        }
    }
}


pub struct Predicate {
    pub name: &'static str,
    pub guards: &'static [Guard],
    check: fn(&mut Pipeline),
}

impl Predicate {
    pub fn apply(&self, pipeline: &mut Pipeline) {
        if self.guards.iter().any(|g| g.blocks(&pipeline.config)) {
            return;
        }
        (self.check)(pipeline);
    }
}


const ASSEMBLER_GUARDS: &[Guard] = &[Guard::UnlessOnlyBasecall, Guard::UnlessGivenGenome,
                                     Guard::UnlessNoAssembly];
const POLISHING_GUARDS: &[Guard] = &[Guard::UnlessOnlyBasecall, Guard::UnlessNoAssembly];
const ANALYSIS_GUARDS: &[Guard] = &[Guard::UnlessOnlyBasecall];


/// The predicates in the order they run. The order is the pipeline's dependency graph: a
/// predicate may only read capability flags set by those above it.
pub static PREDICATES: [Predicate; 27] = [
    Predicate { name: "ont_watch",         guards: &[],              check: validate_ont_watch },
    Predicate { name: "ont_fast5",         guards: &[],              check: validate_ont_fast5 },
    Predicate { name: "ont_fastq",         guards: &[],              check: validate_ont_fastq },
    Predicate { name: "guppy",             guards: &[],              check: validate_guppy },
    Predicate { name: "qcat",              guards: &[],              check: validate_qcat },
    Predicate { name: "ont_fastq_info",    guards: &[],              check: validate_ont_fastq_info },
    Predicate { name: "lorma",             guards: &[],              check: validate_lorma },
    Predicate { name: "genome_fasta",      guards: &[],              check: validate_genome_fasta },
    Predicate { name: "miniasm",           guards: ASSEMBLER_GUARDS, check: validate_miniasm },
    Predicate { name: "wtdbg2",            guards: ASSEMBLER_GUARDS, check: validate_wtdbg2 },
    Predicate { name: "flye",              guards: ASSEMBLER_GUARDS, check: validate_flye },
    Predicate { name: "racon",             guards: POLISHING_GUARDS, check: validate_racon },
    Predicate { name: "medaka",            guards: POLISHING_GUARDS, check: validate_medaka },
    Predicate { name: "nanopolish",        guards: POLISHING_GUARDS, check: validate_nanopolish },
    Predicate { name: "illumina_fastq",    guards: ANALYSIS_GUARDS,  check: validate_illumina_fastq },
    Predicate { name: "pilon",             guards: POLISHING_GUARDS, check: validate_pilon },
    Predicate { name: "spades",            guards: POLISHING_GUARDS, check: validate_spades },
    Predicate { name: "evaluate_assembly", guards: POLISHING_GUARDS, check: validate_evaluate_assembly },
    Predicate { name: "assembly_info",     guards: ANALYSIS_GUARDS,  check: validate_assembly_info },
    Predicate { name: "features",          guards: ANALYSIS_GUARDS,  check: validate_features },
    Predicate { name: "blast",             guards: ANALYSIS_GUARDS,  check: validate_blast },
    Predicate { name: "reference",         guards: ANALYSIS_GUARDS,  check: validate_reference },
    Predicate { name: "mutations",         guards: ANALYSIS_GUARDS,  check: validate_mutations },
    Predicate { name: "amr_matrix",        guards: ANALYSIS_GUARDS,  check: validate_amr_matrix },
    Predicate { name: "plasmids",          guards: ANALYSIS_GUARDS,  check: validate_plasmids },
    Predicate { name: "draw_features",     guards: ANALYSIS_GUARDS,  check: validate_draw_features },
    Predicate { name: "make_report",       guards: &[],              check: validate_make_report },
];


/// Runs every predicate, then adds the bookkeeping steps. All problems are collected in the
/// ledger rather than stopping at the first one.
pub fn validate_options(p: &mut Pipeline) {
    for predicate in PREDICATES.iter() {
        predicate.apply(p);
    }
    if p.plan.is_empty() {
        if p.config.is_barcode {
            return;
        }
        p.error("Nothing to do!");
    }
    p.plan.push(Step::CleanUp);
    validate_output_dir(p);
    validate_download(p);
}


fn validate_ont_watch(p: &mut Pipeline) {
    let Some(watch_dir) = p.config.opts.ont_watch.clone() else { return; };
    if p.config.is_barcode {
        return;
    }
    p.log.main_process("Validating ONT watch dir and utilities");
    let opts = &p.config.opts;
    let mut errors = Vec::new();
    if opts.ont_fast5.is_some() {
        errors.push("--ont-watch and --ont-fast5 are mutually exclusive.");
    }
    if opts.ont_fastq.is_some() {
        errors.push("--ont-watch and --ont-fastq are mutually exclusive.");
    }
    if opts.genome.is_some() {
        errors.push("--ont-watch and --genome are mutually exclusive.");
    }
    if !watch_dir.is_dir() {
        errors.push("ONT watch directory does not exist.");
    }
    if opts.ont_watch_min_reads < 0 {
        errors.push("ONT watch min reads must be > 0.");
    }
    for error in errors {
        p.error(error);
    }
    p.config.derived.caps.mark_ont_fastq();
    p.plan.push(Step::WatchOnt);
}


fn validate_ont_fast5(p: &mut Pipeline) {
    let Some(fast5_dir) = p.config.opts.ont_fast5.clone() else { return; };
    if p.config.is_barcode {
        return;
    }
    p.log.main_process("Validating ONT fast5 files and utilities");
    if !fast5_dir.is_dir() {
        p.error(format!("Input FAST5 directory {} cannot be found", fast5_dir.display()));
        return;
    }
    if !contains_fast5(&fast5_dir) {
        p.error(format!("Could not find FAST5 files in {} or subdirectories",
                        fast5_dir.display()));
    }
}


fn contains_fast5(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else { return false; };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if contains_fast5(&path) {
                return true;
            }
        } else if path.to_string_lossy().ends_with("fast5") {
            return true;
        }
    }
    false
}


fn validate_ont_fastq(p: &mut Pipeline) {
    let Some(fastq) = p.config.opts.ont_fastq.clone() else { return; };
    p.log.main_process("Validating ONT FASTQ");
    if !p.runner.is_fake() && !fastq.is_file() {
        p.error(format!("Input ONT FASTQ file {} cannot be found", fastq.display()));
    }
    p.config.derived.caps.mark_ont_fastq();
}


fn validate_guppy(p: &mut Pipeline) {
    let opts = &p.config.opts;
    if opts.ont_fast5.is_none() && opts.ont_watch.is_none() {
        return;
    }
    if opts.ont_fastq.is_some() {
        return;
    }
    let from_fast5 = opts.ont_fast5.is_some();
    p.log.main_process("Validating Guppy basecalling utilities");
    p.require_versioned_tool("guppy_basecaller", "guppy", "guppy_basecaller --version", 0,
                             "guppy_basecaller is not on the PATH.");
    for utility in ["guppy_aligner", "guppy_barcoder"] {
        p.require_tool(utility, &format!("{} is not on the PATH.", utility));
    }
    p.config.derived.caps.mark_ont_fastq();
    if from_fast5 {
        p.plan.push(Step::GuppyOntFast5);
    }
}


fn validate_qcat(p: &mut Pipeline) {
    if !p.config.opts.multiplexed || !p.config.derived.caps.will_have_ont_fastq() {
        return;
    }
    p.log.main_process("Validating qcat demultiplexer");
    p.require_versioned_tool("qcat", "qcat", "qcat --version", 0, "qcat is not on the PATH.");
    p.plan.push(Step::QcatOntFastq);
}


fn validate_ont_fastq_info(p: &mut Pipeline) {
    if p.config.derived.caps.will_have_ont_fastq() {
        p.plan.push(Step::OntFastqInfo);
    }
}


fn validate_lorma(p: &mut Pipeline) {
    if !p.config.opts.error_correct {
        return;
    }
    if p.config.opts.ont_fast5.is_none() && p.config.opts.ont_fastq.is_none() {
        p.error("--error-correct requires --ont-fast5 and/or --ont-fastq");
        return;
    }
    p.log.main_process("Validating lorma error corrector");
    p.require_tool("lordec-correct",
                   "LoRMA is not on the PATH (required for ONT error-correction)");
    p.plan.push(Step::LormaOntFastq);
}


fn validate_genome_fasta(p: &mut Pipeline) {
    let Some(genome) = p.config.opts.genome.clone() else { return; };
    p.log.main_process("Validating genome FASTA");
    if !p.runner.file_ok(&genome) {
        p.error(format!("Input genome FASTA {} cannot be found", genome.display()));
    } else if genome.is_file() {
        match try_load_fasta(&genome) {
            Ok(seqs) => p.config.state.genome = contig_sizes(&seqs),
            Err(e) => p.error(format!("Input genome FASTA {}: {}", genome.display(), e)),
        }
    }
    p.config.derived.caps.mark_genome_fasta();
}


fn validate_miniasm(p: &mut Pipeline) {
    if p.config.opts.assembler != Assembler::Miniasm {
        return;
    }
    if p.config.opts.ont_fast5.is_none() && p.config.opts.ont_fastq.is_none() {
        p.error("Miniasm assembly requires --ont-fast5 and/or --ont-fastq");
    }
    p.log.main_process("Validating miniasm utilities");
    for utility in ["minimap2", "miniasm"] {
        p.require_tool(utility,
                       &format!("{} is not on the PATH (required by --assembler miniasm)", utility));
    }
    mark_assembly(p);
    p.plan.push(Step::MiniasmOntFastq);
    p.config.derived.caps.force_racon();
}


fn validate_wtdbg2(p: &mut Pipeline) {
    if p.config.opts.assembler != Assembler::Wtdbg2 || !p.config.derived.caps.will_have_ont_fastq() {
        return;
    }
    p.log.main_process("Validating wtdbg2 utilities");
    check_genome_size(p, "wtdbg2");
    for utility in ["pgzf", "kbm2", "wtdbg2", "wtpoa-cns", "wtdbg-cns"] {
        p.require_tool(utility,
                       &format!("{} is not on the PATH (required by --assembler wtdbg2)", utility));
    }
    mark_assembly(p);
    p.plan.push(Step::Wtdbg2OntFastq);
}


fn validate_flye(p: &mut Pipeline) {
    if p.config.opts.assembler != Assembler::Flye || !p.config.derived.caps.will_have_ont_fastq() {
        return;
    }
    p.log.main_process("Validating flye utilities");
    check_genome_size(p, "Flye");
    p.require_versioned_tool("flye", "flye", "flye --version", 0,
                             "flye is not on the PATH (required by --assembler flye).");
    mark_assembly(p);
    p.plan.push(Step::FlyeOntFastq);
}


fn check_genome_size(p: &mut Pipeline, assembler_name: &str) {
    match p.config.opts.genome_size.clone() {
        None => p.error(format!("{} requires --genome-size", assembler_name)),
        Some(size) if !is_valid_genome_size(&size) => {
            p.error(format!("--genome-size needs to be a floating point number in Mega or \
                             kilobases, got {}", size));
        }
        Some(_) => {}
    }
}


pub fn is_valid_genome_size(size: &str) -> bool {
    Regex::new(r"^[0-9]+(\.[0-9]+)?[mkMK]$").is_ok_and(|re| re.is_match(size))
}


fn mark_assembly(p: &mut Pipeline) {
    p.config.derived.caps.mark_ont_assembly();
    p.config.derived.caps.mark_genome_fasta();
}


fn validate_racon(p: &mut Pipeline) {
    if !p.config.opts.racon && !p.config.derived.caps.racon_forced() {
        return;
    }
    if p.config.opts.ont_fast5.is_none() && p.config.opts.ont_fastq.is_none() {
        p.error("Assembly requires --ont-fast5 and/or --ont-fastq");
    }
    p.log.main_process("Validating racon");
    let error = format!("racon is not on the PATH (required by --assembler {})",
                        p.config.opts.assembler);
    p.require_versioned_tool("racon", "racon", "racon --version", 0, &error);
    p.plan.push(Step::RaconOntAssembly);
}


fn validate_medaka(p: &mut Pipeline) {
    let caps = p.config.derived.caps;
    if p.config.opts.no_medaka || !caps.will_have_genome_fasta() || !caps.will_have_ont_fastq() {
        return;
    }
    p.log.main_process("Validating medaka");
    p.require_versioned_tool("medaka_consensus", "medaka", "medaka --version", 0,
                             "medaka_consensus is not on the PATH (required by --medaka)");
    p.plan.push(Step::MedakaOntAssembly);
    p.config.derived.caps.mark_ont_assembly();
}


fn validate_nanopolish(p: &mut Pipeline) {
    if !p.config.opts.nanopolish {
        return;
    }
    p.log.main_process("Validating Nanopolish");
    if p.config.opts.ont_fast5.is_none() {
        p.error("--nanopolish requires --ont-fast5");
    }
    if !p.config.derived.caps.will_have_genome_fasta() {
        p.error("--nanopolish requires that a genome be assembled or supplied");
    }
    p.require_tool("nanopolish", "nanopolish is not on the PATH (required by --nanopolish)");
    p.plan.push(Step::NanopolishOntAssembly);
}


fn validate_illumina_fastq(p: &mut Pipeline) {
    if p.config.opts.illumina_fastq.is_empty() {
        return;
    }
    p.log.main_process("Validating Illumina data");
    if p.config.opts.illumina_fastq.len() > 2 {
        p.error("--illumina-fastq takes one (single-end) or two (paired-end) files");
    }
    for fastq in p.config.opts.illumina_fastq.clone() {
        if !p.runner.file_ok(&fastq) {
            p.error(format!("Illumina FASTQ file {} cannot be found or is size 0",
                            fastq.display()));
        }
    }
    if let Some(first) = p.config.opts.illumina_fastq.first() {
        if first.is_file() {
            p.config.derived.illumina_mean_length = mean_read_length(first, ILLUMINA_LENGTH_SAMPLE);
        }
    }
    p.plan.push(Step::IlluminaFastqInfo);
}


fn validate_pilon(p: &mut Pipeline) {
    if !p.config.derived.caps.will_have_genome_fasta() || p.config.opts.illumina_fastq.is_empty() {
        return;
    }
    for utility in ["minimap2", "pilon"] {
        p.require_versioned_tool(utility, utility, &format!("{} --version", utility), 0,
                                 &format!("{} is not on the PATH (required by --illumina-fastq).",
                                          utility));
    }
    if p.config.derived.illumina_mean_length.is_some_and(|l| l <= SHORT_READ_MAX_LENGTH) {
        p.require_tool("bwa", "bwa is not on the PATH (required for short Illumina reads).");
    }
    p.plan.push(Step::PilonAssembly);
}


fn validate_spades(p: &mut Pipeline) {
    if p.config.opts.illumina_fastq.is_empty() || p.config.derived.caps.will_have_genome_fasta() {
        return;
    }
    p.require_versioned_tool("spades.py", "spades", "spades.py --version", 0,
                             "spades.py is not on the PATH (required by --illumina-fastq)");
    p.plan.push(Step::SpadesIlluminaFastq);
    p.config.derived.caps.mark_genome_fasta();
}


fn validate_evaluate_assembly(p: &mut Pipeline) {
    if p.config.derived.caps.will_have_ont_assembly() {
        p.plan.push(Step::EvaluateAssembly);
    }
}


fn validate_assembly_info(p: &mut Pipeline) {
    if !p.config.opts.has_raw_reads() || !p.config.derived.caps.will_have_genome_fasta() {
        return;
    }
    p.require_tool("samtools", "samtools is not on the PATH");
    p.plan.push(Step::AssemblyInfo);
}


fn validate_features(p: &mut Pipeline) {
    let opts = p.config.opts.clone();
    let mut feature_sets = Vec::new();
    for (i, fasta) in opts.feature.iter().enumerate() {
        let colour = parse_colour(FEATURE_PALETTE[i % FEATURE_PALETTE.len()]).unwrap_or([0, 0, 0]);
        feature_sets.push(FeatureSet::new(fasta, colour));
    }
    if !opts.no_amr {
        let colour = parse_colour(AMR_DEFAULT_COLOUR).unwrap_or([0, 0, 0]);
        feature_sets.push(FeatureSet::new(&opts.amr_database(), colour));
        let gene_drug_tsv = opts.gene_drug_tsv();
        if gene_drug_tsv.is_file() {
            p.config.derived.gene_drug = load_gene_drug(&gene_drug_tsv);
        }
    }
    if !opts.no_inc {
        let colour = parse_colour(INC_DEFAULT_COLOUR).unwrap_or([0, 0, 0]);
        feature_sets.push(FeatureSet::new(&opts.inc_database(), colour));
    }
    if feature_sets.is_empty() || !p.config.derived.caps.will_have_genome_fasta() {
        return;
    }
    p.log.main_process("Validating feature sets");
    for feature_set in &feature_sets {
        if p.runner.file_ok(&feature_set.fasta) {
            continue;
        }
        if opts.is_bundled_database(&feature_set.fasta) {
            if !opts.download {
                p.error(format!("Can't find feature database {} or is size 0.  Try --download?",
                                feature_set.fasta.display()));
            }
        } else {
            p.error(format!("Can't find feature database {}", feature_set.fasta.display()));
        }
    }
    p.config.derived.feature_sets = feature_sets;
}


/// Loads the two-column gene-to-drug table that links AMR hits to drug classes.
pub fn load_gene_drug(filename: &Path) -> Vec<(String, String)> {
    load_file_lines(filename).iter()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let gene = parts.next()?.trim();
            let drug = parts.next()?.trim();
            if gene.is_empty() || drug.is_empty() { None }
            else { Some((gene.to_string(), drug.to_string())) }
        })
        .collect()
}


fn validate_blast(p: &mut Pipeline) {
    if p.config.derived.feature_sets.is_empty() || !p.config.derived.caps.will_have_genome_fasta() {
        return;
    }
    p.log.main_process("Validating blast utilities");
    for utility in ["makeblastdb", "blastn", "bedtools"] {
        p.require_versioned_tool(utility, utility, &format!("{} -version", utility), 0,
                                 &format!("{} isn't on the PATH.", utility));
    }
    p.plan.push(Step::BlastFeatureSets);
}


fn validate_reference(p: &mut Pipeline) {
    let opts = p.config.opts.clone();
    if opts.organism.is_none() && opts.reference_genome.is_none() {
        return;
    }
    p.log.main_process("Validating reference genome and utilities");
    if opts.organism.is_some() && opts.reference_genome.is_some() {
        p.error("--organism and --reference-genome are mutually exclusive");
        return;
    }
    let mut reference_fasta = opts.reference_genome.clone();
    if let Some(organism) = &opts.organism {
        let reference_dir = opts.reference_dir();
        if !reference_dir.is_dir() {
            p.error(format!("Can't find reference directory {}", reference_dir.display()));
        } else {
            let organism_dir = reference_dir.join(organism);
            if !organism_dir.is_dir() {
                p.error(format!("Can't find organism directory {}", organism_dir.display()));
            } else {
                reference_fasta = Some(organism_dir.join("genome.fasta"));
                p.config.derived.organism_dir = Some(organism_dir);
            }
        }
    }
    if p.config.derived.caps.will_have_genome_fasta() {
        for utility in ["nucmer", "mummer"] {
            p.require_tool(utility, &format!("{} is not on the PATH.", utility));
        }
        p.require_versioned_tool("dnadiff", "dnadiff", "dnadiff -version 2>&1", 1,
                                 "dnadiff is not on the PATH.");
        p.require_versioned_tool("quast.py", "quast", "quast.py --version", 0,
                                 "quast.py is not on the PATH.");
        p.require_versioned_tool("circos", "circos", "circos --version", 0,
                                 "circos is not on the PATH.");
        p.plan.extend(&[Step::CallInsertions, Step::QuastGenome, Step::DrawCircos]);
    }
    let Some(reference_fasta) = reference_fasta else { return; };
    if !p.runner.file_ok(&reference_fasta) {
        p.error(format!("Reference FASTA {} can't be found or is size 0.",
                        reference_fasta.display()));
    } else if reference_fasta.is_file() {
        match try_load_fasta(&reference_fasta) {
            Ok(seqs) => p.config.derived.reference_contigs = contig_sizes(&seqs),
            Err(e) => p.error(format!("Reference FASTA {}: {}", reference_fasta.display(), e)),
        }
    }
    p.config.derived.reference_fasta = Some(reference_fasta);
}


fn validate_mutations(p: &mut Pipeline) {
    let opts = p.config.opts.clone();
    if opts.organism.is_none() && opts.mutation_regions.is_none() {
        return;
    }
    if opts.organism.is_some() && opts.mutation_regions.is_some() {
        p.error("--organism and --mutation-regions are mutually exclusive");
    }
    if opts.mutation_regions.is_some() && opts.reference_genome.is_none() {
        p.error("--mutation-regions requires --reference-genome");
    }
    p.log.main_process("Validating mapping and variant utilities");
    let bed = if opts.organism.is_some() {
        match &p.config.derived.organism_dir {
            Some(dir) => dir.join("mutation_regions.bed"),
            None => return,
        }
    } else {
        match &opts.mutation_regions {
            Some(bed) => bed.clone(),
            None => return,
        }
    };
    if !p.runner.file_ok(&bed) {
        p.error(format!("Mutation region BED {} can't be found or is size 0.", bed.display()));
    } else if bed.is_file() {
        let regions = load_mutation_regions(p, &bed);
        p.config.derived.mutation_regions = regions;
    }
    p.config.derived.mutation_region_bed = Some(bed);

    let has_reads = opts.ont_fast5.is_some() || opts.ont_fastq.is_some() ||
        !opts.illumina_fastq.is_empty();
    if !has_reads && !p.config.derived.caps.will_have_genome_fasta() {
        p.error("Can't call mutations without a FAST5 or FASTQ dataset or assembly.");
    }
    if has_reads {
        p.plan.push(Step::CallAmrMutations);
    }
    for utility in ["minimap2", "samtools", "bcftools"] {
        p.require_versioned_tool(utility, utility, &format!("{} --version", utility), 0,
                                 &format!("{} is not on the PATH (required for AMR mutations)",
                                          utility));
    }
}


/// Parses a mutation-region BED (with a header line), adding an error for every bad row and
/// every region that falls outside the reference.
fn load_mutation_regions(p: &mut Pipeline, bed: &Path) -> Vec<MutationRegion> {
    let mut regions = Vec::new();
    for line in load_file_lines(bed).iter().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        match MutationRegion::from_line(line) {
            Ok(region) => regions.push(region),
            Err(e) => p.error(e),
        }
    }
    if regions.is_empty() {
        p.error("No rows in mutation regions file.");
    }
    if p.config.derived.reference_contigs.is_empty() {
        return regions;
    }
    for region in &regions {
        let description = region.to_line().replace('\t', " ");
        let length = p.config.derived.reference_contigs.iter()
            .find(|(name, _)| *name == region.contig).map(|(_, length)| *length as i64);
        let Some(length) = length else {
            p.error(format!("Mutation region {} not found in reference genome.", description));
            continue;
        };
        if region.start <= 0 || region.stop <= 0 {
            p.error(format!("Mutation region {} starts before the reference sequence.",
                            description));
        }
        if region.start > length || region.stop > length {
            p.error(format!("Mutation region {} ends after the reference sequence.",
                            description));
        }
    }
    regions
}


fn validate_amr_matrix(p: &mut Pipeline) {
    if p.config.opts.no_amr || !p.config.derived.caps.will_have_genome_fasta() {
        return;
    }
    p.plan.push(Step::DrawAmrMatrix);
}


fn validate_plasmids(p: &mut Pipeline) {
    if !p.config.opts.plasmids {
        return;
    }
    p.log.main_process("Validating plasmid database and utilities");
    p.require_versioned_tool("minimap2", "minimap2", "minimap2 --version", 0,
                             "minimap2 is not on the PATH.");
    for utility in ["Rscript", "R"] {
        p.require_versioned_tool(utility, utility, &format!("{} --version 2>&1", utility), 0,
                                 &format!("{} is not on the PATH.", utility));
    }
    let database = p.config.opts.plasmid_database();
    if !p.runner.file_ok(&database) {
        p.error(format!("Can't find plasmid database {} or is size 0.  Try --download?",
                        database.display()));
    }
    if !p.config.derived.caps.will_have_genome_fasta() {
        p.error("Can't call plasmids without a genome or an assembly");
    }
    p.plan.push(Step::CallPlasmids);
}


fn validate_draw_features(p: &mut Pipeline) {
    if p.config.opts.no_drawing || !p.config.derived.caps.will_have_genome_fasta() {
        return;
    }
    p.plan.push(Step::DrawFeatures);
}


fn validate_make_report(p: &mut Pipeline) {
    if p.plan.is_empty() {
        return;
    }
    if let Some(bundle) = p.config.opts.bundle.clone() {
        if !bundle.is_dir() {
            p.error(format!("Can't find Tectonic bundle {}", bundle.display()));
        }
    }
    p.log.main_process("Validating reporting utilities");
    p.require_tool("tectonic", "tectonic is not on the PATH (required for reporting).");
    p.plan.push(Step::MakeReport);
}


fn validate_output_dir(p: &mut Pipeline) {
    match p.config.opts.output.clone() {
        None => p.error("No output directory given (--output)"),
        Some(output) if output.is_dir() && !p.config.opts.overwrite => {
            p.error(format!("Output directory {} already exists.  Add --overwrite to ignore",
                            output.display()));
        }
        Some(_) => {}
    }
    p.plan.prepend(Step::MakeOutputDir);
}


/// --download is a standalone mode: it discards the plan and any errors built so far.
fn validate_download(p: &mut Pipeline) {
    if !p.config.opts.download {
        return;
    }
    p.ledger.errors.clear();
    p.log.set_verbosity(COMMAND_VERBOSITY);
    if p.config.opts.has_options_besides_download() {
        p.error("Use --download without any other arguments");
    }
    p.plan.replace_remaining(vec![PlanEntry::new(Step::DownloadDatabases)]);
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;
    use crate::options::Options;
    use crate::runner::Runner;
    use crate::tests::{make_fake_tool, make_test_file};

    fn pipeline(opts: Options, runner: Runner) -> Pipeline {
        Pipeline::unvalidated(Config::new(opts), runner)
    }

    #[test]
    fn test_guards() {
        let opts = Options { genome: Some(PathBuf::from("g.fasta")), ..Default::default() };
        let config = Config::new(opts);
        assert!(Guard::UnlessGivenGenome.blocks(&config));
        assert!(!Guard::UnlessOnlyBasecall.blocks(&config));
        assert!(!Guard::UnlessNoAssembly.blocks(&config));
    }

    #[test]
    fn test_predicate_order() {
        let names: Vec<&str> = PREDICATES.iter().map(|p| p.name).collect();
        let position = |name: &str| names.iter().position(|n| *n == name).unwrap();
        assert!(position("guppy") < position("qcat"));
        assert!(position("genome_fasta") < position("miniasm"));
        assert!(position("flye") < position("racon"));
        assert!(position("racon") < position("medaka"));
        assert!(position("medaka") < position("nanopolish"));
        assert!(position("pilon") < position("spades"));
        assert!(position("features") < position("blast"));
        assert!(position("reference") < position("mutations"));
        assert_eq!(names.last(), Some(&"make_report"));
    }

    #[test]
    fn test_genome_size_format() {
        assert!(is_valid_genome_size("5m"));
        assert!(is_valid_genome_size("4.8M"));
        assert!(is_valid_genome_size("600k"));
        assert!(!is_valid_genome_size("5"));
        assert!(!is_valid_genome_size("5mb"));
        assert!(!is_valid_genome_size("m"));
        assert!(!is_valid_genome_size("5.m"));
    }

    #[test]
    fn test_contains_fast5() {
        let dir = tempdir().unwrap();
        assert!(!contains_fast5(dir.path()));
        fs::create_dir(dir.path().join("0")).unwrap();
        make_test_file(&dir.path().join("0").join("read.fast5"), "x");
        assert!(contains_fast5(dir.path()));
    }

    #[test]
    fn test_ont_watch_exclusions() {
        let dir = tempdir().unwrap();
        let opts = Options { ont_watch: Some(dir.path().join("missing")),
                             ont_fast5: Some(dir.path().to_path_buf()),
                             ont_watch_min_reads: -1, ..Default::default() };
        let mut p = pipeline(opts, Runner::new(true));
        validate_ont_watch(&mut p);
        assert_eq!(p.ledger.errors,
                   vec!["--ont-watch and --ont-fast5 are mutually exclusive.",
                        "ONT watch directory does not exist.",
                        "ONT watch min reads must be > 0."]);
        assert!(p.config.derived.caps.will_have_ont_fastq());
        assert_eq!(p.plan.steps(), vec![Step::WatchOnt]);
    }

    #[test]
    fn test_ont_watch_skipped_for_barcodes() {
        let dir = tempdir().unwrap();
        let opts = Options { ont_watch: Some(dir.path().to_path_buf()), ..Default::default() };
        let mut config = Config::new(opts);
        config.is_barcode = true;
        let mut p = Pipeline::unvalidated(config, Runner::new(true));
        validate_ont_watch(&mut p);
        assert!(p.plan.is_empty());
        assert!(!p.config.derived.caps.will_have_ont_fastq());
    }

    #[test]
    fn test_miniasm_forces_racon() {
        let dir = tempdir().unwrap();
        for tool in ["minimap2", "miniasm", "racon"] {
            make_fake_tool(dir.path(), tool, "echo 1.0");
        }
        let opts = Options { ont_fastq: Some(dir.path().join("reads.fastq")),
                             assembler: Assembler::Miniasm, ..Default::default() };
        let mut p = pipeline(opts, Runner::new(true).with_search_path(dir.path()));
        validate_miniasm(&mut p);
        validate_racon(&mut p);
        assert!(p.ledger.errors.is_empty());
        assert_eq!(p.plan.steps(), vec![Step::MiniasmOntFastq, Step::RaconOntAssembly]);
        assert_eq!(p.config.derived.version("racon"), "1.0");
    }

    #[test]
    fn test_missing_tools_are_all_reported() {
        let dir = tempdir().unwrap();
        let opts = Options { ont_fastq: Some(dir.path().join("reads.fastq")),
                             assembler: Assembler::Wtdbg2, genome_size: Some("5m".to_string()),
                             ..Default::default() };
        let mut p = pipeline(opts, Runner::new(true).with_search_path(dir.path()));
        p.config.derived.caps.mark_ont_fastq();
        validate_wtdbg2(&mut p);
        assert_eq!(p.ledger.errors.len(), 5);
        assert!(p.ledger.errors[0].starts_with("pgzf is not on the PATH"));
        assert_eq!(p.plan.steps(), vec![Step::Wtdbg2OntFastq]);
    }

    #[test]
    fn test_bad_genome_size() {
        let opts = Options { genome_size: Some("five megabases".to_string()),
                             ..Default::default() };
        let mut p = pipeline(opts, Runner::new(true));
        check_genome_size(&mut p, "Flye");
        assert_eq!(p.ledger.errors,
                   vec!["--genome-size needs to be a floating point number in Mega or kilobases, \
                         got five megabases"]);
    }

    #[test]
    fn test_mutation_regions() {
        let dir = tempdir().unwrap();
        let bed = dir.path().join("regions.bed");
        make_test_file(&bed, "contig\tstart\tstop\tname\ttype\tdrug\tnote\n\
                              chr\t10\t20\tgyrA\tsnp\tciprofloxacin\tQRDR\n\
                              chr\t90\t120\trpoB\tany\trifampicin\tRRDR\n\
                              plasmid\t1\t5\tblaX\tany\tampicillin\tnone\n");
        let mut p = pipeline(Options::default(), Runner::new(false));
        p.config.derived.reference_contigs = vec![("chr".to_string(), 100)];
        let regions = load_mutation_regions(&mut p, &bed);
        assert_eq!(regions.len(), 3);
        assert_eq!(p.ledger.errors.len(), 2);
        assert!(p.ledger.errors[0].ends_with("ends after the reference sequence."));
        assert!(p.ledger.errors[1].ends_with("not found in reference genome."));
    }

    #[test]
    fn test_empty_mutation_regions() {
        let dir = tempdir().unwrap();
        let bed = dir.path().join("regions.bed");
        make_test_file(&bed, "contig\tstart\tstop\tname\ttype\tdrug\tnote\n");
        let mut p = pipeline(Options::default(), Runner::new(false));
        assert!(load_mutation_regions(&mut p, &bed).is_empty());
        assert_eq!(p.ledger.errors, vec!["No rows in mutation regions file."]);
    }

    #[test]
    fn test_load_gene_drug() {
        let dir = tempdir().unwrap();
        let tsv = dir.path().join("gene_drug.tsv");
        make_test_file(&tsv, "blaKPC\tcarbapenem\ntetA\ttetracycline\nbroken\n");
        assert_eq!(load_gene_drug(&tsv),
                   vec![("blaKPC".to_string(), "carbapenem".to_string()),
                        ("tetA".to_string(), "tetracycline".to_string())]);
    }

    #[test]
    fn test_download_replaces_plan() {
        let opts = Options { download: true, ..Default::default() };
        let mut p = pipeline(opts, Runner::new(true));
        p.plan.push(Step::CleanUp);
        p.error("No output directory given (--output)");
        validate_download(&mut p);
        assert!(p.ledger.errors.is_empty());
        assert_eq!(p.plan.steps(), vec![Step::DownloadDatabases]);
        assert_eq!(p.log.verbosity(), COMMAND_VERBOSITY);
    }

    #[test]
    fn test_download_with_other_options() {
        let opts = Options { download: true, plasmids: true, ..Default::default() };
        let mut p = pipeline(opts, Runner::new(true));
        validate_download(&mut p);
        assert_eq!(p.ledger.errors, vec!["Use --download without any other arguments"]);
    }
}
