// This is the main file of Pima and where execution starts. It handles the CLI, then builds the
// analysis plan and runs it.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use clap::{Parser, crate_version};

mod assembly;
mod config;
mod features;
mod ledger;
mod log;
mod mapping;
mod metrics;
mod misc;
mod options;
mod pipeline;
mod plan;
mod plasmids;
mod polish;
mod predicates;
mod reads;
mod reference;
mod report;
mod runner;

#[cfg(test)]
mod tests;

use crate::log::{explanation, section_header};
use crate::misc::{format_duration, quit_with_error};
use crate::options::{Assembler, Options};
use crate::pipeline::Pipeline;
use crate::runner::Runner;


#[derive(Parser)]
#[clap(name = "Pima",
       version = concat!("v", crate_version!()),
       about = "Plasmid, integrations, mutations and antibiotic resistance annotation pipeline \
                for bacterial genomes")]
#[command(author, version, long_about = None)]
#[clap(arg_required_else_help = true)]
struct Cli {
    /// Directory to watch for ONT FAST5 files as they are written
    #[clap(long = "ont-watch", help_heading = "Input and basecalling")]
    ont_watch: Option<PathBuf>,

    /// Stop watching once at least this many reads have been basecalled
    #[clap(long = "ont-watch-min-reads", default_value = "5000000",
           help_heading = "Input and basecalling")]
    ont_watch_min_reads: i64,

    /// Stop watching after this many hours
    #[clap(long = "ont-watch-max-time", default_value = "24",
           help_heading = "Input and basecalling")]
    ont_watch_max_time: f64,

    /// Stop watching when no new FAST5 file has appeared for this many minutes
    #[clap(long = "ont-watch-between-time", default_value = "15",
           help_heading = "Input and basecalling")]
    ont_watch_between_time: f64,

    /// Directory containing ONT FAST5 files
    #[clap(long = "ont-fast5", help_heading = "Input and basecalling")]
    ont_fast5: Option<PathBuf>,

    /// File containing basecalled ONT reads
    #[clap(long = "ont-fastq", help_heading = "Input and basecalling")]
    ont_fastq: Option<PathBuf>,

    /// The ONT reads are multiplexed
    #[clap(long = "multiplexed", help_heading = "Input and basecalling")]
    multiplexed: bool,

    /// Error-correct the ONT reads before assembly
    #[clap(long = "error-correct", help_heading = "Input and basecalling")]
    error_correct: bool,

    /// Stop after basecalling
    #[clap(long = "only-basecall", help_heading = "Input and basecalling")]
    only_basecall: bool,

    /// Files containing Illumina reads
    #[clap(long = "illumina-fastq", num_args = 1..=2, help_heading = "Input and basecalling")]
    illumina_fastq: Vec<PathBuf>,

    /// A genome FASTA file to annotate instead of assembling one
    #[clap(long = "genome", help_heading = "Input and basecalling")]
    genome: Option<PathBuf>,

    /// Output directory
    #[clap(long = "output", help_heading = "Output")]
    output: Option<PathBuf>,

    /// Overwrite an existing output directory
    #[clap(long = "overwrite", help_heading = "Output")]
    overwrite: bool,

    /// Assembler to use
    #[clap(long = "assembler", value_enum, default_value_t = Assembler::Flye,
           help_heading = "Assembly")]
    assembler: Assembler,

    /// Genome size estimate for the assembler, e.g. 5.5m
    #[clap(long = "genome-size", help_heading = "Assembly")]
    genome_size: Option<String>,

    /// Polish the assembly with Racon
    #[clap(long = "racon", help_heading = "Assembly")]
    racon: bool,

    /// Number of Racon polishing rounds
    #[clap(long = "racon-rounds", default_value = "4", help_heading = "Assembly")]
    racon_rounds: usize,

    /// Skip Medaka polishing
    #[clap(long = "no-medaka", help_heading = "Assembly")]
    no_medaka: bool,

    /// Polish the assembly with Nanopolish
    #[clap(long = "nanopolish", help_heading = "Assembly")]
    nanopolish: bool,

    /// Downsample reads to this coverage before running Nanopolish
    #[clap(long = "max-nanopolish-coverage", default_value = "100", help_heading = "Assembly")]
    max_nanopolish_coverage: f64,

    /// Sequencing summary file for Nanopolish
    #[clap(long = "albacore-seq-file", help_heading = "Assembly")]
    albacore_seq_file: Option<PathBuf>,

    /// Don't assemble or polish
    #[clap(long = "no-assembly", help_heading = "Assembly")]
    no_assembly: bool,

    /// Download the bundled databases and exit
    #[clap(long = "download", help_heading = "Features")]
    download: bool,

    /// Search for plasmids
    #[clap(long = "plasmids", help_heading = "Features")]
    plasmids: bool,

    /// Plasmid database FASTA
    #[clap(long = "plasmid-database", help_heading = "Features")]
    plasmid_database: Option<PathBuf>,

    /// AMR database FASTA
    #[clap(long = "amr-database", help_heading = "Features")]
    amr_database: Option<PathBuf>,

    /// Skip the AMR search
    #[clap(long = "no-amr", help_heading = "Features")]
    no_amr: bool,

    /// Incompatibility group database FASTA
    #[clap(long = "inc-database", help_heading = "Features")]
    inc_database: Option<PathBuf>,

    /// Skip the incompatibility group search
    #[clap(long = "no-inc", help_heading = "Features")]
    no_inc: bool,

    /// Additional feature set FASTA (can be repeated)
    #[clap(long = "feature", help_heading = "Features")]
    feature: Vec<PathBuf>,

    /// Don't draw feature plots
    #[clap(long = "no-drawing", help_heading = "Features")]
    no_drawing: bool,

    /// Directory holding per-organism reference sequences
    #[clap(long = "reference-dir", help_heading = "Reference")]
    reference_dir: Option<PathBuf>,

    /// Organism whose bundled reference and mutation regions are used
    #[clap(long = "organism", help_heading = "Reference")]
    organism: Option<String>,

    /// List the available organisms and exit
    #[clap(long = "list-organisms", help_heading = "Reference")]
    list_organisms: bool,

    /// Reference genome FASTA
    #[clap(long = "reference-genome", help_heading = "Reference")]
    reference_genome: Option<PathBuf>,

    /// BED file of regions to screen for AMR mutations
    #[clap(long = "mutation-regions", help_heading = "Reference")]
    mutation_regions: Option<PathBuf>,

    /// Analysis name used in the report
    #[clap(long = "name", default_value = "Genome", help_heading = "Other")]
    name: String,

    /// Number of CPU threads
    #[clap(short = 't', long = "threads", default_value = "1", help_heading = "Other")]
    threads: usize,

    /// Verbosity: 0 errors, 1 progress, 2 details, 3 commands
    #[clap(long = "verbosity", default_value = "1", help_heading = "Other")]
    verbosity: u8,

    /// Tectonic bundle used to typeset the report
    #[clap(long = "bundle", help_heading = "Other")]
    bundle: Option<PathBuf>,

    /// Log the plan and commands without running anything
    #[clap(long = "fake-run", help_heading = "Other")]
    fake_run: bool,

    /// Directory holding the bundled databases and drawing configuration
    #[clap(long = "data-dir", help_heading = "Other")]
    data_dir: Option<PathBuf>,
}

impl Cli {
    fn into_options(self) -> Options {
        let defaults = Options::default();
        Options {
            ont_watch: self.ont_watch,
            ont_watch_min_reads: self.ont_watch_min_reads,
            ont_watch_max_time: self.ont_watch_max_time,
            ont_watch_between_time: self.ont_watch_between_time,
            ont_fast5: self.ont_fast5,
            ont_fastq: self.ont_fastq,
            multiplexed: self.multiplexed,
            error_correct: self.error_correct,
            only_basecall: self.only_basecall,
            illumina_fastq: self.illumina_fastq,
            genome: self.genome,
            output: self.output,
            overwrite: self.overwrite,
            assembler: self.assembler,
            genome_size: self.genome_size,
            racon: self.racon,
            racon_rounds: self.racon_rounds,
            no_medaka: self.no_medaka,
            nanopolish: self.nanopolish,
            max_nanopolish_coverage: self.max_nanopolish_coverage,
            albacore_seq_file: self.albacore_seq_file,
            no_assembly: self.no_assembly,
            download: self.download,
            plasmids: self.plasmids,
            plasmid_database: self.plasmid_database,
            amr_database: self.amr_database,
            no_amr: self.no_amr,
            inc_database: self.inc_database,
            no_inc: self.no_inc,
            feature: self.feature,
            no_drawing: self.no_drawing,
            reference_dir: self.reference_dir,
            organism: self.organism,
            reference_genome: self.reference_genome,
            mutation_regions: self.mutation_regions,
            name: self.name,
            threads: self.threads,
            verbosity: self.verbosity,
            bundle: self.bundle,
            fake_run: self.fake_run,
            data_dir: self.data_dir.unwrap_or(defaults.data_dir),
        }
    }
}


fn main() {
    let cli = Cli::parse();
    let list_organisms = cli.list_organisms;
    let opts = cli.into_options();

    if list_organisms {
        for organism in list_subdirectories(&opts.reference_dir()) {
            println!("{}", organism);
        }
        return;
    }

    let start_time = Instant::now();
    if opts.verbosity > 0 {
        section_header("Starting PIMA");
        explanation("Pima checks the given options and available tools, builds a plan of \
                     analysis steps and then runs the steps in order.");
        opts.print_settings();
    }
    let pipeline = Pipeline::build(opts.clone(), Runner::new(opts.fake_run));
    match pipeline.execute() {
        Ok(_) => {
            if opts.verbosity > 0 {
                finished_message(start_time, &opts);
            }
        }
        Err(errors) => {
            eprintln!();
            eprint!("{}", errors);
            std::process::exit(1);
        }
    }
}


fn finished_message(start_time: Instant, opts: &Options) {
    section_header("Finished!");
    if let Some(output) = &opts.output {
        explanation(&format!("Results are in {}.", output.display()));
    }
    eprintln!("Time to run: {}", format_duration(start_time.elapsed()));
    eprintln!();
}


fn list_subdirectories(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => quit_with_error(&format!("failed to read {}\n{}", dir.display(), e)),
    };
    let mut names: Vec<String> = entries.filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
