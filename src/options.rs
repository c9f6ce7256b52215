// This file contains the read-only run options that seed a pipeline's configuration.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use clap::ValueEnum;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};


pub const AMR_DEFAULT_COLOUR: &str = "#FED976";
pub const INC_DEFAULT_COLOUR: &str = "#0570B0";
pub const DOWNLOADABLE_DATABASES: [&str; 3] = ["amr", "inc", "plasmids_and_vectors"];


#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Assembler {
    Miniasm,
    Wtdbg2,
    #[default]
    Flye,
}

impl fmt::Display for Assembler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Assembler::Miniasm => write!(f, "miniasm"),
            Assembler::Wtdbg2  => write!(f, "wtdbg2"),
            Assembler::Flye    => write!(f, "flye"),
        }
    }
}


/// Everything the user asked for. Nothing in the pipeline mutates these values; a barcode
/// sub-pipeline gets its own modified copy.
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    pub ont_watch: Option<PathBuf>,
    pub ont_watch_min_reads: i64,
    pub ont_watch_max_time: f64,
    pub ont_watch_between_time: f64,
    pub ont_fast5: Option<PathBuf>,
    pub ont_fastq: Option<PathBuf>,
    pub multiplexed: bool,
    pub error_correct: bool,
    pub only_basecall: bool,
    pub illumina_fastq: Vec<PathBuf>,
    pub genome: Option<PathBuf>,

    pub output: Option<PathBuf>,
    pub overwrite: bool,

    pub assembler: Assembler,
    pub genome_size: Option<String>,
    pub racon: bool,
    pub racon_rounds: usize,
    pub no_medaka: bool,
    pub nanopolish: bool,
    pub max_nanopolish_coverage: f64,
    pub albacore_seq_file: Option<PathBuf>,
    pub no_assembly: bool,

    pub download: bool,
    pub plasmids: bool,
    pub plasmid_database: Option<PathBuf>,
    pub amr_database: Option<PathBuf>,
    pub no_amr: bool,
    pub inc_database: Option<PathBuf>,
    pub no_inc: bool,
    pub feature: Vec<PathBuf>,
    pub no_drawing: bool,

    pub reference_dir: Option<PathBuf>,
    pub organism: Option<String>,
    pub reference_genome: Option<PathBuf>,
    pub mutation_regions: Option<PathBuf>,

    pub name: String,
    pub threads: usize,
    pub verbosity: u8,
    pub bundle: Option<PathBuf>,
    pub fake_run: bool,
    pub data_dir: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            ont_watch: None,
            ont_watch_min_reads: 5_000_000,
            ont_watch_max_time: 24.0,
            ont_watch_between_time: 15.0,
            ont_fast5: None,
            ont_fastq: None,
            multiplexed: false,
            error_correct: false,
            only_basecall: false,
            illumina_fastq: Vec::new(),
            genome: None,
            output: None,
            overwrite: false,
            assembler: Assembler::Flye,
            genome_size: None,
            racon: false,
            racon_rounds: 4,
            no_medaka: false,
            nanopolish: false,
            max_nanopolish_coverage: 100.0,
            albacore_seq_file: None,
            no_assembly: false,
            download: false,
            plasmids: false,
            plasmid_database: None,
            amr_database: None,
            no_amr: false,
            inc_database: None,
            no_inc: false,
            feature: Vec::new(),
            no_drawing: false,
            reference_dir: None,
            organism: None,
            reference_genome: None,
            mutation_regions: None,
            name: "Genome".to_string(),
            threads: 1,
            verbosity: 1,
            bundle: None,
            fake_run: false,
            data_dir: default_data_dir(),
        }
    }
}

impl Options {
    pub fn amr_database(&self) -> PathBuf {
        self.amr_database.clone().unwrap_or_else(|| self.data_dir.join("amr.fasta"))
    }

    pub fn inc_database(&self) -> PathBuf {
        self.inc_database.clone().unwrap_or_else(|| self.data_dir.join("inc.fasta"))
    }

    pub fn plasmid_database(&self) -> PathBuf {
        self.plasmid_database.clone()
            .unwrap_or_else(|| self.data_dir.join("plasmids_and_vectors.fasta"))
    }

    pub fn gene_drug_tsv(&self) -> PathBuf { self.data_dir.join("gene_drug.tsv") }

    pub fn reference_dir(&self) -> PathBuf {
        self.reference_dir.clone().unwrap_or_else(|| self.data_dir.join("reference_sequences"))
    }

    /// True for the databases that --download knows how to fetch.
    pub fn is_bundled_database(&self, filename: &Path) -> bool {
        DOWNLOADABLE_DATABASES.iter().any(|db| self.data_dir.join(format!("{}.fasta", db)) == filename)
    }

    pub fn has_raw_reads(&self) -> bool {
        self.ont_watch.is_some() || self.ont_fast5.is_some() || self.ont_fastq.is_some() ||
            !self.illumina_fastq.is_empty()
    }

    /// True if anything other than --download (and the settings that don't select work) differs
    /// from the defaults.
    pub fn has_options_besides_download(&self) -> bool {
        let normalised = Options {
            download: false,
            data_dir: self.data_dir.clone(),
            verbosity: Options::default().verbosity,
            fake_run: false,
            ..self.clone()
        };
        normalised != Options { data_dir: self.data_dir.clone(), ..Options::default() }
    }

    pub fn print_settings(&self) {
        eprintln!("Settings:");
        let path_settings = [("--ont-watch", &self.ont_watch), ("--ont-fast5", &self.ont_fast5),
                             ("--ont-fastq", &self.ont_fastq), ("--genome", &self.genome),
                             ("--output", &self.output),
                             ("--reference-genome", &self.reference_genome),
                             ("--mutation-regions", &self.mutation_regions)];
        for (flag, value) in path_settings {
            if let Some(path) = value {
                eprintln!("  {} {}", flag, path.display());
            }
        }
        for fastq in &self.illumina_fastq {
            eprintln!("  --illumina-fastq {}", fastq.display());
        }
        if let Some(organism) = &self.organism {
            eprintln!("  --organism {}", organism);
        }
        eprintln!("  --assembler {}", self.assembler);
        if let Some(genome_size) = &self.genome_size {
            eprintln!("  --genome-size {}", genome_size);
        }
        eprintln!("  --threads {}", self.threads);
        eprintln!("  --verbosity {}", self.verbosity);
        if self.fake_run {
            eprintln!("  --fake-run");
        }
        eprintln!();
    }
}


fn default_data_dir() -> PathBuf {
    // The bundled databases live in a data directory beside the executable.
    env::current_exe().ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("data")))
        .unwrap_or_else(|| PathBuf::from("data"))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_defaults() {
        let opts = Options { data_dir: PathBuf::from("/pima/data"), ..Default::default() };
        assert_eq!(opts.amr_database(), PathBuf::from("/pima/data/amr.fasta"));
        assert_eq!(opts.inc_database(), PathBuf::from("/pima/data/inc.fasta"));
        assert_eq!(opts.plasmid_database(),
                   PathBuf::from("/pima/data/plasmids_and_vectors.fasta"));
        assert_eq!(opts.reference_dir(), PathBuf::from("/pima/data/reference_sequences"));
        assert!(opts.is_bundled_database(&opts.amr_database()));
        assert!(!opts.is_bundled_database(Path::new("/elsewhere/amr.fasta")));
    }

    #[test]
    fn test_has_options_besides_download() {
        let data_dir = PathBuf::from("/pima/data");
        let download_only = Options { download: true, data_dir: data_dir.clone(),
                                      ..Default::default() };
        assert!(!download_only.has_options_besides_download());
        let loud = Options { verbosity: 3, ..download_only.clone() };
        assert!(!loud.has_options_besides_download());
        let with_output = Options { output: Some(PathBuf::from("out")), ..download_only.clone() };
        assert!(with_output.has_options_besides_download());
        let with_threads = Options { threads: 8, ..download_only };
        assert!(with_threads.has_options_besides_download());
    }

    #[test]
    fn test_assembler_names() {
        assert_eq!(Assembler::default(), Assembler::Flye);
        assert_eq!(Assembler::Miniasm.to_string(), "miniasm");
        assert_eq!(Assembler::Wtdbg2.to_string(), "wtdbg2");
    }
}
