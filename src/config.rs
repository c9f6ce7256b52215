// This file contains the pipeline configuration, split into the user's options, values derived by
// validation predicates and state produced by executed steps.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::options::Options;


/// Capability flags record that some later step will produce an artifact. They can only be
/// switched on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    ont_fastq: bool,
    genome_fasta: bool,
    ont_assembly: bool,
    racon_forced: bool,
}

impl Capabilities {
    pub fn will_have_ont_fastq(&self) -> bool { self.ont_fastq }
    pub fn will_have_genome_fasta(&self) -> bool { self.genome_fasta }
    pub fn will_have_ont_assembly(&self) -> bool { self.ont_assembly }
    pub fn racon_forced(&self) -> bool { self.racon_forced }

    pub fn mark_ont_fastq(&mut self) { self.ont_fastq = true; }
    pub fn mark_genome_fasta(&mut self) { self.genome_fasta = true; }
    pub fn mark_ont_assembly(&mut self) { self.ont_assembly = true; }
    pub fn force_racon(&mut self) { self.racon_forced = true; }

    /// True if every flag set in other is also set here.
    pub fn includes(&self, other: &Capabilities) -> bool {
        (self.ont_fastq || !other.ont_fastq) && (self.genome_fasta || !other.genome_fasta) &&
            (self.ont_assembly || !other.ont_assembly) &&
            (self.racon_forced || !other.racon_forced)
    }
}


#[derive(Clone, Debug, PartialEq)]
pub struct FeatureSet {
    pub name: String,
    pub fasta: PathBuf,
    pub colour: [u8; 3],
}

impl FeatureSet {
    pub fn new(fasta: &Path, colour: [u8; 3]) -> Self {
        FeatureSet { name: feature_set_name(fasta), fasta: fasta.to_path_buf(), colour }
    }
}


fn feature_set_name(fasta: &Path) -> String {
    // The file name up to its first ".f" (e.g. "amr" from "amr.fasta" or "inc.fa.gz").
    let basename = fasta.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    match basename.find(".f") {
        Some(i) => basename[..i].to_string(),
        None    => basename,
    }
}


pub fn parse_colour(hex: &str) -> Option<[u8; 3]> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 { return None; }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationType {
    Snp,
    SmallIndel,
    Any,
    LargeDeletion,
}

impl FromStr for MutationType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snp"            => Ok(MutationType::Snp),
            "small-indel"    => Ok(MutationType::SmallIndel),
            "any"            => Ok(MutationType::Any),
            "large-deletion" => Ok(MutationType::LargeDeletion),
            _ => Err(format!("unknown mutation type {}", s)),
        }
    }
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MutationType::Snp           => write!(f, "snp"),
            MutationType::SmallIndel    => write!(f, "small-indel"),
            MutationType::Any           => write!(f, "any"),
            MutationType::LargeDeletion => write!(f, "large-deletion"),
        }
    }
}


/// One row of a mutation-region BED file: contig, start, stop, name, type, drug, note.
#[derive(Clone, Debug, PartialEq)]
pub struct MutationRegion {
    pub contig: String,
    pub start: i64,
    pub stop: i64,
    pub name: String,
    pub kind: MutationType,
    pub drug: String,
    pub note: String,
}

impl MutationRegion {
    pub fn from_line(line: &str) -> Result<Self, String> {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 7 {
            return Err(format!("Mutation regions should be a seven column file, got: {}", line));
        }
        let coordinate = |s: &str| s.trim().parse::<i64>()
            .map_err(|_| format!("Mutation region {} has a bad coordinate", line));
        Ok(MutationRegion {
            contig: parts[0].to_string(),
            start: coordinate(parts[1])?,
            stop: coordinate(parts[2])?,
            name: parts[3].to_string(),
            kind: parts[4].parse()?,
            drug: parts[5].to_string(),
            note: parts[6].to_string(),
        })
    }

    pub fn to_line(&self) -> String {
        format!("{}\t{}\t{}\t{}\t{}\t{}\t{}", self.contig, self.start, self.stop, self.name,
                self.kind, self.drug, self.note)
    }
}


/// A best BLAST hit of a feature against the genome, in BED-like coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureHit {
    pub contig: String,
    pub start: u64,
    pub end: u64,
    pub name: String,
    pub identity: f64,
    pub forward: bool,
}


/// A variant called in a mutation region.
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub contig: String,
    pub position: u64,
    pub kind: MutationType,
    pub reference: String,
    pub alternative: String,
    pub drug: String,
    pub note: String,
}


/// Values established during validation. Later predicates read what earlier ones set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Derived {
    pub caps: Capabilities,
    pub versions: BTreeMap<String, String>,
    pub feature_sets: Vec<FeatureSet>,
    pub gene_drug: Vec<(String, String)>,
    pub organism_dir: Option<PathBuf>,
    pub reference_fasta: Option<PathBuf>,
    pub reference_contigs: Vec<(String, usize)>,
    pub mutation_region_bed: Option<PathBuf>,
    pub mutation_regions: Vec<MutationRegion>,
    pub illumina_mean_length: Option<f64>,
}

impl Derived {
    pub fn version(&self, tool: &str) -> String {
        self.versions.get(tool).cloned().unwrap_or_else(|| "unknown".to_string())
    }
}


/// Values produced by executed steps.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunState {
    pub ont_fastq: Option<PathBuf>,
    pub ont_raw_fastq: Option<PathBuf>,
    pub ont_fastq_dir: Option<PathBuf>,
    pub demultiplexed_dir: Option<PathBuf>,
    pub barcodes: Vec<String>,
    pub genome_fasta: Option<PathBuf>,
    pub genome: Vec<(String, usize)>,
    pub feature_hits: Vec<(String, Vec<FeatureHit>)>,
    pub one_coords: Option<PathBuf>,
    pub amr_mutations: Vec<(String, Vec<Mutation>)>,
    pub amr_deletions: Vec<MutationRegion>,
    pub files_to_clean: Vec<PathBuf>,
}


#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub opts: Options,
    pub is_barcode: bool,
    pub derived: Derived,
    pub state: RunState,
}

impl Config {
    pub fn new(opts: Options) -> Self {
        let state = RunState {
            ont_fastq: opts.ont_fastq.clone(),
            ont_raw_fastq: opts.ont_fastq.clone(),
            genome_fasta: opts.genome.clone(),
            ..Default::default()
        };
        Config { opts, is_barcode: false, derived: Derived::default(), state }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.opts.output.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// A fresh configuration for one barcode's sub-pipeline. Only the read input and output
    /// directory differ from the parent's options; nothing mutable is shared with the parent.
    pub fn for_barcode(&self, barcode: &str) -> Config {
        let demux_dir = self.state.demultiplexed_dir.clone()
            .unwrap_or_else(|| self.output_dir().join("demultiplex"));
        let opts = Options {
            ont_fastq: Some(demux_dir.join(format!("{}.fastq", barcode))),
            multiplexed: false,
            output: Some(self.output_dir().join(barcode)),
            ..self.opts.clone()
        };
        Config { is_barcode: true, ..Config::new(opts) }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_includes() {
        let mut before = Capabilities::default();
        before.mark_ont_fastq();
        let mut after = before;
        after.mark_genome_fasta();
        assert!(after.includes(&before));
        assert!(!before.includes(&after));
        assert!(after.will_have_ont_fastq());
        assert!(!after.will_have_ont_assembly());
    }

    #[test]
    fn test_feature_set_name() {
        assert_eq!(feature_set_name(Path::new("/data/amr.fasta")), "amr");
        assert_eq!(feature_set_name(Path::new("inc.fa.gz")), "inc");
        assert_eq!(feature_set_name(Path::new("toxins")), "toxins");
    }

    #[test]
    fn test_parse_colour() {
        assert_eq!(parse_colour("#FED976"), Some([254, 217, 118]));
        assert_eq!(parse_colour("#0570B0"), Some([5, 112, 176]));
        assert_eq!(parse_colour("FED976"), None);
        assert_eq!(parse_colour("#FED97"), None);
        assert_eq!(parse_colour("#GGGGGG"), None);
    }

    #[test]
    fn test_mutation_region_from_line() {
        let region = MutationRegion::from_line("chr\t100\t200\tgyrA\tsnp\tciprofloxacin\tQRDR")
            .unwrap();
        assert_eq!(region.contig, "chr");
        assert_eq!(region.start, 100);
        assert_eq!(region.kind, MutationType::Snp);
        assert_eq!(region.to_line(), "chr\t100\t200\tgyrA\tsnp\tciprofloxacin\tQRDR");
        assert!(MutationRegion::from_line("chr\t100\t200\tgyrA\tsnp\tcip").is_err());
        assert!(MutationRegion::from_line("chr\tx\t200\tgyrA\tsnp\tcip\tnote").is_err());
        assert!(MutationRegion::from_line("chr\t1\t200\tgyrA\tframeshift\tcip\tnote").is_err());
    }

    #[test]
    fn test_for_barcode() {
        let opts = Options { ont_fastq: Some(PathBuf::from("reads.fastq")), multiplexed: true,
                             output: Some(PathBuf::from("out")), ..Default::default() };
        let mut parent = Config::new(opts);
        parent.state.demultiplexed_dir = Some(PathBuf::from("out/demultiplex"));
        parent.state.files_to_clean.push(PathBuf::from("out/big.bam"));
        let child = parent.for_barcode("barcode03");
        assert!(child.is_barcode);
        assert!(!child.opts.multiplexed);
        assert_eq!(child.opts.output, Some(PathBuf::from("out/barcode03")));
        assert_eq!(child.state.ont_fastq,
                   Some(PathBuf::from("out/demultiplex/barcode03.fastq")));
        assert!(child.state.files_to_clean.is_empty());
        assert_eq!(child.derived, Derived::default());
        assert_eq!(child.opts.name, parent.opts.name);
    }
}
