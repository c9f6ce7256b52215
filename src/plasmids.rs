// This file contains the plasmid step, which matches the smaller contigs against a plasmid database
// and resolves the hits with pChunks.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::path::Path;

use crate::features::make_blast_database;
use crate::ledger::{Content, Table, PLASMID_METHODS, PLASMID_TITLE};
use crate::misc::{check_write, create_dir, load_fasta, quit_with_error, write_fasta};
use crate::pipeline::Pipeline;
use crate::runner::std_files;


pub const PLASMID_CONTIG_MAX: usize = 500_000;


pub fn call_plasmids(p: &mut Pipeline) {
    p.log.main_process("Calling plasmids");
    let plasmid_dir = p.start_step("plasmids");
    let genome = p.genome_fasta();
    let database = p.config.opts.plasmid_database();

    p.log.sub_process(&format!("Finding contigs <= {} bp", PLASMID_CONTIG_MAX));
    let small_contigs_fasta = plasmid_dir.join("small_contigs.fasta");
    let small_contigs = if genome.is_file() { small_contigs(&genome, PLASMID_CONTIG_MAX) }
                                            else { Vec::new() };
    check_write(write_fasta(&small_contigs_fasta, &small_contigs), &small_contigs_fasta);
    if small_contigs.is_empty() && !p.runner.is_fake() {
        p.log.sub_process("No contigs are small enough to be plasmids");
        p.finish_step(&plasmid_dir);
        return;
    }

    p.log.sub_process("Running minimap2 against the plasmid database");
    let plasmid_sam = plasmid_dir.join("plasmid_hits.sam");
    let (_, stderr) = std_files(&plasmid_dir.join("minimap"));
    p.run_command(&format!("minimap2 -k 20 -p .2 -a -t {} {} {} 1> {} 2> {}", p.threads(),
                           small_contigs_fasta.display(), database.display(),
                           plasmid_sam.display(), stderr.display()));
    p.require_output(&plasmid_sam, "Plasmid v. contig SAM");
    p.clean_later(&plasmid_sam);
    let method = format!("The plasmid reference database was queried against the genome assembly \
                          using minimap2 (v {}).", p.config.derived.version("minimap2"));
    p.report.add_method(PLASMID_METHODS, &method);

    p.log.sub_process("Converting the SAM file to a PSL file");
    let plasmid_psl = plasmid_dir.join("plasmid_hits.psl");
    let (stdout, stderr) = std_files(&plasmid_dir.join("sam2psl"));
    p.run_command(&format!("sam2psl.py -i {} -o {} 1> {} 2> {}", plasmid_sam.display(),
                           plasmid_psl.display(), stdout.display(), stderr.display()));
    p.require_output(&plasmid_psl, "Plasmid v. contig PSL");
    p.report.add_method(PLASMID_METHODS, "The resulting SAM was converted to a PSL using a \
                                          custom version of sam2psl.");

    make_blast_database(p, &database);

    p.log.sub_process("Running pChunks");
    let pchunks_dir = plasmid_dir.join("pChunks");
    create_dir(&pchunks_dir);
    let pchunks_tsv = pchunks_dir.join("plasmids.tsv");
    let (stdout, stderr) = std_files(&plasmid_dir.join("pChunks"));
    p.run_command(&format!("pChunks.R --plasmid-psl {} --output {} --no-amr --no-inc \
                            --plasmid-database {} --threads {} 1>{} 2>{}",
                           plasmid_psl.display(), pchunks_dir.display(), database.display(),
                           p.threads(), stdout.display(), stderr.display()));
    p.require_output(&pchunks_tsv, "Plasmid output table");
    p.report.add_method(PLASMID_METHODS, "Plasmid-to-genome hits were resolved using the pChunks \
                                          algorithm.");

    let plasmid_tsv = plasmid_dir.join("plasmids.tsv");
    if pchunks_tsv.is_file() {
        if let Err(e) = fs::copy(&pchunks_tsv, &plasmid_tsv) {
            quit_with_error(&format!("failed to copy {}\n{}", pchunks_tsv.display(), e));
        }
    }
    let plasmids = tsv_table(&p.runner.read_lines(&plasmid_tsv));
    p.report.section_mut(&[PLASMID_TITLE]).set("plasmids", Content::Table(plasmids));
    p.finish_step(&plasmid_dir);
}


/// The contigs no longer than max_length, as (header, sequence) pairs.
pub fn small_contigs(fasta: &Path, max_length: usize) -> Vec<(String, String)> {
    load_fasta(fasta).into_iter()
        .filter(|(_, _, seq)| seq.len() <= max_length)
        .map(|(_, header, seq)| (header, seq))
        .collect()
}


/// A table from TSV lines whose first line is the header.
pub fn tsv_table(lines: &[String]) -> Table {
    let Some((header, rows)) = lines.split_first() else { return Table::default(); };
    let header: Vec<&str> = header.split('\t').collect();
    let mut table = Table::new(&header);
    for row in rows.iter().filter(|r| !r.trim().is_empty()) {
        table.push(row.split('\t').map(String::from).collect());
    }
    table
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use crate::tests::make_test_file;

    #[test]
    fn test_small_contigs() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("genome.fasta");
        make_test_file(&fasta, ">chromosome circular=true\nACGTACGTACGT\n>plasmid\nACGT\n");
        let small = small_contigs(&fasta, 10);
        assert_eq!(small, vec![("plasmid".to_string(), "ACGT".to_string())]);
        assert_eq!(small_contigs(&fasta, 12).len(), 2);
    }

    #[test]
    fn test_tsv_table() {
        let lines = vec!["plasmid\tidentity\tcontig".to_string(),
                         "pKPC\t0.99\tcontig_2".to_string(), "".to_string()];
        let table = tsv_table(&lines);
        assert_eq!(table.header, vec!["plasmid", "identity", "contig"]);
        assert_eq!(table.rows, vec![vec!["pKPC", "0.99", "contig_2"]]);
        assert!(tsv_table(&[]).is_empty());
    }
}
