// This file contains the feature steps: BLASTing feature sets against the genome, picking the best
// hit per cluster and drawing the per-contig feature plots and the AMR matrix.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::config::{FeatureHit, FeatureSet};
use crate::ledger::{Content, Table, AMR_MATRIX_TITLE, FEATURE_METHODS, FEATURE_PLOT_TITLE,
                    FEATURE_TITLE};
use crate::misc::{create_dir, pretty_ticks, write_file};
use crate::pipeline::Pipeline;
use crate::runner::std_files;


const MIN_IDENTITY: f64 = 95.0;
const MIN_QUERY_COVERAGE: f64 = 0.9;
const CLUSTER_OVERLAP: f64 = 0.9;

const PLOT_WIDTH: u32 = 1300;
const PLOT_MARGIN: u32 = 20;
const TRACK_HEIGHT: u32 = 50;
const RULER_HEIGHT: u32 = 30;
const MATRIX_CELL: u32 = 40;

static BACKGROUND_COLOUR: Rgb<u8> = Rgb([255, 255, 255]);  // white
static OUTLINE_COLOUR: Rgb<u8> = Rgb([0, 0, 0]);           // black
static AXIS_COLOUR: Rgb<u8> = Rgb([128, 128, 128]);        // grey
static PRESENT_COLOUR: Rgb<u8> = Rgb([8, 81, 156]);        // dark blue
static ABSENT_COLOUR: Rgb<u8> = Rgb([247, 251, 255]);      // pale blue


pub fn blast_feature_sets(p: &mut Pipeline) {
    p.log.main_process("BLASTing feature sets");
    let features_dir = p.start_step("features");
    let genome = p.genome_fasta();
    make_blast_database(p, &genome);

    let feature_sets = p.config.derived.feature_sets.clone();
    let mut all_hits = Vec::new();
    for feature_set in &feature_sets {
        let hits = blast_features(p, &genome, feature_set, &features_dir.join(&feature_set.name));
        p.report.section_mut(&[FEATURE_TITLE])
            .set(&feature_set.name, Content::Table(hits_table(&hits)));
        all_hits.push((feature_set.name.clone(), hits));
    }
    p.config.state.feature_hits = all_hits;

    let method = format!("The genome assembly was queried for features using blastn (v {}).  \
                          Feature hits were clustered using bedtools (v {}) and the highest \
                          scoring hit for each cluster was reported.",
                         p.config.derived.version("blastn"), p.config.derived.version("bedtools"));
    p.report.add_method(FEATURE_METHODS, &method);
    p.finish_step(&features_dir);
}


pub fn make_blast_database(p: &Pipeline, fasta: &Path) {
    p.log.sub_process(&format!("Making a BLAST database for {}", fasta.display()));
    let (stdout, stderr) = std_files(&fasta.with_extension(""));
    p.run_command(&format!("makeblastdb -in {} -dbtype nucl -parse_seqids 1>{} 2>{}",
                           fasta.display(), stdout.display(), stderr.display()));
}


fn blast_features(p: &Pipeline, genome: &Path, feature_set: &FeatureSet, feature_dir: &Path)
        -> Vec<FeatureHit> {
    create_dir(feature_dir);

    p.log.sub_process(&format!("BLASTing {} features against the assembly", feature_set.name));
    let blast_output = feature_dir.join("blast_output.tsv");
    let (stdout, stderr) = std_files(&feature_dir.join("blastn"));
    p.run_command(&format!("blastn -db {} -query {} -perc_identity {:.1} -outfmt \"6 qseqid \
                            sseqid pident length mismatch gapopen qstart qend sstart send evalue \
                            bitscore nident qlen\" -evalue 1e-10 -out {} 1>{} 2>{}",
                           genome.display(), feature_set.fasta.display(), MIN_IDENTITY,
                           blast_output.display(), stdout.display(), stderr.display()));

    p.log.sub_process("Converting feature hits to BED");
    let hits = parse_blast_hits(&p.runner.read_lines(&blast_output));
    let all_bed = feature_dir.join("all.bed");
    write_file(&all_bed, &hits_to_bed(&hits));

    p.log.sub_process("Clustering feature hits");
    let merge_bed = feature_dir.join("merge.bed");
    let (_, stderr) = std_files(&feature_dir.join("bedtools_merge"));
    p.run_command(&format!("bedtools merge -d -30 -i {} 1>{} 2>{}", all_bed.display(),
                           merge_bed.display(), stderr.display()));
    let clusters = parse_clusters(&p.runner.read_lines(&merge_bed));

    p.log.sub_process("Finding the best hit for each feature cluster");
    let best = best_hits(&hits, &clusters);
    write_file(&feature_dir.join("best.bed"), &hits_to_bed(&best));
    best
}


/// Turns tabular BLAST output into hits, keeping those with high identity that cover most of the
/// query. Hits come back sorted by contig and start.
pub fn parse_blast_hits(blast_lines: &[String]) -> Vec<FeatureHit> {
    let mut hits = Vec::new();
    for line in blast_lines {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 14 {
            continue;
        }
        let (Ok(identity), Ok(length), Ok(sstart), Ok(send), Ok(qlen)) =
            (parts[2].parse::<f64>(), parts[3].parse::<f64>(), parts[8].parse::<u64>(),
             parts[9].parse::<u64>(), parts[13].parse::<f64>()) else { continue; };
        if identity < MIN_IDENTITY || qlen <= 0.0 || length / qlen < MIN_QUERY_COVERAGE {
            continue;
        }
        hits.push(FeatureHit { contig: parts[1].to_string(), start: sstart.min(send),
                               end: sstart.max(send), name: parts[0].to_string(),
                               identity: identity / 100.0, forward: sstart < send });
    }
    hits.sort_by(|a, b| a.contig.cmp(&b.contig).then(a.start.cmp(&b.start)));
    hits
}


pub fn parse_clusters(merge_lines: &[String]) -> Vec<(String, u64, u64)> {
    merge_lines.iter()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let contig = parts.next()?.to_string();
            let start = parts.next()?.trim().parse().ok()?;
            let end = parts.next()?.trim().parse().ok()?;
            Some((contig, start, end))
        })
        .collect()
}


/// For each cluster, the highest-identity hit that mutually overlaps it by at least 90%. Ties go
/// to the earlier hit.
pub fn best_hits(hits: &[FeatureHit], clusters: &[(String, u64, u64)]) -> Vec<FeatureHit> {
    let mut best: Vec<FeatureHit> = Vec::new();
    for (contig, start, end) in clusters {
        let cluster_length = end.saturating_sub(*start).max(1) as f64;
        let mut cluster_best: Option<&FeatureHit> = None;
        for hit in hits.iter().filter(|h| &h.contig == contig) {
            let overlap = hit.end.min(*end).saturating_sub(hit.start.max(*start)) as f64;
            let hit_length = hit.end.saturating_sub(hit.start).max(1) as f64;
            if overlap / hit_length < CLUSTER_OVERLAP || overlap / cluster_length < CLUSTER_OVERLAP {
                continue;
            }
            if cluster_best.map_or(true, |b| hit.identity > b.identity) {
                cluster_best = Some(hit);
            }
        }
        if let Some(hit) = cluster_best {
            best.push(hit.clone());
        }
    }
    best.sort_by(|a, b| a.contig.cmp(&b.contig).then(a.start.cmp(&b.start)));
    best
}


fn hits_to_bed(hits: &[FeatureHit]) -> String {
    hits.iter()
        .map(|h| format!("{}\t{}\t{}\t{}\t{:.3}\t{}\n", h.contig, h.start, h.end, h.name,
                         h.identity, strand(h)))
        .collect()
}


fn strand(hit: &FeatureHit) -> &'static str {
    if hit.forward { "+" } else { "-" }
}


fn hits_table(hits: &[FeatureHit]) -> Table {
    let mut table = Table::new(&["contig", "start", "stop", "feature", "identity", "strand"]);
    for h in hits {
        table.push(vec![h.contig.clone(), h.start.to_string(), h.end.to_string(), h.name.clone(),
                        format!("{:.3}", h.identity),
                        strand(h).to_string()]);
    }
    table
}


pub fn draw_features(p: &mut Pipeline) {
    p.log.main_process("Drawing features");
    let drawing_dir = p.start_step("drawing");
    let colours: Vec<(String, [u8; 3])> = p.config.derived.feature_sets.iter()
        .map(|f| (f.name.clone(), f.colour)).collect();
    let genome = p.config.state.genome.clone();
    let feature_hits = p.config.state.feature_hits.clone();

    for (contig, length) in &genome {
        let tracks: Vec<(&str, [u8; 3], Vec<&FeatureHit>)> = feature_hits.iter()
            .map(|(name, hits)| {
                let colour = colours.iter().find(|(n, _)| n == name).map(|(_, c)| *c)
                    .unwrap_or([0, 0, 0]);
                let contig_hits = hits.iter().filter(|h| &h.contig == contig).collect::<Vec<_>>();
                (name.as_str(), colour, contig_hits)
            })
            .filter(|track| !track.2.is_empty())
            .collect();
        if tracks.is_empty() {
            continue;
        }
        p.log.sub_process(&format!("Drawing features for {}", contig));
        let png = drawing_dir.join(format!("{}.png", contig));
        let img = feature_plot(*length as u64, &tracks);
        if let Err(e) = img.save(&png) {
            p.add_warning(&format!("Failed to save feature plot {}: {}", png.display(), e), &[]);
            continue;
        }
        write_file(&drawing_dir.join(format!("{}.labels.tsv", contig)),
                   &feature_labels(*length as u64, &tracks));
        p.report.section_mut(&[FEATURE_PLOT_TITLE]).set(contig, Content::Image(png));
    }
    p.finish_step(&drawing_dir);
}


fn bp_to_x(position: u64, contig_length: u64) -> f64 {
    let span = (PLOT_WIDTH - 2 * PLOT_MARGIN) as f64;
    PLOT_MARGIN as f64 + span * position as f64 / contig_length.max(1) as f64
}


// One track per feature set with hits on this contig, then a ruler along the bottom.
fn feature_plot(contig_length: u64, tracks: &[(&str, [u8; 3], Vec<&FeatureHit>)]) -> RgbImage {
    let height = PLOT_MARGIN * 2 + TRACK_HEIGHT * tracks.len() as u32 + RULER_HEIGHT;
    let mut img = ImageBuffer::from_pixel(PLOT_WIDTH, height, BACKGROUND_COLOUR);
    for (i, (_, colour, hits)) in tracks.iter().enumerate() {
        let track_top = PLOT_MARGIN + TRACK_HEIGHT * i as u32;
        let centre = (track_top + TRACK_HEIGHT / 2) as f32;
        draw_line_segment_mut(&mut img, (bp_to_x(0, contig_length) as f32, centre),
                              (bp_to_x(contig_length, contig_length) as f32, centre), AXIS_COLOUR);
        for hit in hits {
            let x_start = bp_to_x(hit.start, contig_length).round() as i32;
            let x_end = bp_to_x(hit.end, contig_length).round() as i32;
            let width = (x_end - x_start).max(2) as u32;

            // Forward features sit just above the track line and reverse ones just below.
            let y = if hit.forward { track_top + TRACK_HEIGHT / 4 }
                              else { track_top + TRACK_HEIGHT / 2 };
            let rect = Rect::at(x_start, y as i32).of_size(width, TRACK_HEIGHT / 4);
            draw_filled_rect_mut(&mut img, rect, Rgb(*colour));
            draw_hollow_rect_mut(&mut img, rect, OUTLINE_COLOUR);
        }
    }
    let ruler_y = (height - PLOT_MARGIN - RULER_HEIGHT / 2) as f32;
    draw_line_segment_mut(&mut img, (bp_to_x(0, contig_length) as f32, ruler_y),
                          (bp_to_x(contig_length, contig_length) as f32, ruler_y), OUTLINE_COLOUR);
    for tick in pretty_ticks(0.0, contig_length as f64, 10) {
        let x = bp_to_x(tick, contig_length) as f32;
        draw_line_segment_mut(&mut img, (x, ruler_y), (x, ruler_y + 6.0), OUTLINE_COLOUR);
    }
    img
}


// The plot has no text, so the labels and their pixel positions are written beside it.
fn feature_labels(contig_length: u64, tracks: &[(&str, [u8; 3], Vec<&FeatureHit>)]) -> String {
    let mut labels = String::from("set\tfeature\tstart\tend\tstrand\tx\n");
    for (name, _, hits) in tracks {
        for hit in hits {
            labels.push_str(&format!("{}\t{}\t{}\t{}\t{}\t{:.0}\n", name, hit.name, hit.start,
                                     hit.end, strand(hit),
                                     bp_to_x(hit.start, contig_length)));
        }
    }
    labels
}


/// A presence matrix of AMR determinants (genes, mutations and deletions) against drugs, each
/// axis in order of first appearance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AmrMatrix {
    pub determinants: Vec<String>,
    pub drugs: Vec<String>,
    pub present: Vec<(usize, usize)>,
}

impl AmrMatrix {
    pub fn new(entries: &[(String, String)]) -> Self {
        let mut matrix = AmrMatrix::default();
        for (determinant, drug) in entries {
            let row = index_of(&mut matrix.determinants, determinant);
            let column = index_of(&mut matrix.drugs, drug);
            if !matrix.present.contains(&(row, column)) {
                matrix.present.push((row, column));
            }
        }
        matrix
    }

    pub fn is_present(&self, row: usize, column: usize) -> bool {
        self.present.contains(&(row, column))
    }

    pub fn to_tsv(&self) -> String {
        let mut tsv = format!("determinant\t{}\n", self.drugs.join("\t"));
        for (row, determinant) in self.determinants.iter().enumerate() {
            let cells: Vec<&str> = (0..self.drugs.len())
                .map(|column| if self.is_present(row, column) { "1" } else { "0" }).collect();
            tsv.push_str(&format!("{}\t{}\n", determinant, cells.join("\t")));
        }
        tsv
    }

    pub fn to_image(&self) -> RgbImage {
        let width = PLOT_MARGIN * 2 + MATRIX_CELL * self.drugs.len() as u32;
        let height = PLOT_MARGIN * 2 + MATRIX_CELL * self.determinants.len() as u32;
        let mut img = ImageBuffer::from_pixel(width, height, BACKGROUND_COLOUR);
        for row in 0..self.determinants.len() {
            for column in 0..self.drugs.len() {
                let rect = Rect::at((PLOT_MARGIN + MATRIX_CELL * column as u32) as i32,
                                    (PLOT_MARGIN + MATRIX_CELL * row as u32) as i32)
                    .of_size(MATRIX_CELL, MATRIX_CELL);
                let colour = if self.is_present(row, column) { PRESENT_COLOUR }
                                                            else { ABSENT_COLOUR };
                draw_filled_rect_mut(&mut img, rect, colour);
                draw_hollow_rect_mut(&mut img, rect, AXIS_COLOUR);
            }
        }
        img
    }
}


fn index_of(values: &mut Vec<String>, value: &str) -> usize {
    match values.iter().position(|v| v == value) {
        Some(i) => i,
        None => {
            values.push(value.to_string());
            values.len() - 1
        }
    }
}


/// Gathers AMR gene hits (linked to drugs through the gene-drug table), mutations and deletions.
pub fn amr_entries(p: &Pipeline) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let state = &p.config.state;
    if let Some((_, amr_hits)) = state.feature_hits.iter().find(|(name, _)| name == "amr") {
        for hit in amr_hits {
            for (gene, drug) in &p.config.derived.gene_drug {
                if *gene == hit.name {
                    entries.push((hit.name.clone(), drug.clone()));
                }
            }
        }
    }
    for (region, mutations) in &state.amr_mutations {
        for m in mutations {
            entries.push((format!("{} {}->{}", region, m.reference, m.alternative),
                          m.drug.clone()));
        }
    }
    for deletion in &state.amr_deletions {
        entries.push((format!("\u{0394}{}", deletion.name), deletion.drug.clone()));
    }
    entries
}


pub fn draw_amr_matrix(p: &mut Pipeline) {
    p.log.main_process("Drawing AMR matrix");
    let entries = amr_entries(p);
    if entries.len() <= 1 {
        p.log.sub_process("Not enough AMR determinants for a matrix");
        return;
    }
    let matrix = AmrMatrix::new(&entries);
    let png = p.output_dir().join("amr_matrix.png");
    if let Err(e) = matrix.to_image().save(&png) {
        p.add_warning(&format!("Failed to save AMR matrix {}: {}", png.display(), e), &[]);
        return;
    }
    write_file(&p.output_dir().join("amr_matrix.tsv"), &matrix.to_tsv());
    let section = p.report.section_mut(&[AMR_MATRIX_TITLE]);
    section.set("png", Content::Image(png));
    section.set("determinants", Content::Notes(matrix.determinants.clone()));
    section.set("drugs", Content::Notes(matrix.drugs.clone()));
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::options::Options;
    use crate::runner::Runner;
    use crate::tests::assert_almost_eq;
    use tempfile::tempdir;

    fn blast_line(query: &str, contig: &str, pident: f64, length: u64, sstart: u64, send: u64,
                  qlen: u64) -> String {
        format!("{}\t{}\t{}\t{}\t0\t0\t1\t{}\t{}\t{}\t0.0\t1000\t{}\t{}", query, contig, pident,
                length, length, sstart, send, length, qlen)
    }

    fn hit(contig: &str, start: u64, end: u64, name: &str, identity: f64) -> FeatureHit {
        FeatureHit { contig: contig.to_string(), start, end, name: name.to_string(), identity,
                     forward: true }
    }

    #[test]
    fn test_parse_blast_hits() {
        let lines = vec![blast_line("blaKPC", "chr", 99.5, 900, 2000, 1101, 900),
                         blast_line("tetA", "chr", 94.0, 1000, 10, 1009, 1000),
                         blast_line("sul1", "chr", 100.0, 500, 5000, 5499, 840),
                         blast_line("aac", "p1", 97.0, 950, 100, 1049, 1000),
                         "not\tenough\tcolumns".to_string()];
        let hits = parse_blast_hits(&lines);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].name, "blaKPC");
        assert_eq!((hits[0].start, hits[0].end), (1101, 2000));
        assert_almost_eq(hits[0].identity, 0.995, 1e-8);
        assert!(!hits[0].forward);
        assert_eq!(hits[1].name, "aac");
        assert!(hits[1].forward);
    }

    #[test]
    fn test_best_hits() {
        let hits = vec![hit("chr", 100, 1000, "a", 0.97), hit("chr", 105, 1000, "b", 0.99),
                        hit("chr", 5000, 6000, "c", 0.96), hit("p1", 100, 1000, "d", 0.98)];
        let clusters = vec![("chr".to_string(), 100, 1000), ("chr".to_string(), 5000, 6000),
                            ("p2".to_string(), 1, 100)];
        let best = best_hits(&hits, &clusters);
        let names: Vec<&str> = best.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_best_hits_tie_keeps_first() {
        let hits = vec![hit("chr", 100, 1000, "a", 0.99), hit("chr", 100, 1000, "b", 0.99)];
        let best = best_hits(&hits, &[("chr".to_string(), 100, 1000)]);
        assert_eq!(best[0].name, "a");
    }

    #[test]
    fn test_parse_clusters() {
        let lines = vec!["chr\t100\t1000".to_string(), "bad line".to_string()];
        assert_eq!(parse_clusters(&lines), vec![("chr".to_string(), 100, 1000)]);
    }

    #[test]
    fn test_amr_matrix() {
        let entries = vec![("blaKPC".to_string(), "carbapenem".to_string()),
                           ("blaKPC".to_string(), "penicillin".to_string()),
                           ("gyrA S83L".to_string(), "quinolone".to_string()),
                           ("blaKPC".to_string(), "carbapenem".to_string())];
        let matrix = AmrMatrix::new(&entries);
        assert_eq!(matrix.determinants, vec!["blaKPC", "gyrA S83L"]);
        assert_eq!(matrix.drugs, vec!["carbapenem", "penicillin", "quinolone"]);
        assert!(matrix.is_present(0, 1));
        assert!(!matrix.is_present(1, 0));
        assert_eq!(matrix.to_tsv(), "determinant\tcarbapenem\tpenicillin\tquinolone\n\
                                     blaKPC\t1\t1\t0\ngyrA S83L\t0\t0\t1\n");
        let img = matrix.to_image();
        assert_eq!(img.width(), PLOT_MARGIN * 2 + MATRIX_CELL * 3);
        assert_eq!(*img.get_pixel(PLOT_MARGIN + 5, PLOT_MARGIN + 5), PRESENT_COLOUR);
    }

    #[test]
    fn test_amr_entries() {
        let mut p = Pipeline::unvalidated(Config::new(Options::default()), Runner::new(true));
        p.config.derived.gene_drug = vec![("blaKPC".to_string(), "carbapenem".to_string()),
                                          ("tetA".to_string(), "tetracycline".to_string())];
        p.config.state.feature_hits = vec![
            ("amr".to_string(), vec![hit("chr", 1, 900, "blaKPC", 0.99)]),
            ("inc".to_string(), vec![hit("p1", 1, 500, "tetA", 0.99)])];
        p.config.state.amr_deletions = vec![crate::config::MutationRegion::from_line(
            "chr\t10\t500\tompK36\tlarge-deletion\tcarbapenem\tporin").unwrap()];
        assert_eq!(amr_entries(&p), vec![
            ("blaKPC".to_string(), "carbapenem".to_string()),
            ("\u{0394}ompK36".to_string(), "carbapenem".to_string())]);
    }

    #[test]
    fn test_feature_plot_size() {
        let a = hit("chr", 100, 900, "blaKPC", 0.99);
        let tracks = vec![("amr", [254, 217, 118], vec![&a])];
        let img = feature_plot(10000, &tracks);
        assert_eq!(img.width(), PLOT_WIDTH);
        assert_eq!(img.height(), PLOT_MARGIN * 2 + TRACK_HEIGHT + RULER_HEIGHT);
        assert!(feature_labels(10000, &tracks).contains("amr\tblaKPC\t100\t900\t+"));
    }

    #[test]
    fn test_draw_features() {
        let dir = tempdir().unwrap();
        let opts = Options { output: Some(dir.path().to_path_buf()), verbosity: 0,
                             ..Default::default() };
        let mut p = Pipeline::unvalidated(Config::new(opts), Runner::new(false));
        p.config.derived.feature_sets = vec![FeatureSet::new(Path::new("amr.fasta"),
                                                             [254, 217, 118])];
        p.config.state.genome = vec![("chr1".to_string(), 10000), ("chr2".to_string(), 5000)];
        p.config.state.feature_hits = vec![("amr".to_string(),
                                            vec![hit("chr1", 100, 900, "blaKPC", 0.99)])];
        draw_features(&mut p);

        let drawing_dir = dir.path().join("drawing");
        assert!(drawing_dir.join("chr1.png").is_file());
        assert!(drawing_dir.join("chr1.labels.tsv").is_file());
        assert!(!drawing_dir.join("chr2.png").exists());
        assert!(drawing_dir.join(".finish").is_file());
        let plots = p.report.section(&[FEATURE_PLOT_TITLE]).unwrap();
        assert!(plots.get("chr1").is_some());
        assert!(plots.get("chr2").is_none());
    }
}
