// This file contains miscellaneous functions used by various parts of Pima.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use flate2::read::MultiGzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use seq_io::fastq::Reader;
use std::collections::HashSet;
use std::fs::{File, create_dir_all, remove_dir_all};
use std::io;
use std::io::{prelude::*, BufReader, BufWriter, Read};
use std::path::Path;
use std::time::Duration;


pub fn create_dir(dir_path: &Path) {
    match create_dir_all(dir_path) {
        Ok(_) => {},
        Err(e) => quit_with_error(&format!("failed to create directory {}\n{}", dir_path.display(), e)),
    }
}


pub fn delete_dir_if_exists(dir_path: &Path) {
    if dir_path.exists() && dir_path.is_dir() {
        match remove_dir_all(dir_path) {
            Ok(_) => {},
            Err(e) => quit_with_error(&format!("failed to delete directory {}\n{}", dir_path.display(), e)),
        }
    }
}


pub fn load_file_lines(filename: &Path) -> Vec<String> {
    let file = File::open(filename).unwrap_or_else(|e| {
        quit_with_error(&format!("failed to open file {}\n{}", filename.display(), e));
    });
    let reader = BufReader::new(file);
    reader.lines().map(|line_result| {
        line_result.unwrap_or_else(|e| {
            quit_with_error(&format!("failed to read line\n{}", e));
        })
    }).collect()
}


pub fn file_has_content(filename: &Path) -> bool {
    filename.is_file() && filename.metadata().map(|m| m.len() > 0).unwrap_or(false)
}


pub fn write_file(filename: &Path, contents: &str) {
    let result = File::create(filename).and_then(|mut file| file.write_all(contents.as_bytes()));
    check_write(result, filename);
}


/// Turns a failed write into the usual fail-fast exit.
pub fn check_write(result: io::Result<()>, filename: &Path) {
    if let Err(e) = result {
        quit_with_error(&format!("failed to write {}\n{}", filename.display(), e));
    }
}


#[cfg(not(test))]
pub fn quit_with_error(text: &str) -> ! {
    // For friendly error messages, this function normally just prints the error and quits.
    eprintln!();
    eprintln!("Error: {}", text);
    std::process::exit(1);
}
#[cfg(test)]
pub fn quit_with_error(text: &str) -> ! {
    // But when running unit tests, this function instead panics so I can catch it for the test.
    panic!("{}", text);
}


pub fn load_fasta(filename: &Path) -> Vec<(String, String, String)> {
    match try_load_fasta(filename) {
        Ok(fasta_seqs) => fasta_seqs,
        Err(e)         => quit_with_error(&e),
    }
}


pub fn try_load_fasta(filename: &Path) -> Result<Vec<(String, String, String)>, String> {
    // This function loads a FASTA file and runs a few checks on the result. If everything looks
    // good, it returns a vector of name+header+sequence tuples. Problems are returned as text so
    // the validation phase can report them alongside other configuration errors.
    let fasta_seqs = read_fasta(filename)
        .map_err(|e| format!("unable to load {}\n{}", filename.display(), e))?;
    if fasta_seqs.is_empty() {
        return Err(format!("{} contains no sequences", filename.display()));
    }
    let mut set = HashSet::new();
    for (name, _, sequence) in &fasta_seqs {
        if name.is_empty() {
            return Err(format!("{} has an unnamed sequence", filename.display()));
        }
        if sequence.is_empty() {
            return Err(format!("{} has an empty sequence", filename.display()));
        }
        if !set.insert(name) {
            return Err(format!("{} has a duplicate name: {}", filename.display(), name));
        }
    }
    Ok(fasta_seqs)
}


pub fn contig_sizes(fasta_seqs: &[(String, String, String)]) -> Vec<(String, usize)> {
    fasta_seqs.iter().map(|(name, _, seq)| (name.clone(), seq.len())).collect()
}


/// Writes (header, sequence) pairs as FASTA with 80-column sequence lines.
pub fn write_fasta(filename: &Path, seqs: &[(String, String)]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(filename)?);
    for (header, seq) in seqs {
        writeln!(writer, ">{}", header)?;
        for chunk in seq.as_bytes().chunks(80) {
            writer.write_all(chunk)?;
            writeln!(writer)?;
        }
    }
    writer.flush()
}


fn open_maybe_gzipped(filename: &Path) -> io::Result<Box<dyn Read>> {
    let file = File::open(filename)?;
    if is_file_gzipped(filename)? { Ok(Box::new(MultiGzDecoder::new(file))) }
                             else { Ok(Box::new(file)) }
}


fn is_file_gzipped(filename: &Path) -> io::Result<bool> {
    // Looks at the first two bytes of the file. Files too small to hold a gzip header are treated
    // as plain text.
    let mut reader = BufReader::new(File::open(filename)?);
    let mut buf = vec![0u8; 2];
    match reader.read_exact(&mut buf) {
        Ok(_)  => Ok(buf[0] == 31 && buf[1] == 139),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}


fn read_fasta(filename: &Path) -> io::Result<Vec<(String, String, String)>> {
    let reader = BufReader::new(open_maybe_gzipped(filename)?);
    let mut fasta_seqs = Vec::new();
    let mut name = String::new();
    let mut header = String::new();
    let mut sequence = String::new();
    for line in reader.lines() {
        let text = line?;
        if text.is_empty() {continue;}
        if let Some(stripped) = text.strip_prefix('>') {
            if !name.is_empty() {
                sequence.make_ascii_uppercase();
                fasta_seqs.push((name, header, sequence));
                sequence = String::new();
            }
            header = stripped.to_string();
            name = match stripped.split_whitespace().next() {
                Some(first_piece) => first_piece.to_string(),
                None => return Err(io::Error::new(io::ErrorKind::InvalidData,
                                                  "sequence header is missing a name")),
            };
        } else {
            if name.is_empty() {
                return Err(io::Error::new(io::ErrorKind::InvalidData,
                                          "sequence found before the first header"));
            }
            sequence.push_str(text.trim_end());
        }
    }
    if !name.is_empty() {
        sequence.make_ascii_uppercase();
        fasta_seqs.push((name, header, sequence));
    }
    Ok(fasta_seqs)
}


pub fn fastq_reader(fastq_file: &Path) -> Reader<BufReader<Box<dyn Read>>> {
    // Returns a reader for a FASTQ file that works on both unzipped and gzipped files.
    let reader = open_maybe_gzipped(fastq_file).unwrap_or_else(|e| {
        quit_with_error(&format!("unable to open {}\n{}", fastq_file.display(), e));
    });
    Reader::new(BufReader::new(reader))
}


pub fn format_duration(duration: Duration) -> String {
    let microseconds = duration.as_micros() % 1000000;
    let seconds =      duration.as_micros() / 1000000 % 60;
    let minutes =      duration.as_micros() / 1000000 / 60 % 60;
    let hours =        duration.as_micros() / 1000000 / 60 / 60;
    format!("{}:{:02}:{:02}.{:06}", hours, minutes, seconds, microseconds)
}


pub fn format_kmg(number: u64, decimals: usize) -> String {
    // Shortens a base count using G/M/K suffixes, e.g. 4_600_000 -> "4.6M" with one decimal.
    if number == 0 { return "0".to_string(); }
    for (power, unit) in [(1_000_000_000, "G"), (1_000_000, "M"), (1_000, "K"), (1, "")] {
        if number >= power {
            return format!("{:.*}{}", decimals, number as f64 / power as f64, unit);
        }
    }
    unreachable!()
}


fn nice_number(x: f64, round: bool) -> f64 {
    let exp = x.log10().floor();
    let f = x / 10f64.powf(exp);
    let nf = if round {
        if f < 1.5 { 1.0 } else if f < 3.0 { 2.0 } else if f < 7.0 { 5.0 } else { 10.0 }
    } else if f <= 1.0 { 1.0 } else if f <= 2.0 { 2.0 } else if f <= 5.0 { 5.0 } else { 10.0 };
    nf * 10f64.powf(exp)
}


pub fn pretty_ticks(low: f64, high: f64, n: usize) -> Vec<u64> {
    // Evenly spaced round-number tick positions covering low..high, with roughly n ticks.
    if high <= low || n < 2 { return vec![low.max(0.0) as u64]; }
    let range = nice_number(high - low, false);
    let d = nice_number(range / (n - 1) as f64, true);
    let min_y = (low / d).floor() * d;
    let max_y = (high / d).ceil() * d;
    let mut ticks = Vec::new();
    let mut tick = min_y;
    while tick < max_y + 0.5 * d {
        ticks.push(tick as u64);
        tick += d;
    }
    ticks
}


pub fn spinner(message: &str) -> ProgressBar {
    if cfg!(test) {
        ProgressBar::hidden() // don't show a spinner during unit tests
    } else {
        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_style(
            ProgressStyle::default_spinner()
                .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
                .template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use crate::tests::{make_test_file, make_gzipped_test_file};

    #[test]
    fn test_format_duration() {
        let d1 = Duration::from_micros(123456789);
        let d2 = Duration::from_micros(3661000001);
        assert_eq!(format_duration(d1), "0:02:03.456789");
        assert_eq!(format_duration(d2), "1:01:01.000001");
    }

    #[test]
    fn test_format_kmg() {
        assert_eq!(format_kmg(0, 0), "0");
        assert_eq!(format_kmg(999, 0), "999");
        assert_eq!(format_kmg(1500, 1), "1.5K");
        assert_eq!(format_kmg(4_600_000, 1), "4.6M");
        assert_eq!(format_kmg(2_000_000_000, 0), "2G");
    }

    #[test]
    fn test_pretty_ticks() {
        let ticks = pretty_ticks(1.0, 5_000_000.0, 12);
        assert_eq!(ticks[0], 0);
        assert_eq!(ticks[1], 500_000);
        assert_eq!(*ticks.last().unwrap(), 5_000_000);
        assert_eq!(pretty_ticks(10.0, 10.0, 12), vec![10]);
    }

    #[test]
    fn test_load_fasta() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("plain.fasta");
        let gzipped = dir.path().join("gzipped.fasta.gz");
        make_test_file(&plain, ">a info\nacgt\nACGT\n>b\nGG\n");
        make_gzipped_test_file(&gzipped, ">a info\nacgt\nACGT\n>b\nGG\n");
        for filename in [plain, gzipped] {
            let seqs = load_fasta(&filename);
            assert_eq!(seqs.len(), 2);
            assert_eq!(seqs[0], ("a".to_string(), "a info".to_string(), "ACGTACGT".to_string()));
            assert_eq!(contig_sizes(&seqs), vec![("a".to_string(), 8), ("b".to_string(), 2)]);
        }
    }

    #[test]
    fn test_try_load_fasta_problems() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.fasta");
        let duplicate = dir.path().join("duplicate.fasta");
        let headless = dir.path().join("headless.fasta");
        make_test_file(&empty, "");
        make_test_file(&duplicate, ">a\nACGT\n>a\nACGT\n");
        make_test_file(&headless, "ACGT\n>a\nACGT\n");
        assert!(try_load_fasta(&empty).unwrap_err().contains("contains no sequences"));
        assert!(try_load_fasta(&duplicate).unwrap_err().contains("duplicate name"));
        assert!(try_load_fasta(&headless).is_err());
        assert!(try_load_fasta(&dir.path().join("missing.fasta")).is_err());
    }

    #[test]
    fn test_write_fasta() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("out.fasta");
        let long_seq = "A".repeat(100);
        write_fasta(&fasta, &[("contig_1 length=100".to_string(), long_seq.clone()),
                              ("contig_2".to_string(), "CG".to_string())]).unwrap();
        let contents = std::fs::read_to_string(&fasta).unwrap();
        assert_eq!(contents, format!(">contig_1 length=100\n{}\n{}\n>contig_2\nCG\n",
                                     &long_seq[..80], &long_seq[80..]));
    }

    #[test]
    fn test_file_has_content() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.txt");
        let full = dir.path().join("full.txt");
        make_test_file(&empty, "");
        make_test_file(&full, "x");
        assert!(!file_has_content(&empty));
        assert!(file_has_content(&full));
        assert!(!file_has_content(&dir.path().join("missing.txt")));
        assert!(!file_has_content(dir.path()));
    }
}
