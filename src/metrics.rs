// This file contains the code for Pima's per-step metrics, saved as YAML and reported as tables.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::io::Write;
use std::path::Path;


#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ReadSetMetrics {
    pub count: usize,
    pub bases: u64,
    pub n50: u64,
    pub mean_length: f64,
}

impl ReadSetMetrics {
    pub fn new(sorted_read_lengths: &[u64]) -> Self {
        // Read lengths should be sorted from longest to shortest.
        let bases: u64 = sorted_read_lengths.iter().sum();
        let mut running_total = 0;
        let mut n50 = 0;
        for read_length in sorted_read_lengths {
            running_total += read_length;
            if running_total * 2 > bases {
                n50 = *read_length;
                break;
            }
        }
        let count = sorted_read_lengths.len();
        let mean_length = if count == 0 { 0.0 } else { bases as f64 / count as f64 };
        ReadSetMetrics { count, bases, n50, mean_length }
    }

    pub fn save_to_yaml(&self, filename: &Path) -> io::Result<()> { save_yaml(filename, self) }
}


#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct AssemblyMetrics {
    pub contig_count: usize,
    pub total_length: u64,
    pub largest_contig: u64,
    pub n50: u64,
    pub small_contig_count: usize,
}

impl AssemblyMetrics {
    pub fn new(contigs: &[(String, usize)], small_contig_max: usize) -> Self {
        let mut lengths: Vec<u64> = contigs.iter().map(|(_, l)| *l as u64).collect();
        lengths.sort_unstable_by(|a, b| b.cmp(a));
        let read_set = ReadSetMetrics::new(&lengths);
        AssemblyMetrics {
            contig_count: contigs.len(),
            total_length: read_set.bases,
            largest_contig: lengths.first().copied().unwrap_or(0),
            n50: read_set.n50,
            small_contig_count: contigs.iter().filter(|(_, l)| *l <= small_contig_max).count(),
        }
    }

    pub fn save_to_yaml(&self, filename: &Path) -> io::Result<()> { save_yaml(filename, self) }
}


#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ReferenceMetrics {
    pub identity: f64,
    pub aligned_bases: u64,
    pub aligned_fraction: f64,
    pub snp_count: usize,
    pub small_indel_count: usize,
    pub reference_insertion_count: usize,
    pub query_insertion_count: usize,
}

impl ReferenceMetrics {
    pub fn save_to_yaml(&self, filename: &Path) -> io::Result<()> { save_yaml(filename, self) }
}


#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct QuastMetrics {
    pub total_length: u64,
    pub mismatches: u64,
    pub indels: u64,
}

impl QuastMetrics {
    pub fn save_to_yaml(&self, filename: &Path) -> io::Result<()> { save_yaml(filename, self) }
}


pub fn save_yaml<T: Serialize>(yaml_filename: &Path, data: T) -> io::Result<()> {
    let yaml_string = serde_yaml::to_string(&data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut file = File::create(yaml_filename)?;
    file.write_all(yaml_string.as_bytes())?;
    Ok(())
}


// This macro adds get_val_by_name, get_field_names and rows methods to the metric structs.
macro_rules! impl_metrics_helpers {
    ($struct_name:ty) => {
        impl $struct_name {
            pub fn get_val_by_name(&self, name: &str) -> Option<String> {
                serde_json::to_value(self).ok()?.get(name).map(|v| v.to_string())
            }
            pub fn get_field_names() -> Vec<String> {
                let mut field_names: Vec<String> = match serde_json::to_value(Self::default())
                    .ok().as_ref().and_then(|v| v.as_object())
                {
                    Some(map) => map.keys().cloned().collect(),
                    None => Vec::new(),
                };
                field_names.sort();
                field_names
            }
            pub fn rows(&self) -> Vec<Vec<String>> {
                Self::get_field_names().into_iter()
                    .filter_map(|name| self.get_val_by_name(&name).map(|val| vec![name, val]))
                    .collect()
            }
        }
    };
}
impl_metrics_helpers!(ReadSetMetrics);
impl_metrics_helpers!(AssemblyMetrics);
impl_metrics_helpers!(ReferenceMetrics);
impl_metrics_helpers!(QuastMetrics);


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::read_to_string;
    use tempfile::tempdir;
    use crate::tests::assert_almost_eq;

    #[test]
    fn test_read_set_metrics() {
        let metrics = ReadSetMetrics::new(&[10, 8, 5, 3, 2]);
        assert_eq!(metrics.count, 5);
        assert_eq!(metrics.bases, 28);
        assert_eq!(metrics.n50, 8);
        assert_almost_eq(metrics.mean_length, 5.6, 1e-8);

        let empty = ReadSetMetrics::new(&[]);
        assert_eq!(empty.count, 0);
        assert_eq!(empty.n50, 0);
        assert_almost_eq(empty.mean_length, 0.0, 1e-8);
    }

    #[test]
    fn test_assembly_metrics() {
        let contigs = vec![("a".to_string(), 2000), ("b".to_string(), 5_000_000),
                           ("c".to_string(), 80_000)];
        let metrics = AssemblyMetrics::new(&contigs, 3000);
        assert_eq!(metrics.contig_count, 3);
        assert_eq!(metrics.total_length, 5_082_000);
        assert_eq!(metrics.largest_contig, 5_000_000);
        assert_eq!(metrics.n50, 5_000_000);
        assert_eq!(metrics.small_contig_count, 1);
    }

    #[test]
    fn test_field_names_and_rows() {
        assert_eq!(QuastMetrics::get_field_names(),
                   vec!["indels".to_string(), "mismatches".to_string(), "total_length".to_string()]);
        let metrics = QuastMetrics { total_length: 100, mismatches: 2, indels: 1 };
        assert_eq!(metrics.get_val_by_name("mismatches"), Some("2".to_string()));
        assert_eq!(metrics.get_val_by_name("nothing"), None);
        assert_eq!(metrics.rows()[2], vec!["total_length".to_string(), "100".to_string()]);
    }

    #[test]
    fn test_save_to_yaml() {
        let dir = tempdir().unwrap();
        let yaml = dir.path().join("metrics.yaml");
        ReadSetMetrics::new(&[4, 2]).save_to_yaml(&yaml).unwrap();
        let contents = read_to_string(&yaml).unwrap();
        assert!(contents.contains("count: 2"));
        assert!(contents.contains("n50: 4"));
    }
}
