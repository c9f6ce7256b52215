// This file contains the error/warning ledger and the report record that steps fill in as they run.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;


pub const SUMMARY_TITLE: &str = "PIMA run summary";
pub const ASSEMBLY_TITLE: &str = "Assembly";
pub const ASSEMBLY_NOTES_TITLE: &str = "Assembly notes";
pub const ALIGNMENT_TITLE: &str = "Comparison with reference";
pub const ALIGNMENT_NOTES_TITLE: &str = "Alignment notes";
pub const CONTIG_ALIGNMENT_TITLE: &str = "Alignment vs. reference contigs";
pub const FEATURE_TITLE: &str = "Features found in the assembly";
pub const FEATURE_PLOT_TITLE: &str = "Feature annotation plots";
pub const MUTATION_TITLE: &str = "Mutations";
pub const LARGE_INDEL_TITLE: &str = "Large insertions & deletions";
pub const SNP_INDEL_TITLE: &str = "SNPs and small indels";
pub const PLASMID_TITLE: &str = "Plasmid annotation";
pub const STATS_TITLE: &str = "Assembly statistics";
pub const AMR_MATRIX_TITLE: &str = "AMR matrix";
pub const METHODS_TITLE: &str = "Methods summary";
pub const BASECALLING_METHODS: &str = "Basecalling & processing";
pub const ASSEMBLY_METHODS: &str = "Assembly & polishing";
pub const REFERENCE_METHODS: &str = "Reference comparison";
pub const FEATURE_METHODS: &str = "Feature annotation";
pub const MUTATION_METHODS: &str = "Mutation screening";
pub const PLASMID_METHODS: &str = "Plasmid annotation";
pub const META_TITLE: &str = "PIMA meta-information";
pub const WARNINGS_TITLE: &str = "Warnings";

pub const ASSEMBLY_NOTES: [&str; 2] = [ASSEMBLY_TITLE, ASSEMBLY_NOTES_TITLE];
pub const ALIGNMENT_NOTES: [&str; 2] = [ALIGNMENT_TITLE, ALIGNMENT_NOTES_TITLE];


#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Ledger {
    pub fn error(&mut self, text: impl Into<String>) { self.errors.push(text.into()); }

    pub fn warning(&mut self, text: impl Into<String>) { self.warnings.push(text.into()); }

    pub fn has_errors(&self) -> bool { !self.errors.is_empty() }
}


/// The batch of configuration errors that stopped a pipeline from executing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<String>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Errors:")?;
        for error in &self.0 {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl Error for ValidationErrors {}


#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(header: &[&str]) -> Self {
        Table { header: header.iter().map(|h| h.to_string()).collect(), rows: Vec::new() }
    }

    pub fn push(&mut self, row: Vec<String>) { self.rows.push(row); }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}


#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Notes(Vec<String>),
    Table(Table),
    Image(PathBuf),
    Section(Section),
}


/// An insertion-ordered mapping from titles to content.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Section {
    entries: Vec<(String, Content)>,
}

impl Section {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, title: &str) -> Option<&Content> {
        self.entries.iter().find(|(t, _)| t == title).map(|(_, c)| c)
    }

    pub fn titles(&self) -> Vec<&str> { self.entries.iter().map(|(t, _)| t.as_str()).collect() }

    pub fn entries(&self) -> &[(String, Content)] { &self.entries }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Replaces the content under an existing title (keeping its position) or adds a new one.
    pub fn set(&mut self, title: &str, content: Content) {
        match self.entries.iter_mut().find(|(t, _)| t == title) {
            Some((_, existing)) => *existing = content,
            None => self.entries.push((title.to_string(), content)),
        }
    }

    /// The subsection under the given title, created if needed. Non-section content already
    /// under that title is replaced.
    pub fn section_mut(&mut self, title: &str) -> &mut Section {
        let position = match self.entries.iter().position(|(t, _)| t == title) {
            Some(i) => i,
            None => {
                self.entries.push((title.to_string(), Content::Section(Section::new())));
                self.entries.len() - 1
            }
        };
        let content = &mut self.entries[position].1;
        if !matches!(content, Content::Section(_)) {
            *content = Content::Section(Section::new());
        }
        match content {
            Content::Section(section) => section,
            _ => unreachable!(),
        }
    }

    /// Walks down through nested sections, creating any that don't yet exist.
    pub fn path_mut(&mut self, path: &[&str]) -> &mut Section {
        let mut section = self;
        for title in path {
            section = section.section_mut(title);
        }
        section
    }

    pub fn add_note(&mut self, title: &str, note: &str) {
        match self.entries.iter_mut().find(|(t, _)| t == title) {
            Some((_, Content::Notes(notes))) => notes.push(note.to_string()),
            Some((_, other)) => *other = Content::Notes(vec![note.to_string()]),
            None => self.entries.push((title.to_string(), Content::Notes(vec![note.to_string()]))),
        }
    }
}

impl Serialize for Section {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (title, content) in &self.entries {
            map.serialize_entry(title, content)?;
        }
        map.end()
    }
}


/// The report record: the analysis name followed by the fixed report sections, which steps fill
/// in as they run.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub root: Section,
}

impl Report {
    pub fn new(name: &str) -> Self {
        let mut root = Section::new();
        root.set("name", Content::Text(name.to_string()));
        for title in [SUMMARY_TITLE, ASSEMBLY_TITLE] {
            root.section_mut(title);
        }
        root.path_mut(&[ASSEMBLY_TITLE]).set(ASSEMBLY_NOTES_TITLE, Content::Notes(Vec::new()));
        root.path_mut(&[ALIGNMENT_TITLE]).set(ALIGNMENT_NOTES_TITLE, Content::Notes(Vec::new()));
        root.path_mut(&[ALIGNMENT_TITLE, CONTIG_ALIGNMENT_TITLE]);
        for title in [FEATURE_TITLE, FEATURE_PLOT_TITLE, MUTATION_TITLE, LARGE_INDEL_TITLE,
                      SNP_INDEL_TITLE, PLASMID_TITLE, STATS_TITLE, AMR_MATRIX_TITLE] {
            root.section_mut(title);
        }
        for title in [BASECALLING_METHODS, ASSEMBLY_METHODS, REFERENCE_METHODS, FEATURE_METHODS,
                      MUTATION_METHODS, PLASMID_METHODS] {
            root.path_mut(&[METHODS_TITLE]).set(title, Content::Notes(Vec::new()));
        }
        Report { root }
    }

    pub fn section(&self, path: &[&str]) -> Option<&Section> {
        let mut section = &self.root;
        for title in path {
            section = match section.get(title)? {
                Content::Section(s) => s,
                _ => return None,
            };
        }
        Some(section)
    }

    pub fn section_mut(&mut self, path: &[&str]) -> &mut Section { self.root.path_mut(path) }

    pub fn add_method(&mut self, methods_section: &str, text: &str) {
        self.root.path_mut(&[METHODS_TITLE]).add_note(methods_section, text);
    }

    /// Adds a note to a notes list, e.g. ["Assembly", "Assembly notes"].
    pub fn add_note(&mut self, path: &[&str], text: &str) {
        if let Some((last, parents)) = path.split_last() {
            self.root.path_mut(parents).add_note(last, text);
        }
    }

    pub fn notes(&self, path: &[&str]) -> Vec<String> {
        let Some((last, parents)) = path.split_last() else { return Vec::new(); };
        match self.section(parents).and_then(|s| s.get(last)) {
            Some(Content::Notes(notes)) => notes.clone(),
            _ => Vec::new(),
        }
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.root.serialize(serializer)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_skeleton_order() {
        let report = Report::new("Sample 1");
        assert_eq!(report.root.titles(),
                   vec!["name", SUMMARY_TITLE, ASSEMBLY_TITLE, ALIGNMENT_TITLE, FEATURE_TITLE,
                        FEATURE_PLOT_TITLE, MUTATION_TITLE, LARGE_INDEL_TITLE, SNP_INDEL_TITLE,
                        PLASMID_TITLE, STATS_TITLE, AMR_MATRIX_TITLE, METHODS_TITLE]);
        assert_eq!(report.section(&[METHODS_TITLE]).unwrap().titles().len(), 6);
        assert_eq!(report.root.get("name"), Some(&Content::Text("Sample 1".to_string())));
    }

    #[test]
    fn test_notes_and_methods() {
        let mut report = Report::new("x");
        report.add_note(&[ASSEMBLY_TITLE, ASSEMBLY_NOTES_TITLE], "first");
        report.add_note(&[ASSEMBLY_TITLE, ASSEMBLY_NOTES_TITLE], "second");
        assert_eq!(report.notes(&[ASSEMBLY_TITLE, ASSEMBLY_NOTES_TITLE]),
                   vec!["first".to_string(), "second".to_string()]);
        report.add_method(ASSEMBLY_METHODS, "Assembled with Flye.");
        assert_eq!(report.notes(&[METHODS_TITLE, ASSEMBLY_METHODS]),
                   vec!["Assembled with Flye.".to_string()]);
        assert!(report.notes(&[]).is_empty());
    }

    #[test]
    fn test_set_keeps_position() {
        let mut section = Section::new();
        section.set("a", Content::Text("1".to_string()));
        section.set("b", Content::Text("2".to_string()));
        section.set("a", Content::Text("3".to_string()));
        assert_eq!(section.titles(), vec!["a", "b"]);
        assert_eq!(section.get("a"), Some(&Content::Text("3".to_string())));
        section.section_mut("b").set("c", Content::Image(PathBuf::from("c.png")));
        assert!(matches!(section.get("b"), Some(Content::Section(_))));
    }

    #[test]
    fn test_yaml_keeps_insertion_order() {
        let mut report = Report::new("x");
        let mut table = Table::new(&["contig", "size"]);
        table.push(vec!["chr".to_string(), "5000000".to_string()]);
        report.section_mut(&[FEATURE_TITLE]).set("amr", Content::Table(table));
        let yaml = serde_yaml::to_string(&report).unwrap();
        let name_pos = yaml.find("name: x").unwrap();
        let feature_pos = yaml.find(FEATURE_TITLE).unwrap();
        let methods_pos = yaml.find(METHODS_TITLE).unwrap();
        assert!(name_pos < feature_pos && feature_pos < methods_pos);
        assert!(yaml.contains("- contig"));
    }

    #[test]
    fn test_ledger() {
        let mut ledger = Ledger::default();
        assert!(!ledger.has_errors());
        ledger.warning("low coverage");
        assert!(!ledger.has_errors());
        ledger.error("Nothing to do!");
        assert!(ledger.has_errors());
        let errors = ValidationErrors(ledger.errors.clone());
        assert_eq!(errors.to_string(), "Errors:\nNothing to do!\n");
    }
}
