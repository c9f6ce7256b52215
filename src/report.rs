// This file contains the bookkeeping steps that bracket every analysis: output directory setup,
// database downloads, the final report and clean-up.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::fs;

use crate::ledger::{Content, Report, Section, Table, META_TITLE, SUMMARY_TITLE, WARNINGS_TITLE};
use crate::metrics::save_yaml;
use crate::misc::{check_write, create_dir, delete_dir_if_exists, file_has_content,
                  quit_with_error, write_file};
use crate::options::DOWNLOADABLE_DATABASES;
use crate::pipeline::Pipeline;
use crate::plan::Step;


pub const DATABASE_URL: &str = "http://pima.appliedbinf.com/data";


pub fn make_output_dir(p: &mut Pipeline) {
    let output_dir = p.output_dir();
    p.log.main_process(&format!("Making output directory {}", output_dir.display()));
    delete_dir_if_exists(&output_dir);
    create_dir(&output_dir);

    let mut analysis = vec![Step::MakeOutputDir.name().to_string()];
    analysis.extend(p.plan.iter().map(|entry| entry.to_string()));
    write_file(&output_dir.join("analysis.txt"), &format!("{}\n", analysis.join("\n")));

    let transcript = output_dir.join("log.txt");
    if let Err(e) = p.log.start_transcript(&transcript) {
        quit_with_error(&format!("failed to create {}\n{}", transcript.display(), e));
    }
}


pub fn download_databases(p: &mut Pipeline) {
    p.log.main_process("Downloading missing databases");
    let data_dir = p.config.opts.data_dir.clone();
    create_dir(&data_dir);
    for database in DOWNLOADABLE_DATABASES {
        let fasta = data_dir.join(format!("{}.fasta", database));
        if file_has_content(&fasta) {
            p.log.sub_process(&format!("{} is already present", fasta.display()));
            continue;
        }
        p.log.sub_process(&format!("Downloading {}", fasta.display()));
        p.run_command(&format!("wget -O {} {}/{}.fasta", fasta.display(), DATABASE_URL, database));
        p.require_output(&fasta, "Downloaded database");
    }
}


pub fn make_report(p: &mut Pipeline) {
    p.log.main_process("Making report");
    let report_dir = p.start_step("report");

    let versions = version_table(&p.config.derived.versions);
    p.report.section_mut(&[META_TITLE]).set("Tool versions", Content::Table(versions));
    let warnings = p.ledger.warnings.clone();
    p.report.section_mut(&[SUMMARY_TITLE]).set(WARNINGS_TITLE, Content::Notes(warnings));

    let report_yaml = report_dir.join("report.yaml");
    check_write(save_yaml(&report_yaml, &p.report), &report_yaml);

    let report_tex = report_dir.join("report.tex");
    write_file(&report_tex, &render_latex(&p.report));

    p.log.sub_process("Typesetting the report");
    let bundle = match &p.config.opts.bundle {
        Some(bundle) => {
            let bundle = fs::canonicalize(bundle).unwrap_or_else(|_| bundle.clone());
            format!(" --bundle {}", bundle.display())
        }
        None => String::new(),
    };
    p.run_command(&format!("cd {} && tectonic{} report.tex 1> tectonic.stdout \
                            2> tectonic.stderr", report_dir.display(), bundle));
    p.require_output(&report_dir.join("report.pdf"), "Report PDF");
    p.finish_step(&report_dir);
}


pub fn clean_up(p: &mut Pipeline) {
    p.log.main_process("Cleaning up");
    let output_dir = p.output_dir();
    if let Some(genome) = p.config.state.genome_fasta.clone() {
        if genome.is_file() {
            let final_fasta = output_dir.join("assembly.fasta");
            if genome != final_fasta {
                if let Err(e) = fs::copy(&genome, &final_fasta) {
                    quit_with_error(&format!("failed to copy {}\n{}", genome.display(), e));
                }
            }
        }
    }
    for filename in p.config.state.files_to_clean.clone() {
        if !filename.is_file() {
            continue;
        }
        p.log.sub_process(&format!("Removing {}", filename.display()));
        if let Err(e) = fs::remove_file(&filename) {
            quit_with_error(&format!("failed to remove {}\n{}", filename.display(), e));
        }
    }
}


pub fn version_table(versions: &BTreeMap<String, String>) -> Table {
    let mut table = Table::new(&["tool", "version"]);
    for (tool, version) in versions {
        table.push(vec![tool.clone(), version.clone()]);
    }
    table
}


/// Renders the report record as a LaTeX document. Top-level entries become sections and nested
/// ones subsections; empty entries are left out.
pub fn render_latex(report: &Report) -> String {
    let mut tex = String::new();
    let name = match report.root.get("name") {
        Some(Content::Text(name)) => name.clone(),
        _ => String::new(),
    };
    tex.push_str("\\documentclass[11pt]{article}\n");
    tex.push_str("\\usepackage[margin=2cm]{geometry}\n");
    tex.push_str("\\usepackage{graphicx}\n");
    tex.push_str("\\usepackage{longtable}\n");
    let _ = writeln!(tex, "\\title{{{}}}", latex_escape(&name));
    tex.push_str("\\date{\\today}\n");
    tex.push_str("\\begin{document}\n\\maketitle\n");
    render_section(&mut tex, &report.root, 0);
    tex.push_str("\\end{document}\n");
    tex
}


fn render_section(tex: &mut String, section: &Section, depth: usize) {
    let heading = match depth {
        0 => "section",
        1 => "subsection",
        _ => "subsubsection",
    };
    for (title, content) in section.entries() {
        if (title == "name" && depth == 0) || is_empty(content) {
            continue;
        }
        let _ = writeln!(tex, "\\{}*{{{}}}", heading, latex_escape(title));
        match content {
            Content::Text(text) => {
                let _ = writeln!(tex, "{}\n", latex_escape(text));
            }
            Content::Notes(notes) => {
                tex.push_str("\\begin{itemize}\n");
                for note in notes {
                    let _ = writeln!(tex, "\\item {}", latex_escape(note));
                }
                tex.push_str("\\end{itemize}\n");
            }
            Content::Table(table) => render_table(tex, table),
            Content::Image(png) => {
                // Typesetting happens inside the report directory.
                let png = fs::canonicalize(png).unwrap_or_else(|_| png.clone());
                let _ = writeln!(tex, "\\includegraphics[width=\\textwidth]{{{}}}\n",
                                 png.display());
            }
            Content::Section(subsection) => render_section(tex, subsection, depth + 1),
        }
    }
}


fn render_table(tex: &mut String, table: &Table) {
    let columns = table.header.len().max(1);
    let _ = writeln!(tex, "\\begin{{longtable}}{{{}}}", "l".repeat(columns));
    let header: Vec<String> = table.header.iter().map(|h| latex_escape(h)).collect();
    let _ = writeln!(tex, "{} \\\\\n\\hline", header.join(" & "));
    for row in &table.rows {
        let cells: Vec<String> = row.iter().map(|c| latex_escape(c)).collect();
        let _ = writeln!(tex, "{} \\\\", cells.join(" & "));
    }
    tex.push_str("\\end{longtable}\n");
}


fn is_empty(content: &Content) -> bool {
    match content {
        Content::Text(text)     => text.is_empty(),
        Content::Notes(notes)   => notes.is_empty(),
        Content::Table(table)   => table.is_empty(),
        Content::Image(_)       => false,
        Content::Section(s)     => s.entries().iter().all(|(_, c)| is_empty(c)),
    }
}


pub fn latex_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => { escaped.push('\\'); escaped.push(c); }
            '~' => escaped.push_str("\\textasciitilde{}"),
            '^' => escaped.push_str("\\textasciicircum{}"),
            '>' => escaped.push_str("\\textgreater{}"),
            '<' => escaped.push_str("\\textless{}"),
            _ => escaped.push(c),
        }
    }
    escaped
}


#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use std::path::PathBuf;
    use tempfile::tempdir;
    use crate::config::Config;
    use crate::ledger::{ASSEMBLY_NOTES, FEATURE_TITLE};
    use crate::options::Options;
    use crate::runner::Runner;
    use crate::tests::make_test_file;

    #[test]
    fn test_latex_escape() {
        assert_eq!(latex_escape("blaKPC_2 & 50%"), "blaKPC\\_2 \\& 50\\%");
        assert_eq!(latex_escape("A->T"), "A-\\textgreater{}T");
        assert_eq!(latex_escape("plain text"), "plain text");
    }

    #[test]
    fn test_render_latex() {
        let mut report = Report::new("Sample_1");
        report.add_note(&ASSEMBLY_NOTES, "low coverage");
        let mut table = Table::new(&["contig", "gene"]);
        table.push(vec!["contig_1".to_string(), "tetA".to_string()]);
        report.section_mut(&[FEATURE_TITLE]).set("amr", Content::Table(table));
        let tex = render_latex(&report);
        assert!(tex.contains("\\title{Sample\\_1}"));
        assert!(tex.contains("\\section*{Assembly}"));
        assert!(tex.contains("\\subsection*{Assembly notes}"));
        assert!(tex.contains("\\item low coverage"));
        assert!(tex.contains("contig\\_1 & tetA \\\\"));
        assert!(!tex.contains("Plasmid annotation"));
        assert!(tex.trim_end().ends_with("\\end{document}"));
    }

    #[test]
    fn test_version_table() {
        let versions = btreemap! { "flye".to_string() => "2.9.2".to_string(),
                                   "blastn".to_string() => "2.14.0".to_string() };
        let table = version_table(&versions);
        assert_eq!(table.rows, vec![vec!["blastn", "2.14.0"], vec!["flye", "2.9.2"]]);
    }

    #[test]
    fn test_make_output_dir_writes_analysis() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out");
        let opts = Options { output: Some(output.clone()), ..Default::default() };
        let mut p = Pipeline::unvalidated(Config::new(opts), Runner::new(true));
        p.plan.extend(&[Step::FlyeOntFastq, Step::CleanUp]);
        make_output_dir(&mut p);
        let analysis = fs::read_to_string(output.join("analysis.txt")).unwrap();
        assert_eq!(analysis, "make_output_dir\nflye_ont_fastq\nclean_up\n");
        assert!(output.join("log.txt").is_file());
    }

    #[test]
    fn test_clean_up() {
        let dir = tempdir().unwrap();
        let genome = dir.path().join("polished.fasta");
        let temp_bam = dir.path().join("reads.bam");
        make_test_file(&genome, ">contig_1\nACGT\n");
        make_test_file(&temp_bam, "bam");
        let opts = Options { output: Some(dir.path().to_path_buf()), ..Default::default() };
        let mut p = Pipeline::unvalidated(Config::new(opts), Runner::new(false));
        p.config.state.genome_fasta = Some(genome);
        p.clean_later(&temp_bam);
        p.clean_later(&PathBuf::from("/nonexistent/file.sam"));
        clean_up(&mut p);
        assert!(!temp_bam.exists());
        assert_eq!(fs::read_to_string(dir.path().join("assembly.fasta")).unwrap(),
                   ">contig_1\nACGT\n");
    }
}
