// This file contains the command runner: the one place where Pima shells out to external tools.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use regex::Regex;
use std::env;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::log::Logger;
use crate::misc::{file_has_content, load_file_lines, quit_with_error};


/// Runs shell commands for the pipeline. In a fake run nothing is executed, commands return no
/// output and output-file checks are assumed to pass.
#[derive(Clone, Debug, Default)]
pub struct Runner {
    fake_run: bool,
    search_path: Option<OsString>,
}

impl Runner {
    pub fn new(fake_run: bool) -> Self {
        Runner { fake_run, search_path: None }
    }

    /// Restricts both tool lookup and command execution to the given PATH value.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn is_fake(&self) -> bool { self.fake_run }

    pub fn run(&self, log: &Logger, command: &str) -> Vec<String> {
        log.command(command);
        if self.fake_run {
            return Vec::new();
        }
        self.execute(log, command)
    }

    /// Like run, but a failing command is reported instead of ending the program. Always succeeds
    /// in a fake run.
    pub fn try_run(&self, log: &Logger, command: &str) -> bool {
        log.command(command);
        if self.fake_run {
            return true;
        }
        let mut shell = self.shell(command);
        matches!(shell.status(), Ok(status) if status.success())
    }

    /// Runs a read-only query such as a tool version check. A failing query is returned as None
    /// instead of ending the program. Nothing is executed in a fake run.
    pub fn query(&self, log: &Logger, command: &str) -> Option<Vec<String>> {
        log.command(command);
        if self.fake_run {
            return None;
        }
        let output = self.shell(command).output().ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).lines().map(String::from).collect())
    }

    fn shell(&self, command: &str) -> Command {
        let mut shell = Command::new("/bin/sh");
        shell.arg("-c").arg(command);
        if let Some(path) = &self.search_path {
            shell.env("PATH", path);
        }
        shell
    }

    fn execute(&self, log: &Logger, command: &str) -> Vec<String> {
        let mut shell = self.shell(command);
        let output = match shell.output() {
            Ok(output) => output,
            Err(e) => {
                log.error(&format!("Command {} failed; exiting", command));
                quit_with_error(&format!("could not start shell\n{}", e));
            }
        };
        if !output.status.success() {
            log.error(&format!("Command {} failed; exiting", command));
            quit_with_error(&format!("command failed: {}", command));
        }
        String::from_utf8_lossy(&output.stdout).lines().map(String::from).collect()
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        match &self.search_path {
            Some(path) => {
                let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
                which::which_in(tool, Some(path), cwd).is_ok()
            }
            None => which::which(tool).is_ok(),
        }
    }

    /// Runs a version command and pulls the first dotted version number out of the given output
    /// line. Returns None when the tool printed nothing usable.
    /// In a fake run the version is unknown. A failing version command is an error.
    pub fn tool_version(&self, log: &Logger, command: &str, line: usize)
            -> Result<Option<String>, String> {
        if self.fake_run {
            log.command(command);
            return Ok(None);
        }
        let output = self.query(log, command).ok_or_else(|| format!("{} failed", command))?;
        Ok(output.get(line).and_then(|l| extract_version(l)))
    }

    /// Predicate-time file check: the file must exist and be non-empty. Always passes in a fake
    /// run.
    pub fn file_ok(&self, filename: &Path) -> bool {
        self.fake_run || file_has_content(filename)
    }

    /// Step-time output check: quits when an expected output is missing or empty. Skipped in a
    /// fake run.
    pub fn require_output(&self, log: &Logger, filename: &Path, what: &str, missing: &str,
                          empty: &str) {
        if self.fake_run {
            return;
        }
        if !filename.is_file() {
            let message = format!("{} {} {}", what, filename.display(), missing);
            log.error(&message);
            quit_with_error(&message);
        }
        if !file_has_content(filename) {
            let message = format!("{} {} {}", what, filename.display(), empty);
            log.error(&message);
            quit_with_error(&message);
        }
    }

    /// Reads a tool's output file. A file that a fake run never produced reads as empty.
    pub fn read_lines(&self, filename: &Path) -> Vec<String> {
        if self.fake_run && !filename.is_file() {
            return Vec::new();
        }
        load_file_lines(filename)
    }
}


pub fn extract_version(text: &str) -> Option<String> {
    let re = Regex::new(r"[0-9]+\.[0-9.]+").ok()?;
    re.find(text).map(|m| m.as_str().to_string())
}


pub fn std_files(prefix: &Path) -> (PathBuf, PathBuf) {
    let prefix = prefix.display();
    (PathBuf::from(format!("{}.stdout", prefix)), PathBuf::from(format!("{}.stderr", prefix)))
}


pub fn touch(filename: &Path) {
    if let Err(e) = File::create(filename) {
        quit_with_error(&format!("failed to create {}\n{}", filename.display(), e));
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use crate::tests::{make_fake_tool, make_test_file};

    #[test]
    fn test_extract_version() {
        assert_eq!(extract_version("Flye 2.9.2-b1786"), Some("2.9.2".to_string()));
        assert_eq!(extract_version("v1.0 and 2.0"), Some("1.0".to_string()));
        assert_eq!(extract_version("samtools 1.17\nUsing htslib 1.17"), Some("1.17".to_string()));
        assert_eq!(extract_version("no version here"), None);
        assert_eq!(extract_version("version 3"), None);
    }

    #[test]
    fn test_std_files() {
        let (stdout, stderr) = std_files(Path::new("out/flye"));
        assert_eq!(stdout, PathBuf::from("out/flye.stdout"));
        assert_eq!(stderr, PathBuf::from("out/flye.stderr"));
    }

    #[test]
    fn test_run_captures_lines() {
        let runner = Runner::new(false);
        let log = Logger::new(0);
        assert_eq!(runner.run(&log, "printf 'a\\nb\\n'"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_fake_run_executes_nothing() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("marker");
        let runner = Runner::new(true);
        let log = Logger::new(0);
        let output = runner.run(&log, &format!("touch {}", marker.display()));
        assert!(output.is_empty());
        assert!(!marker.exists());
    }

    #[test]
    #[should_panic(expected = "command failed")]
    fn test_failed_command_quits() {
        Runner::new(false).run(&Logger::new(0), "exit 3");
    }

    #[test]
    fn test_try_run() {
        let log = Logger::new(0);
        assert!(Runner::new(false).try_run(&log, "true"));
        assert!(!Runner::new(false).try_run(&log, "exit 3"));
        assert!(Runner::new(true).try_run(&log, "exit 3"));
    }

    #[test]
    fn test_tool_lookup_and_version() {
        let dir = tempdir().unwrap();
        make_fake_tool(dir.path(), "flye", "echo 2.9.2-b1786");
        let runner = Runner::new(false).with_search_path(dir.path());
        let log = Logger::new(0);
        assert!(runner.has_tool("flye"));
        assert!(!runner.has_tool("miniasm"));
        assert_eq!(runner.tool_version(&log, "flye --version", 0),
                   Ok(Some("2.9.2".to_string())));
        assert_eq!(runner.tool_version(&log, "flye --version", 1), Ok(None));
    }

    #[test]
    fn test_version_queries() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("marker");
        make_fake_tool(dir.path(), "flye", &format!(": > {}\nexit 2", marker.display()));
        let log = Logger::new(0);

        let fake = Runner::new(true).with_search_path(dir.path());
        assert_eq!(fake.tool_version(&log, "flye --version", 0), Ok(None));
        assert_eq!(fake.query(&log, "flye --version"), None);
        assert!(!marker.exists());

        let real = Runner::new(false).with_search_path(dir.path());
        assert_eq!(real.tool_version(&log, "flye --version", 0),
                   Err("flye --version failed".to_string()));
        assert!(marker.exists());
        assert_eq!(real.query(&log, "echo 1.2"), Some(vec!["1.2".to_string()]));
    }

    #[test]
    fn test_file_checks() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.txt");
        make_test_file(&empty, "");
        assert!(!Runner::new(false).file_ok(&empty));
        assert!(Runner::new(true).file_ok(&empty));
        assert!(Runner::new(true).file_ok(&dir.path().join("missing.txt")));
        Runner::new(true).require_output(&Logger::new(0), &dir.path().join("missing.txt"),
                                         "Output", "is missing", "is empty");
        assert!(Runner::new(true).read_lines(&dir.path().join("missing.txt")).is_empty());
    }

    #[test]
    #[should_panic(expected = "is empty")]
    fn test_require_output_empty() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.txt");
        make_test_file(&empty, "");
        Runner::new(false).require_output(&Logger::new(0), &empty, "Output", "is missing",
                                          "is empty");
    }
}
