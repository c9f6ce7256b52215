// This file contains functions for printing progress and writing the run transcript.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of Pima. Pima is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software Foundation, either
// version 3 of the License, or (at your option) any later version. Pima is distributed in the hope
// that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details. You should have received a copy of the GNU General Public License along with Pima.
// If not, see <http://www.gnu.org/licenses/>.

use chrono::Local;
use colored::{Color, Colorize};
use std::fs::File;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;


pub const ERROR_VERBOSITY: u8 = 0;
pub const MAIN_PROCESS_VERBOSITY: u8 = 1;
pub const WARNING_VERBOSITY: u8 = 1;
pub const SUB_PROCESS_VERBOSITY: u8 = 2;
pub const COMMAND_VERBOSITY: u8 = 3;


pub fn section_header(text: &str) {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let date = format!("({})", now);
    eprintln!();
    eprintln!("{} {}", text.bold().bright_yellow().underline(), date.dimmed());
}


pub fn explanation(text: &str) {
    let term_width = match term_size::dimensions() {
        Some((w, _)) => w.clamp(40, 100),
        None         => 80,
    };
    let wrapped = textwrap::fill(text, term_width);
    eprintln!("{}", wrapped.dimmed());
    eprintln!();
}


/// Prints timestamped progress lines to stderr (subject to the verbosity level) and copies every
/// line to the transcript file once one has been started.
pub struct Logger {
    verbosity: u8,
    transcript: Mutex<Option<File>>,
}

impl Logger {
    pub fn new(verbosity: u8) -> Self {
        Logger { verbosity, transcript: Mutex::new(None) }
    }

    pub fn verbosity(&self) -> u8 { self.verbosity }

    pub fn set_verbosity(&mut self, verbosity: u8) { self.verbosity = verbosity; }

    pub fn start_transcript(&self, filename: &Path) -> io::Result<()> {
        let file = File::create(filename)?;
        if let Ok(mut transcript) = self.transcript.lock() {
            *transcript = Some(file);
        }
        Ok(())
    }

    pub fn main_process(&self, text: &str) {
        self.print(text, MAIN_PROCESS_VERBOSITY, Some(Color::Green));
    }

    pub fn sub_process(&self, text: &str) {
        self.print(text, SUB_PROCESS_VERBOSITY, Some(Color::Blue));
    }

    pub fn command(&self, text: &str) {
        self.print(text, COMMAND_VERBOSITY, None);
    }

    pub fn warning(&self, text: &str) {
        self.print(text, WARNING_VERBOSITY, Some(Color::Yellow));
    }

    pub fn error(&self, text: &str) {
        self.print(text, ERROR_VERBOSITY, Some(Color::Red));
    }

    fn print(&self, text: &str, level: u8, colour: Option<Color>) {
        let time_string = format!("[{}]", Local::now().format("%Y-%m-%d %H:%M:%S"));
        if level <= self.verbosity {
            match colour {
                Some(c) => eprintln!("{} {}", time_string, text.color(c)),
                None    => eprintln!("{} {}", time_string, text),
            }
        }
        if let Ok(mut transcript) = self.transcript.lock() {
            if let Some(file) = transcript.as_mut() {
                // A transcript write failure shouldn't stop the pipeline.
                let _ = writeln!(file, "{} {}", time_string, text);
            }
        }
    }
}
