//! Per-file progress output.

use std::io::{self, Write};

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Uploaded, or would have been in a dry run
    Uploaded,
    /// Content unchanged since the last sync
    Skipped,
}

impl Outcome {
    pub fn marker(&self) -> char {
        match self {
            Outcome::Uploaded => '+',
            Outcome::Skipped => ' ',
        }
    }
}

/// `+ key` or `  key`
pub fn format_line(key: &str, outcome: Outcome) -> String {
    format!("{} {}", outcome.marker(), key)
}

/// Receives one call per processed file, from any worker. A failed write
/// aborts the run like any other error.
pub trait Reporter: Send + Sync {
    fn report(&self, key: &str, outcome: Outcome) -> io::Result<()>;
}

/// Prints progress lines to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    fn report(&self, key: &str, outcome: Outcome) -> io::Result<()> {
        // One locked write per line keeps lines from concurrent workers whole
        let mut out = io::stdout().lock();
        writeln!(out, "{}", format_line(key, outcome))
    }
}
