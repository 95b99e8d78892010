//! Terminal output for the command-line front end.
//!
//! Everything is written to stderr so stdout stays free for pipelines.
//!
//! # Examples
//!
//! ```
//! use pdfmerge::output::formatter::OutputFormatter;
//!
//! let formatter = OutputFormatter::new(false, false);
//! formatter.info("Merging 3 files...");
//! assert_eq!(
//!     OutputFormatter::progress_line(0.42, "Merging", "merged 1 of 3 documents"),
//!     "progress: 42% - Merging: merged 1 of 3 documents"
//! );
//! ```

use std::io::{self, IsTerminal, Write};

const RESET: &str = "\x1b[0m";

/// How a line is decorated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Plain,
    Done,
    Warn,
    Fail,
}

impl Tone {
    /// Leading marker and ANSI colour; plain lines get neither.
    fn style(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Plain => None,
            Self::Done => Some(("✓ ", "\x1b[32m")),
            Self::Warn => Some(("⚠ ", "\x1b[33m")),
            Self::Fail => Some(("✗ ", "\x1b[31m")),
        }
    }

    fn render(self, message: &str, colored: bool) -> String {
        match self.style() {
            None => message.to_string(),
            Some((marker, color)) if colored => format!("{color}{marker}{message}{RESET}"),
            Some((marker, _)) => format!("{marker}{message}"),
        }
    }
}

/// Quiet/verbose aware console printer.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    quiet: bool,
    verbose: bool,
    colored: bool,
}

impl OutputFormatter {
    /// `quiet` drops everything but warnings and errors; `verbose` adds
    /// details and input listings.
    pub fn new(quiet: bool, verbose: bool) -> Self {
        Self {
            quiet,
            verbose,
            colored: io::stderr().is_terminal() && std::env::var_os("TERM").is_some(),
        }
    }

    /// Formatter that only prints warnings and errors.
    pub fn quiet() -> Self {
        Self::new(true, false)
    }

    /// Whether verbose output is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Render one progress line: `progress: NN% - STATUS: DETAIL`.
    pub fn progress_line(fraction: f64, status: &str, detail: &str) -> String {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u32;
        format!("progress: {percent}% - {status}: {detail}")
    }

    /// Print a progress line.
    pub fn progress(&self, fraction: f64, status: &str, detail: &str) {
        if !self.quiet {
            let mut stderr = io::stderr().lock();
            writeln!(stderr, "{}", Self::progress_line(fraction, status, detail)).ok();
            stderr.flush().ok();
        }
    }

    /// Print a plain message.
    pub fn info(&self, message: &str) {
        if !self.quiet {
            self.emit(Tone::Plain, message);
        }
    }

    /// Print a success message.
    pub fn success(&self, message: &str) {
        if !self.quiet {
            self.emit(Tone::Done, message);
        }
    }

    /// Print a warning, even when quiet.
    pub fn warning(&self, message: &str) {
        self.emit(Tone::Warn, message);
    }

    /// Print an error, even when quiet.
    pub fn error(&self, message: &str) {
        self.emit(Tone::Fail, message);
    }

    /// Print `label: value` in verbose mode.
    pub fn detail(&self, label: &str, value: &str) {
        if self.verbose {
            eprintln!("  {label}: {value}");
        }
    }

    /// Print a numbered entry (1-based `index`).
    pub fn list_item(&self, index: usize, message: &str) {
        if !self.quiet {
            eprintln!("  {index}. {message}");
        }
    }

    fn emit(&self, tone: Tone, message: &str) {
        eprintln!("{}", tone.render(message, self.colored));
    }
}
