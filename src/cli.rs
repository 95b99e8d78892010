//! CLI argument parsing for pdfmerge.
//!
//! This module defines the command-line interface structure using `clap`.
//! Legacy single-dash long flags (`-input a.pdf,b.pdf`) are rewritten to
//! their double-dash form before parsing.
//!
//! # Examples
//!
//! ```
//! use pdfmerge::cli::Cli;
//!
//! let cli = Cli::parse_normalized(["pdfmerge", "-input", "a.pdf,b.pdf", "-output", "out.pdf"]).unwrap();
//! assert_eq!(cli.inputs, vec!["a.pdf", "b.pdf"]);
//! assert_eq!(cli.output.to_str(), Some("out.pdf"));
//! ```

use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::config::{Config, ConfigStore};
use crate::error::{MergeError, Result};
use crate::utils::expand_patterns;

/// Long flags accepted with a single dash.
const LEGACY_FLAGS: [&str; 4] = ["input", "output", "version", "help"];

/// Merge PDF files into a single document.
///
/// The first input is the main document; the others are appended in order.
#[derive(Parser, Debug)]
#[command(name = "pdfmerge")]
#[command(version)]
#[command(about = "Merge PDF files into a single document", long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Input PDF files, comma-separated, in merge order
    ///
    /// At least two files are required. Glob patterns are expanded.
    ///
    /// Examples:
    ///   pdfmerge --input a.pdf,b.pdf -o out.pdf
    ///   pdfmerge -input 'chapter*.pdf' -output book.pdf
    #[arg(short, long = "input", value_name = "FILES", value_delimiter = ',', required = true)]
    pub inputs: Vec<String>,

    /// Output PDF file path
    ///
    /// Relative paths are resolved against the configured output directory.
    #[arg(short, long, value_name = "FILE", default_value = "merged.pdf")]
    pub output: PathBuf,

    /// Merge through the batch interface
    ///
    /// Long input lists are merged in batches of the configured batch size,
    /// then the batch outputs are merged.
    #[arg(long)]
    pub batch: bool,

    /// Read configuration from this file instead of ~/.pdf-merger/config.json
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose output - debug logging and a detailed summary
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress progress lines
    ///
    /// Only errors and warnings will be printed.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    /// Parse arguments after rewriting legacy single-dash flags.
    ///
    /// # Errors
    ///
    /// Returns clap's error for invalid arguments, `--help` and `--version`.
    pub fn parse_normalized<I, T>(args: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self::try_parse_from(normalize_args(args))
    }

    /// Input paths with patterns expanded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a pattern matches nothing or fewer than two
    /// inputs remain.
    pub fn input_paths(&self) -> Result<Vec<PathBuf>> {
        let paths = expand_patterns(&self.inputs)?;
        if paths.len() < 2 {
            return Err(MergeError::invalid_input(format!(
                "at least two input files are required, got {}",
                paths.len()
            )));
        }
        Ok(paths)
    }

    /// The configuration store selected by `--config`.
    ///
    /// # Errors
    ///
    /// Returns `Config` when no home directory can be determined.
    pub fn config_store(&self) -> Result<ConfigStore> {
        match &self.config {
            Some(path) => Ok(ConfigStore::new(path)),
            None => ConfigStore::at_default_location(),
        }
    }

    /// Load the configuration; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file exists but cannot be parsed or is invalid.
    pub fn load_config(&self) -> Result<Config> {
        self.config_store()?.load()
    }
}

/// Rewrite `-input`, `-output`, `-version` and `-help` (and their `=value`
/// forms) to double-dash flags. Everything else is passed through.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            let Some(flag) = text.strip_prefix('-').filter(|rest| !rest.starts_with('-')) else {
                return arg;
            };
            let name = flag.split_once('=').map_or(flag, |(name, _)| name);
            if LEGACY_FLAGS.contains(&name) {
                OsString::from(format!("-{text}"))
            } else {
                arg
            }
        })
        .collect()
}
