//! Console rendering of engine events.

pub mod formatter;

use std::sync::{Arc, Mutex};

use crate::job::JobError;
use crate::notify::Subscriber;
use crate::utils::format_file_size;
use crate::workflow::MergeReport;
use formatter::OutputFormatter;

/// Renders bus events as progress lines.
///
/// Identical consecutive lines are printed once.
#[derive(Debug)]
pub struct ConsoleReporter {
    formatter: OutputFormatter,
    last_line: Mutex<String>,
}

impl ConsoleReporter {
    /// Create a reporter printing through `formatter`.
    pub fn new(formatter: OutputFormatter) -> Self {
        Self {
            formatter,
            last_line: Mutex::new(String::new()),
        }
    }

    /// A bus subscriber feeding this reporter.
    pub fn subscriber(self: &Arc<Self>) -> Subscriber {
        let progress = Arc::clone(self);
        let failure = Arc::clone(self);
        Subscriber::new()
            .on_progress(move |fraction, status, detail| progress.progress(fraction, status, detail))
            .on_error(move |err| failure.failure(err))
    }

    fn progress(&self, fraction: f64, status: &str, detail: &str) {
        let line = OutputFormatter::progress_line(fraction, status, detail);
        {
            let mut last = self.last_line.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if *last == line {
                return;
            }
            last.clone_from(&line);
        }
        self.formatter.progress(fraction, status, detail);
    }

    fn failure(&self, err: &JobError) {
        if err.is_cancelled() {
            self.formatter.warning(&err.message);
        } else {
            self.formatter.error(&err.message);
        }
    }

    /// Print the summary of a completed merge.
    pub fn summary(&self, report: &MergeReport) {
        self.formatter
            .success(&format!("Successfully created {}", report.output.display()));
        self.formatter.info(&format!(
            "  {} files, {} pages, {} -> {}",
            report.input_count,
            report.total_pages,
            format_file_size(report.input_bytes),
            format_file_size(report.output_bytes)
        ));
        self.formatter.detail("Strategy", &report.strategy.to_string());
        self.formatter
            .detail("Elapsed", &format!("{:.2}s", report.elapsed.as_secs_f64()));
    }
}
