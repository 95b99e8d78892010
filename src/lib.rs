//! pdfmerge - Merge orchestration for concatenating PDF files.
//!
//! This library drives a PDF merge as a tracked background job. It provides:
//!
//! - A single-job store with a checked status lifecycle
//! - A five-stage workflow with per-stage retry and backoff
//! - Direct, streaming and batched merge strategies chosen by memory pressure
//! - Cooperative cancellation with registered cleanup tasks
//! - Progress, error, completion and UI-state notifications
//! - JSON configuration with change detection
//!
//! # Examples
//!
//! ## Merging Two Files
//!
//! ```no_run
//! use pdfmerge::{Config, MergeEngine};
//!
//! # async fn example() -> pdfmerge::Result<()> {
//! let engine = MergeEngine::new(Config::default())?;
//! engine.submit("main.pdf", vec!["appendix.pdf".into()], "merged.pdf")?;
//!
//! let report = engine.wait().await?;
//! println!("Created {} page document", report.total_pages);
//! # Ok(())
//! # }
//! ```
//!
//! ## Watching Progress
//!
//! ```no_run
//! use pdfmerge::{Config, MergeEngine, Subscriber};
//!
//! # async fn example() -> pdfmerge::Result<()> {
//! let engine = MergeEngine::new(Config::default())?;
//! engine.subscribe(Subscriber::new().on_progress(|fraction, status, detail| {
//!     println!("{:>3.0}% {status}: {detail}", fraction * 100.0);
//! }));
//!
//! let inputs = vec!["a.pdf".into(), "b.pdf".into(), "c.pdf".into()];
//! engine.submit_batch(inputs, "book.pdf")?;
//! engine.wait().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod memory;
pub mod notify;
pub mod ops;
pub mod output;
pub mod progress;
pub mod strategy;
pub mod utils;
pub mod validation;
pub mod workflow;

// Re-export commonly used types
pub use config::Config;
pub use engine::{EngineBuilder, MergeEngine};
pub use error::{ErrorKind, MergeError, Result};
pub use job::{JobError, JobId, JobSnapshot, JobStatus};
pub use notify::{Event, Subscriber};
pub use strategy::Strategy;
pub use workflow::{MergeReport, Stage};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
