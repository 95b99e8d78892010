//! Error types for pdfmerge.
//!
//! Every failure in the engine is a [`MergeError`]. Each variant maps onto an
//! [`ErrorKind`] tag, which is what the workflow's retry policy and the UI
//! pattern-match on. Message text is for humans only; the substring fallback
//! in [`crate::workflow::retry`] is consulted solely for [`ErrorKind::Unknown`].
//!
//! # Error Categories
//!
//! - **Input errors**: missing files, permission problems, invalid PDFs
//! - **Transient errors**: I/O hiccups, memory pressure, timeouts
//! - **Lifecycle errors**: cancellation, a job already running, no job to cancel

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::job::JobId;
use crate::workflow::Stage;

/// Result type alias for pdfmerge operations.
pub type Result<T> = std::result::Result<T, MergeError>;

/// Classification tag attached to every [`MergeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Input or directory missing.
    NotFound,
    /// Read or write probe failed.
    PermissionDenied,
    /// The PDF library rejected the file structure.
    InvalidPdf,
    /// A password is required and none of the known ones worked.
    Encrypted,
    /// Transient read/write failure.
    Io,
    /// Memory budget exceeded.
    OutOfMemory,
    /// An operation timed out.
    Timeout,
    /// The user cancelled the job.
    Cancelled,
    /// A job is already in flight.
    AlreadyRunning,
    /// Cancellation was requested but no job is running.
    NoRunningJob,
    /// A graceful cancellation did not finish in time.
    CancelTimeout,
    /// The job id is not registered.
    UnknownJob,
    /// The request itself is malformed.
    InvalidInput,
    /// A job state transition was rejected.
    InvalidState,
    /// Configuration could not be read, written or validated.
    Config,
    /// Unclassified failure.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::PermissionDenied => "permission denied",
            Self::InvalidPdf => "invalid PDF",
            Self::Encrypted => "encrypted",
            Self::Io => "I/O error",
            Self::OutOfMemory => "out of memory",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::AlreadyRunning => "already running",
            Self::NoRunningJob => "no running job",
            Self::CancelTimeout => "cancel timeout",
            Self::UnknownJob => "unknown job",
            Self::InvalidInput => "invalid input",
            Self::InvalidState => "invalid state",
            Self::Config => "configuration error",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Main error type for pdfmerge operations.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Input file or directory was not found.
    #[error("File not found: {}", path.display())]
    NotFound {
        /// Path that does not exist.
        path: PathBuf,
    },

    /// A read or write probe was refused by the filesystem.
    #[error("Permission denied: {}", path.display())]
    PermissionDenied {
        /// Path that could not be accessed.
        path: PathBuf,
        /// Underlying I/O error, if any.
        #[source]
        source: Option<io::Error>,
    },

    /// The file is not a structurally valid PDF.
    #[error("Invalid PDF format: {}\n  Details: {details}", path.display())]
    InvalidPdf {
        /// Path to the rejected file.
        path: PathBuf,
        /// What the PDF library reported.
        details: String,
    },

    /// One or more inputs are encrypted and could not be unlocked.
    #[error(
        "PDF is encrypted and no known password unlocks it: {}\n  \
         Hint: provide the password or decrypt the file first",
        display_paths(paths)
    )]
    Encrypted {
        /// Every input that remains locked.
        paths: Vec<PathBuf>,
    },

    /// Transient read/write failure.
    #[error("I/O error: {message}")]
    Io {
        /// What was being attempted.
        message: String,
        /// Underlying I/O error, if any.
        #[source]
        source: Option<io::Error>,
    },

    /// Memory budget exceeded.
    #[error("Out of memory: {message}")]
    OutOfMemory {
        /// Description of the allocation pressure.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("Operation timeout: {message}")]
    Timeout {
        /// What timed out.
        message: String,
    },

    /// User cancelled the job.
    #[error("Operation cancelled by user")]
    Cancelled,

    /// A job is already in flight; the engine runs one job at a time.
    #[error("A merge job is already running: {job_id}")]
    AlreadyRunning {
        /// The job currently holding the engine.
        job_id: JobId,
    },

    /// Cancellation was requested with no job in flight.
    #[error("no running job")]
    NoRunningJob,

    /// The job was signalled but did not reach a terminal state in time.
    #[error("Cancellation of {job_id} timed out after {:.1}s", timeout.as_secs_f64())]
    CancelTimeout {
        /// Job that is still running.
        job_id: JobId,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The job id has no registered cancellation handle.
    #[error("Unknown job: {job_id}")]
    UnknownJob {
        /// The id that was looked up.
        job_id: JobId,
    },

    /// The merge request is malformed.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What is wrong with the request.
        message: String,
    },

    /// A job state transition was rejected.
    #[error("Invalid job state: {message}")]
    InvalidState {
        /// Description of the rejected transition.
        message: String,
    },

    /// Configuration could not be loaded, saved or validated.
    #[error("Invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// A workflow stage failed; wraps the underlying cause.
    #[error("{stage} stage failed: {source}")]
    Stage {
        /// Stage that failed.
        stage: Stage,
        /// The last error the stage produced.
        #[source]
        source: Box<MergeError>,
    },

    /// Generic error with a custom message.
    #[error("{message}")]
    Other {
        /// Error message.
        message: String,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<io::Error> for MergeError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<lopdf::Error> for MergeError {
    fn from(err: lopdf::Error) -> Self {
        Self::other(err.to_string())
    }
}

impl From<serde_json::Error> for MergeError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl MergeError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a PermissionDenied error without an underlying cause.
    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied {
            path: path.into(),
            source: None,
        }
    }

    /// Create an InvalidPdf error.
    pub fn invalid_pdf(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        Self::InvalidPdf {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create an Encrypted error for the given locked inputs.
    pub fn encrypted(paths: Vec<PathBuf>) -> Self {
        Self::Encrypted { paths }
    }

    /// Create an Io error from a message.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            source: None,
        }
    }

    /// Create an OutOfMemory error.
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::OutOfMemory {
            message: message.into(),
        }
    }

    /// Create a Timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an InvalidState error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an Other error with a custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Annotate an error with the stage that produced it.
    ///
    /// Cancellation is never wrapped so it keeps surfacing as `Cancelled`.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            Self::Cancelled | Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Convert an I/O error observed at `path` into the matching tagged variant.
    pub fn from_io_at(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::not_found(path),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_path_buf(),
                source: Some(err),
            },
            _ => Self::Io {
                message: format!("{}: {err}", path.display()),
                source: Some(err),
            },
        }
    }

    /// The classification tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::InvalidPdf { .. } => ErrorKind::InvalidPdf,
            Self::Encrypted { .. } => ErrorKind::Encrypted,
            Self::Io { source, .. } => match source.as_ref().map(io::Error::kind) {
                Some(io::ErrorKind::NotFound) => ErrorKind::NotFound,
                Some(io::ErrorKind::PermissionDenied) => ErrorKind::PermissionDenied,
                Some(io::ErrorKind::TimedOut) => ErrorKind::Timeout,
                Some(io::ErrorKind::OutOfMemory) => ErrorKind::OutOfMemory,
                _ => ErrorKind::Io,
            },
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            Self::NoRunningJob => ErrorKind::NoRunningJob,
            Self::CancelTimeout { .. } => ErrorKind::CancelTimeout,
            Self::UnknownJob { .. } => ErrorKind::UnknownJob,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Config { .. } => ErrorKind::Config,
            Self::Stage { source, .. } => source.kind(),
            Self::Other { .. } => ErrorKind::Unknown,
        }
    }

    /// The stage this error was annotated with, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether this error is a user cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// Whether a stage failing with this error may be re-attempted.
    ///
    /// Tagged errors are decided by their kind; only `Unknown` falls back to
    /// scanning the message.
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::Io | ErrorKind::OutOfMemory | ErrorKind::Timeout => true,
            ErrorKind::Unknown => crate::workflow::retry::message_is_retryable(&self.to_string()),
            _ => false,
        }
    }

    /// Get the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::InvalidInput | ErrorKind::Config => 1,
            ErrorKind::NotFound | ErrorKind::PermissionDenied => 2,
            ErrorKind::InvalidPdf | ErrorKind::Encrypted => 3,
            ErrorKind::AlreadyRunning | ErrorKind::InvalidState => 4,
            ErrorKind::Io | ErrorKind::OutOfMemory => 5,
            ErrorKind::Timeout | ErrorKind::CancelTimeout => 6,
            ErrorKind::NoRunningJob | ErrorKind::UnknownJob => 7,
            ErrorKind::Cancelled => 130, // Standard exit code for SIGINT
            ErrorKind::Unknown => 1,
        }
    }
}
