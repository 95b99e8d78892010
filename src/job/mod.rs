//! Job data model.
//!
//! A job is one merge request from submission to terminal status. The
//! live record is owned by the [`JobStore`]; everybody else reads immutable
//! [`JobSnapshot`]s.

mod store;

pub use store::JobStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ErrorKind, MergeError};
use crate::workflow::Stage;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque job identifier, unique and increasing within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    /// Allocate the next id.
    pub fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{:06}", self.0)
    }
}

/// Lifecycle status of a job.
///
/// Jobs only move forward: `Pending -> Running -> {Completed, Failed}`.
/// A pending job may also fail directly when it is cancelled before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    /// Submitted, not yet picked up by the driver.
    Pending,
    /// The workflow is executing.
    Running,
    /// The output was written and validated.
    Completed,
    /// The job failed or was cancelled.
    Failed,
}

impl JobStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects the forward path.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// How the Merging stage should treat the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeMode {
    /// Direct or streaming, chosen from memory telemetry.
    #[default]
    Auto,
    /// Partition large input lists into batches first.
    Batched,
}

/// Error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    /// Classification tag.
    pub kind: ErrorKind,
    /// Stage that failed, when known.
    pub stage: Option<Stage>,
    /// Human-readable message naming the stage and cause.
    pub message: String,
}

impl JobError {
    /// The error recorded when the user cancels a job.
    pub fn cancelled() -> Self {
        Self::from(&MergeError::Cancelled)
    }

    /// Whether this error records a user cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl From<&MergeError> for JobError {
    fn from(err: &MergeError) -> Self {
        Self {
            kind: err.kind(),
            stage: err.stage(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A merge request as handed to [`JobStore::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// The document the others are appended to.
    pub main: PathBuf,
    /// Documents appended in order.
    pub additional: Vec<PathBuf>,
    /// Where the merged document is written.
    pub output: PathBuf,
    /// Strategy family for the Merging stage.
    pub mode: MergeMode,
}

impl JobRequest {
    /// Create a request using automatic strategy selection.
    pub fn new(main: impl Into<PathBuf>, additional: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            main: main.into(),
            additional,
            output: output.into(),
            mode: MergeMode::Auto,
        }
    }

    /// Create a request for the batch interface from a flat input list.
    ///
    /// The first input becomes the main document.
    pub fn batched(inputs: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        let mut inputs = inputs.into_iter();
        let main = inputs.next().unwrap_or_default();
        Self {
            main,
            additional: inputs.collect(),
            output: output.into(),
            mode: MergeMode::Batched,
        }
    }

    /// All inputs in merge order.
    pub fn inputs(&self) -> Vec<PathBuf> {
        std::iter::once(self.main.clone())
            .chain(self.additional.iter().cloned())
            .collect()
    }
}

/// The live job record. Only the store mutates it.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    id: JobId,
    request: JobRequest,
    status: JobStatus,
    progress: f64,
    error: Option<JobError>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(request: JobRequest) -> Self {
        Self {
            id: JobId::next(),
            request,
            status: JobStatus::Pending,
            progress: 0.0,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn status(&self) -> JobStatus {
        self.status
    }

    pub(crate) fn transition(&mut self, next: JobStatus) -> crate::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(MergeError::invalid_state(format!(
                "{} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }

        self.status = next;
        match next {
            JobStatus::Completed => {
                self.progress = 100.0;
                self.completed_at = Some(Utc::now());
            }
            JobStatus::Failed => {
                self.completed_at = Some(Utc::now());
            }
            JobStatus::Pending | JobStatus::Running => {}
        }
        Ok(())
    }

    pub(crate) fn set_progress(&mut self, percent: f64) {
        self.progress = percent;
    }

    pub(crate) fn progress(&self) -> f64 {
        self.progress
    }

    pub(crate) fn set_error(&mut self, error: JobError) {
        self.error = Some(error);
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            main: self.request.main.clone(),
            additional: self.request.additional.clone(),
            output: self.request.output.clone(),
            mode: self.request.mode,
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Immutable view of a job at one moment in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    /// Job identifier.
    pub id: JobId,
    /// Main input.
    pub main: PathBuf,
    /// Additional inputs in merge order.
    pub additional: Vec<PathBuf>,
    /// Output path.
    pub output: PathBuf,
    /// Strategy family for the Merging stage.
    pub mode: MergeMode,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Progress percent in `[0, 100]`.
    pub progress: f64,
    /// Error recorded on failure.
    pub error: Option<JobError>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Set once the job is terminal.
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    /// All inputs in merge order.
    pub fn inputs(&self) -> Vec<PathBuf> {
        std::iter::once(self.main.clone())
            .chain(self.additional.iter().cloned())
            .collect()
    }

    /// The output path.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Whether the job is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
