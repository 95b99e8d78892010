//! Single-writer store for the one in-flight job.

use std::sync::RwLock;
use tracing::debug;

use super::{Job, JobError, JobId, JobRequest, JobSnapshot, JobStatus};
use crate::error::{MergeError, Result};

/// Progress never reaches 100 through `update_progress`; only completion does.
const RUNNING_PROGRESS_CAP: f64 = 99.0;

/// Holds at most one [`Job`].
///
/// Mutations take the write lock, reads take the shared lock and return
/// snapshots. Only the workflow driver is expected to call the mutators.
#[derive(Debug, Default)]
pub struct JobStore {
    current: RwLock<Option<Job>>,
}

impl JobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new pending job.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` when a non-terminal job exists
    /// - `InvalidInput` when the request has no additional files
    pub fn submit(&self, request: JobRequest) -> Result<JobId> {
        if request.additional.is_empty() {
            return Err(MergeError::invalid_input(
                "at least one of the additional files is required to merge",
            ));
        }

        let mut guard = self.write();
        if let Some(job) = guard.as_ref().filter(|job| !job.status().is_terminal()) {
            return Err(MergeError::AlreadyRunning { job_id: job.id() });
        }

        let job = Job::new(request);
        let id = job.id();
        debug!(job_id = %id, "Job submitted");
        *guard = Some(job);
        Ok(id)
    }

    /// Snapshot of the current job, if any.
    pub fn current(&self) -> Option<JobSnapshot> {
        self.read().as_ref().map(Job::snapshot)
    }

    /// Whether a non-terminal job exists.
    pub fn is_running(&self) -> bool {
        self.read()
            .as_ref()
            .is_some_and(|job| !job.status().is_terminal())
    }

    /// Record progress for a running job.
    ///
    /// Values are clamped to `[0, 100]`, held below 100 until completion, and
    /// never move backwards. Updates for a job that is not running are ignored.
    pub fn update_progress(&self, id: JobId, percent: f64) -> Result<()> {
        let percent = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
        self.with_job(id, |job| {
            if job.status() == JobStatus::Running {
                let next = percent.min(RUNNING_PROGRESS_CAP).max(job.progress());
                job.set_progress(next);
            }
            Ok(())
        })
    }

    /// Move the job from Pending to Running.
    pub fn mark_running(&self, id: JobId) -> Result<()> {
        self.with_job(id, |job| job.transition(JobStatus::Running))
    }

    /// Move the job to Completed; progress becomes 100.
    pub fn mark_completed(&self, id: JobId) -> Result<()> {
        self.with_job(id, |job| job.transition(JobStatus::Completed))
    }

    /// Move the job to Failed and record the error.
    pub fn mark_failed(&self, id: JobId, error: JobError) -> Result<()> {
        self.with_job(id, |job| {
            job.transition(JobStatus::Failed)?;
            job.set_error(error);
            Ok(())
        })
    }

    /// Mark the job Failed unless it already reached a terminal state.
    ///
    /// Returns `true` when this call performed the transition.
    pub fn fail_if_active(&self, id: JobId, error: JobError) -> bool {
        let mut guard = self.write();
        match guard.as_mut() {
            Some(job) if job.id() == id && !job.status().is_terminal() => {
                if job.transition(JobStatus::Failed).is_err() {
                    return false;
                }
                job.set_error(error);
                true
            }
            _ => false,
        }
    }

    /// Drop the current job if it is terminal.
    ///
    /// Returns the removed snapshot.
    pub fn clear_terminal(&self) -> Option<JobSnapshot> {
        let mut guard = self.write();
        if guard.as_ref().is_some_and(|job| job.status().is_terminal()) {
            guard.take().map(|job| job.snapshot())
        } else {
            None
        }
    }

    fn with_job<T>(&self, id: JobId, f: impl FnOnce(&mut Job) -> Result<T>) -> Result<T> {
        let mut guard = self.write();
        match guard.as_mut() {
            Some(job) if job.id() == id => f(job),
            _ => Err(MergeError::UnknownJob { job_id: id }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<Job>> {
        self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Job>> {
        self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
