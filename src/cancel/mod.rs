//! Cancellation registry.
//!
//! Maps job ids to [`CancellationToken`]s and owns the ordered list of
//! [`CleanupTask`]s for the job in flight.
//!
//! # Lifecycle
//!
//! - the engine registers the token and the cleanup tasks on submit
//! - [`CancellationRegistry::cancel`] removes the token, fires it and runs the
//!   cleanup list in insertion order
//! - [`CancellationRegistry::release`] runs and drains the list when the job
//!   reaches a terminal state, on every exit path
//!
//! A failing task is logged and does not stop the tasks after it.

mod cleanup;

pub use cleanup::{
    CleanupTask, FinalizeJobState, FnCleanup, ReclaimHint, ResourceDisposal, TempFileSweep,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MergeError, Result};
use crate::job::{JobId, JobStore};

/// Default poll period of [`CancellationRegistry::graceful_cancel`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of running the cleanup list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Tasks that ran.
    pub executed: usize,
    /// `description: error` for each task that failed.
    pub failures: Vec<String>,
}

impl CleanupReport {
    /// Whether every task succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Job id to cancellation handle map plus the cleanup list.
pub struct CancellationRegistry {
    handles: RwLock<HashMap<JobId, CancellationToken>>,
    cleanup: Mutex<Vec<Arc<dyn CleanupTask>>>,
    store: Arc<JobStore>,
    poll_interval: Duration,
}

impl std::fmt::Debug for CancellationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationRegistry")
            .field("handles", &self.read_handles().len())
            .field("cleanup", &self.cleanup_len())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl CancellationRegistry {
    /// Create a registry that observes `store` during graceful cancellation.
    pub fn new(store: Arc<JobStore>) -> Self {
        Self::with_poll_interval(store, DEFAULT_POLL_INTERVAL)
    }

    /// Create a registry with a custom graceful-cancel poll period.
    pub fn with_poll_interval(store: Arc<JobStore>, poll_interval: Duration) -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            cleanup: Mutex::new(Vec::new()),
            store,
            poll_interval,
        }
    }

    /// Register the cancellation handle of a job.
    pub fn register(&self, job_id: JobId, token: CancellationToken) {
        self.write_handles().insert(job_id, token);
        debug!(job_id = %job_id, "Cancellation handle registered");
    }

    /// Append a cleanup task.
    pub fn add_cleanup(&self, task: Arc<dyn CleanupTask>) {
        debug!(task = %task.description(), "Cleanup task registered");
        self.lock_cleanup().push(task);
    }

    /// Whether a handle is registered for `job_id`.
    pub fn is_registered(&self, job_id: JobId) -> bool {
        self.read_handles().contains_key(&job_id)
    }

    /// Number of queued cleanup tasks.
    pub fn cleanup_len(&self) -> usize {
        self.lock_cleanup().len()
    }

    /// Remove the handle, fire it, then run the cleanup list.
    ///
    /// # Errors
    ///
    /// Returns `UnknownJob` if no handle is registered, including when the
    /// job was already cancelled.
    pub fn cancel(&self, job_id: JobId) -> Result<CleanupReport> {
        let token = self
            .write_handles()
            .remove(&job_id)
            .ok_or(MergeError::UnknownJob { job_id })?;

        token.cancel();
        info!(job_id = %job_id, "Job cancelled");
        Ok(self.run_cleanup(false))
    }

    /// Drain every handle, fire them all, then run the cleanup list.
    pub fn cancel_all(&self) -> CleanupReport {
        let drained = std::mem::take(&mut *self.write_handles());
        for (job_id, token) in &drained {
            token.cancel();
            info!(job_id = %job_id, "Job cancelled");
        }
        self.run_cleanup(false)
    }

    /// Cancel and wait until the store reports no running job.
    ///
    /// # Errors
    ///
    /// - `UnknownJob` if no handle is registered
    /// - `CancelTimeout` if the job is still running after `timeout`
    pub async fn graceful_cancel(&self, job_id: JobId, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        self.cancel(job_id)?;

        loop {
            if !self.store.is_running() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(job_id = %job_id, timeout_ms = timeout.as_millis() as u64, "Graceful cancel timed out");
                return Err(MergeError::CancelTimeout { job_id, timeout });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Drop the handle of a finished job and run and drain the cleanup list.
    pub fn release(&self, job_id: JobId) -> CleanupReport {
        self.write_handles().remove(&job_id);
        let report = self.run_cleanup(true);
        debug!(job_id = %job_id, executed = report.executed, "Cancellation state released");
        report
    }

    /// Run the tasks in insertion order; optionally drain the list afterwards.
    fn run_cleanup(&self, drain: bool) -> CleanupReport {
        let tasks: Vec<Arc<dyn CleanupTask>> = if drain {
            std::mem::take(&mut *self.lock_cleanup())
        } else {
            self.lock_cleanup().clone()
        };

        let mut report = CleanupReport::default();
        for task in tasks {
            report.executed += 1;
            if let Err(e) = task.run() {
                warn!(task = %task.description(), error = %e, "Cleanup task failed");
                report.failures.push(format!("{}: {e}", task.description()));
            }
        }
        report
    }

    fn read_handles(&self) -> std::sync::RwLockReadGuard<'_, HashMap<JobId, CancellationToken>> {
        self.handles.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_handles(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<JobId, CancellationToken>> {
        self.handles.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_cleanup(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn CleanupTask>>> {
        self.cleanup.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::job::JobRequest;
    use std::path::PathBuf;

    fn recording_task(
        name: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    ) -> Arc<dyn CleanupTask> {
        let log = Arc::clone(log);
        Arc::new(FnCleanup::new(name, move || {
            log.lock().unwrap().push(name);
            if fail {
                Err(MergeError::io(format!("{name} failed")))
            } else {
                Ok(())
            }
        }))
    }

    fn running_job(store: &JobStore) -> JobId {
        let id = store
            .submit(JobRequest::new("a.pdf", vec![PathBuf::from("b.pdf")], "o.pdf"))
            .unwrap();
        store.mark_running(id).unwrap();
        id
    }

    #[test]
    fn test_cancel_fires_token_and_runs_cleanup_in_order() {
        let store = Arc::new(JobStore::new());
        let registry = CancellationRegistry::new(Arc::clone(&store));
        let id = running_job(&store);
        let token = CancellationToken::new();
        registry.register(id, token.clone());

        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add_cleanup(recording_task("first", &log, false));
        registry.add_cleanup(recording_task("second", &log, true));
        registry.add_cleanup(recording_task("third", &log, false));

        let report = registry.cancel(id).unwrap();
        assert!(token.is_cancelled());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(report.executed, 3);
        assert_eq!(report.failures.len(), 1);
        assert!(!registry.is_registered(id));
    }

    #[test]
    fn test_second_cancel_is_unknown() {
        let store = Arc::new(JobStore::new());
        let registry = CancellationRegistry::new(Arc::clone(&store));
        let id = running_job(&store);
        registry.register(id, CancellationToken::new());

        registry.cancel(id).unwrap();
        let err = registry.cancel(id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownJob);
    }

    #[test]
    fn test_cancel_all_fires_every_handle() {
        let store = Arc::new(JobStore::new());
        let registry = CancellationRegistry::new(store);
        let tokens: Vec<_> = (0..3)
            .map(|_| {
                let token = CancellationToken::new();
                registry.register(JobId::next(), token.clone());
                token
            })
            .collect();

        registry.cancel_all();
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }

    #[test]
    fn test_release_drains_cleanup_list() {
        let store = Arc::new(JobStore::new());
        let registry = CancellationRegistry::new(Arc::clone(&store));
        let id = running_job(&store);
        registry.register(id, CancellationToken::new());

        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add_cleanup(recording_task("sweep", &log, false));

        let report = registry.release(id);
        assert_eq!(report.executed, 1);
        assert_eq!(registry.cleanup_len(), 0);
        assert!(!registry.is_registered(id));
        assert_eq!(registry.release(id).executed, 0);
    }

    #[tokio::test]
    async fn test_graceful_cancel_succeeds_when_job_finalizes() {
        let store = Arc::new(JobStore::new());
        let registry =
            CancellationRegistry::with_poll_interval(Arc::clone(&store), Duration::from_millis(5));
        let id = running_job(&store);
        registry.register(id, CancellationToken::new());
        registry.add_cleanup(Arc::new(FinalizeJobState::new(Arc::clone(&store), id)));

        registry
            .graceful_cancel(id, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!store.is_running());
    }

    #[tokio::test]
    async fn test_graceful_cancel_times_out() {
        let store = Arc::new(JobStore::new());
        let registry =
            CancellationRegistry::with_poll_interval(Arc::clone(&store), Duration::from_millis(5));
        let id = running_job(&store);
        let token = CancellationToken::new();
        registry.register(id, token.clone());

        let started = Instant::now();
        let err = registry
            .graceful_cancel(id, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CancelTimeout);
        assert!(token.is_cancelled());
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
