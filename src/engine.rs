//! The merge engine facade.
//!
//! [`MergeEngine`] owns the job store, cancellation registry, notification
//! bus and memory monitor, and runs each submitted job on one spawned tokio
//! task. At most one job is in flight.
//!
//! # Examples
//!
//! ```no_run
//! use pdfmerge::{Config, MergeEngine};
//! use std::path::PathBuf;
//!
//! # async fn demo() -> pdfmerge::Result<()> {
//! let engine = MergeEngine::new(Config::default())?;
//! engine.submit("a.pdf", vec![PathBuf::from("b.pdf")], "merged.pdf")?;
//! let report = engine.wait().await?;
//! println!("{} pages written", report.total_pages);
//! # Ok(())
//! # }
//! ```

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cancel::{
    CancellationRegistry, CleanupReport, FinalizeJobState, ReclaimHint, ResourceDisposal,
    TempFileSweep,
};
use crate::config::Config;
use crate::error::{MergeError, Result};
use crate::job::{JobError, JobId, JobRequest, JobSnapshot, JobStore};
use crate::memory::{MemoryMonitor, MemoryProbe, ProcessMemoryProbe};
use crate::notify::{NotificationBus, Subscriber, SubscriptionId};
use crate::ops::{FileOps, LocalFileOps, LopdfOps, PdfOps};
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::workflow::{MergeReport, WorkflowDriver};

/// Builds a [`MergeEngine`], optionally with substitute collaborators.
pub struct EngineBuilder {
    config: Config,
    pdf_ops: Option<Arc<dyn PdfOps>>,
    file_ops: Option<Arc<dyn FileOps>>,
    probe: Option<Arc<dyn MemoryProbe>>,
}

impl EngineBuilder {
    /// Start from `config`.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            pdf_ops: None,
            file_ops: None,
            probe: None,
        }
    }

    /// Use `pdf_ops` instead of [`LopdfOps`].
    pub fn pdf_ops(mut self, pdf_ops: Arc<dyn PdfOps>) -> Self {
        self.pdf_ops = Some(pdf_ops);
        self
    }

    /// Use `file_ops` instead of [`LocalFileOps`] rooted at the scratch root.
    pub fn file_ops(mut self, file_ops: Arc<dyn FileOps>) -> Self {
        self.file_ops = Some(file_ops);
        self
    }

    /// Use `probe` instead of the process memory probe.
    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn build(self) -> Result<MergeEngine> {
        let mut config = self.config;
        config.validate()?;
        config.normalize_passwords();

        let store = Arc::new(JobStore::new());
        let registry = Arc::new(CancellationRegistry::with_poll_interval(
            Arc::clone(&store),
            config.engine.cancel_poll_interval(),
        ));
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(ProcessMemoryProbe::new()));
        let monitor = Arc::new(MemoryMonitor::new(
            probe,
            config.max_memory,
            config.engine.memory_check_interval(),
        ));
        let file_ops = self
            .file_ops
            .unwrap_or_else(|| Arc::new(LocalFileOps::new(config.scratch_root())));
        let pdf_ops = self.pdf_ops.unwrap_or_else(|| Arc::new(LopdfOps::new()));

        Ok(MergeEngine {
            store,
            registry,
            bus: Arc::new(NotificationBus::new()),
            monitor,
            pdf_ops,
            file_ops,
            config: RwLock::new(config),
            active: Mutex::new(None),
            last_report: Arc::new(Mutex::new(None)),
        })
    }
}

/// The job in flight, or the last one.
struct ActiveJob {
    id: JobId,
    tracker: Arc<ProgressTracker>,
    handle: Option<JoinHandle<Result<MergeReport>>>,
}

/// Single-job merge orchestrator.
pub struct MergeEngine {
    store: Arc<JobStore>,
    registry: Arc<CancellationRegistry>,
    bus: Arc<NotificationBus>,
    monitor: Arc<MemoryMonitor>,
    pdf_ops: Arc<dyn PdfOps>,
    file_ops: Arc<dyn FileOps>,
    config: RwLock<Config>,
    active: Mutex<Option<ActiveJob>>,
    last_report: Arc<Mutex<Option<MergeReport>>>,
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("job", &self.store.current().map(|j| j.id))
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl MergeEngine {
    /// Create an engine with the default collaborators.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    /// Start building an engine.
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Submit a merge of `main` followed by `additional` into `output`.
    ///
    /// A relative `output` is resolved against the configured output
    /// directory. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `additional` is empty
    /// - `AlreadyRunning` if a job is in flight
    /// - `InvalidState` outside a tokio runtime
    pub fn submit(
        &self,
        main: impl Into<PathBuf>,
        additional: Vec<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Result<JobId> {
        self.start(JobRequest::new(main, additional, output))
    }

    /// Submit a flat input list through the batch interface.
    ///
    /// Lists longer than the configured batch size are merged in batches.
    ///
    /// # Errors
    ///
    /// Same as [`MergeEngine::submit`].
    pub fn submit_batch(&self, inputs: Vec<PathBuf>, output: impl Into<PathBuf>) -> Result<JobId> {
        self.start(JobRequest::batched(inputs, output))
    }

    fn start(&self, mut request: JobRequest) -> Result<JobId> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| MergeError::invalid_state("jobs can only be submitted inside a tokio runtime"))?;

        let mut active = self.lock_active();
        if let Some(job) = active.as_ref() {
            let unfinished = job.handle.as_ref().is_some_and(|h| !h.is_finished());
            if unfinished || self.store.is_running() {
                return Err(MergeError::AlreadyRunning { job_id: job.id });
            }
        }

        let config = self.config();
        request.output = config.resolve_output(&request.output);
        let job_id = self.store.submit(request)?;

        let token = CancellationToken::new();
        self.registry.register(job_id, token.clone());
        self.register_cleanup(job_id);

        let driver = WorkflowDriver::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.bus),
            Arc::clone(&self.monitor),
            Arc::clone(&self.pdf_ops),
            Arc::clone(&self.file_ops),
            config,
        );
        let tracker = driver.tracker();
        let task = JobTask {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            bus: Arc::clone(&self.bus),
            last_report: Arc::clone(&self.last_report),
        };
        let handle = runtime.spawn(task.run(driver, job_id, token));

        *active = Some(ActiveJob {
            id: job_id,
            tracker,
            handle: Some(handle),
        });
        info!(job_id = %job_id, "Job accepted");
        Ok(job_id)
    }

    /// Queue the standard cleanup list for a new job.
    fn register_cleanup(&self, job_id: JobId) {
        self.registry
            .add_cleanup(Arc::new(TempFileSweep::new(Arc::clone(&self.file_ops))));
        self.registry
            .add_cleanup(Arc::new(ReclaimHint::new(Arc::clone(&self.monitor))));
        self.registry
            .add_cleanup(Arc::new(FinalizeJobState::new(Arc::clone(&self.store), job_id)));

        let pool = Arc::clone(self.monitor.pool());
        let buffers = ResourceDisposal::new("chunk buffers");
        buffers.push(move || {
            pool.release_all();
            Ok(())
        });
        self.registry.add_cleanup(Arc::new(buffers));
    }

    /// Wait for the submitted job to finish.
    ///
    /// Dropping the returned future before the job ends hands the job back,
    /// so a later `wait` still sees it and new submissions stay blocked.
    ///
    /// # Errors
    ///
    /// - `NoRunningJob` if nothing was submitted or the job was already awaited
    /// - the job's own error if it failed
    pub async fn wait(&self) -> Result<MergeReport> {
        let mut claim = {
            let mut active = self.lock_active();
            let job = active.as_mut().ok_or(MergeError::NoRunningJob)?;
            let handle = job.handle.take().ok_or(MergeError::NoRunningJob)?;
            HandleClaim {
                engine: self,
                job_id: job.id,
                handle: Some(handle),
            }
        };

        let joined = match claim.handle.as_mut() {
            Some(handle) => handle.await,
            None => return Err(MergeError::NoRunningJob),
        };
        claim.handle = None;
        joined.map_err(|e| MergeError::other(format!("merge task failed: {e}")))?
    }

    /// Cancel the job in flight.
    ///
    /// Emits no bus event of its own; the driver reports the cancellation.
    ///
    /// # Errors
    ///
    /// Returns `NoRunningJob` when no job is in flight.
    pub fn cancel_current_job(&self) -> Result<CleanupReport> {
        let job = self.running_job()?;
        self.registry.cancel(job).map_err(|_| MergeError::NoRunningJob)
    }

    /// Cancel the job in flight and wait up to `timeout` for it to stop.
    ///
    /// # Errors
    ///
    /// - `NoRunningJob` when no job is in flight
    /// - `CancelTimeout` when the job is still running after `timeout`
    pub async fn graceful_cancel(&self, timeout: Duration) -> Result<()> {
        let job = self.running_job()?;
        self.registry.graceful_cancel(job, timeout).await
    }

    fn running_job(&self) -> Result<JobId> {
        self.store
            .current()
            .filter(|job| !job.is_terminal())
            .map(|job| job.id)
            .ok_or(MergeError::NoRunningJob)
    }

    /// Snapshot of the current or last job.
    pub fn current_job(&self) -> Option<JobSnapshot> {
        self.store.current()
    }

    /// Whether a job is in flight.
    pub fn is_running(&self) -> bool {
        self.store.is_running()
    }

    /// Step-level progress of the current or last job.
    ///
    /// Each stage counts as an equal step here; the job percent in
    /// [`MergeEngine::current_job`] and on the bus follows the weighted
    /// stage bands instead.
    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.lock_active().as_ref().map(|job| job.tracker.snapshot())
    }

    /// Report of the last completed job.
    pub fn last_report(&self) -> Option<MergeReport> {
        self.last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The notification bus.
    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        self.bus.subscribe(subscriber)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// The memory monitor.
    pub fn memory_monitor(&self) -> &Arc<MemoryMonitor> {
        &self.monitor
    }

    /// Configuration applied to the next job.
    pub fn config(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the configuration for subsequent jobs.
    ///
    /// The scratch root of the default file ops is fixed at build time.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn update_config(&self, mut config: Config) -> Result<()> {
        config.validate()?;
        config.normalize_passwords();
        self.monitor.set_budget(config.max_memory);
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
        Ok(())
    }

    /// Cancel everything and stop the monitor.
    pub fn shutdown(&self) -> CleanupReport {
        let report = self.registry.cancel_all();
        self.monitor.stop();
        info!(cleanup = report.executed, "Engine shut down");
        report
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveJob>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A join handle taken out of [`ActiveJob`] by [`MergeEngine::wait`].
///
/// Returned to its job on drop unless the wait ran to completion.
struct HandleClaim<'a> {
    engine: &'a MergeEngine,
    job_id: JobId,
    handle: Option<JoinHandle<Result<MergeReport>>>,
}

impl Drop for HandleClaim<'_> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let mut active = self.engine.lock_active();
        match active.as_mut() {
            Some(job) if job.id == self.job_id && job.handle.is_none() => {
                debug!(job_id = %self.job_id, "Wait abandoned; job handle restored");
                job.handle = Some(handle);
            }
            _ => {}
        }
    }
}

/// What the spawned job task needs besides the driver.
struct JobTask {
    store: Arc<JobStore>,
    registry: Arc<CancellationRegistry>,
    bus: Arc<NotificationBus>,
    last_report: Arc<Mutex<Option<MergeReport>>>,
}

impl JobTask {
    async fn run(self, driver: WorkflowDriver, job_id: JobId, token: CancellationToken) -> Result<MergeReport> {
        match AssertUnwindSafe(driver.run(job_id, token)).catch_unwind().await {
            Ok(Ok(report)) => {
                *self
                    .last_report
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report.clone());
                Ok(report)
            }
            Ok(Err(e)) => Err(e),
            Err(panic) => {
                let err = MergeError::other(format!("merge task panicked: {}", panic_message(&*panic)));
                error!(job_id = %job_id, error = %err, "Job aborted");
                let job_error = JobError::from(&err);
                self.store.fail_if_active(job_id, job_error.clone());
                self.registry.release(job_id);
                self.bus.error(&job_error);
                self.bus.ui_state(true);
                Err(err)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}
