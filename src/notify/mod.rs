//! Notification bus.
//!
//! Fan-out of the four event types the workflow publishes. Callbacks run
//! synchronously on the publishing task, in the order events were emitted.
//! The subscriber list is copied under the lock and the lock is released
//! before any callback runs, so callbacks may subscribe or unsubscribe.
//!
//! A job produces at most one terminal event: either `error` or `completion`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

use crate::job::JobError;

/// Callback receiving `(fraction, status, detail)`.
pub type ProgressCallback = Arc<dyn Fn(f64, &str, &str) + Send + Sync>;
/// Callback receiving the failure of a job.
pub type ErrorCallback = Arc<dyn Fn(&JobError) + Send + Sync>;
/// Callback receiving the output path of a completed job.
pub type CompletionCallback = Arc<dyn Fn(&Path) + Send + Sync>;
/// Callback receiving whether the UI should accept input.
pub type UiStateCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// One published event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Overall progress in `[0, 1]`.
    Progress {
        /// Fraction complete.
        fraction: f64,
        /// Stage name.
        status: String,
        /// What the stage is doing.
        detail: String,
    },
    /// The job failed.
    Error(JobError),
    /// The job completed and wrote this file.
    Completion(PathBuf),
    /// Whether the UI should accept input.
    UiState(bool),
}

/// A set of optional callbacks.
///
/// Any callback may be left out; the bus skips it silently.
#[derive(Clone, Default)]
pub struct Subscriber {
    on_progress: Option<ProgressCallback>,
    on_error: Option<ErrorCallback>,
    on_completion: Option<CompletionCallback>,
    on_ui_state: Option<UiStateCallback>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_completion", &self.on_completion.is_some())
            .field("on_ui_state", &self.on_ui_state.is_some())
            .finish()
    }
}

impl Subscriber {
    /// Create a subscriber with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the progress callback.
    pub fn on_progress(mut self, f: impl Fn(f64, &str, &str) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// Set the error callback.
    pub fn on_error(mut self, f: impl Fn(&JobError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Set the completion callback.
    pub fn on_completion(mut self, f: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.on_completion = Some(Arc::new(f));
        self
    }

    /// Set the UI-state callback.
    pub fn on_ui_state(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.on_ui_state = Some(Arc::new(f));
        self
    }

    /// Route every event to one closure.
    pub fn from_fn(f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        let f = Arc::new(f);
        let progress = Arc::clone(&f);
        let error = Arc::clone(&f);
        let completion = Arc::clone(&f);
        let ui = f;
        Self::new()
            .on_progress(move |fraction, status, detail| {
                progress(&Event::Progress {
                    fraction,
                    status: status.to_string(),
                    detail: detail.to_string(),
                })
            })
            .on_error(move |err| error(&Event::Error(err.clone())))
            .on_completion(move |path| completion(&Event::Completion(path.to_path_buf())))
            .on_ui_state(move |enabled| ui(&Event::UiState(enabled)))
    }

    fn deliver(&self, event: &Event) {
        match event {
            Event::Progress {
                fraction,
                status,
                detail,
            } => {
                if let Some(cb) = &self.on_progress {
                    cb(*fraction, status, detail);
                }
            }
            Event::Error(err) => {
                if let Some(cb) = &self.on_error {
                    cb(err);
                }
            }
            Event::Completion(path) => {
                if let Some(cb) = &self.on_completion {
                    cb(path);
                }
            }
            Event::UiState(enabled) => {
                if let Some(cb) = &self.on_ui_state {
                    cb(*enabled);
                }
            }
        }
    }
}

/// Handle returned by [`NotificationBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Thread-safe fan-out of workflow events.
#[derive(Debug, Default)]
pub struct NotificationBus {
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_id: AtomicU64,
    terminal_sent: AtomicBool,
}

impl NotificationBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, subscriber));
        id
    }

    /// Register a subscriber if one is given. `None` is accepted silently.
    pub fn subscribe_opt(&self, subscriber: Option<Subscriber>) -> Option<SubscriptionId> {
        subscriber.map(|s| self.subscribe(s))
    }

    /// Register a closure receiving every event.
    pub fn subscribe_events(
        &self,
        f: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribe(Subscriber::from_fn(f))
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Re-arm the terminal-event latch for a new job.
    pub fn begin_job(&self) {
        self.terminal_sent.store(false, Ordering::SeqCst);
    }

    /// Publish progress. `fraction` is clamped to `[0, 1]`.
    pub fn progress(&self, fraction: f64, status: &str, detail: &str) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        self.publish(&Event::Progress {
            fraction,
            status: status.to_string(),
            detail: detail.to_string(),
        });
    }

    /// Publish the job's failure. Returns `false` if a terminal event was
    /// already sent for this job.
    pub fn error(&self, err: &JobError) -> bool {
        if !self.claim_terminal() {
            trace!("Suppressing duplicate terminal event");
            return false;
        }
        self.publish(&Event::Error(err.clone()));
        true
    }

    /// Publish the job's completion. Returns `false` if a terminal event was
    /// already sent for this job.
    pub fn completion(&self, output: &Path) -> bool {
        if !self.claim_terminal() {
            trace!("Suppressing duplicate terminal event");
            return false;
        }
        self.publish(&Event::Completion(output.to_path_buf()));
        true
    }

    /// Publish whether the UI should accept input.
    pub fn ui_state(&self, enabled: bool) {
        self.publish(&Event::UiState(enabled));
    }

    fn claim_terminal(&self) -> bool {
        self.terminal_sent
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn publish(&self, event: &Event) {
        let subscribers: Vec<Subscriber> = self.lock().iter().map(|(_, s)| s.clone()).collect();
        for subscriber in &subscribers {
            subscriber.deliver(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Subscriber)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
