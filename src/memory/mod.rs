//! Memory telemetry and back-pressure.
//!
//! The [`MemoryMonitor`] samples a [`MemoryProbe`] against the configured
//! budget. The strategy selector consults it before and during a merge, and a
//! periodic task issues reclamation hints while usage stays high.
//!
//! # Thresholds
//!
//! | Ratio of budget | Meaning |
//! |---|---|
//! | `< 0.70` | direct merge allowed |
//! | `> 0.80` | low memory, reclamation hint on every tick |
//! | `> 0.90` | critical, streaming pauses before the next chunk |
//!
//! Rust has no collector to nudge, so a reclamation hint drops the idle
//! buffers of the shared [`BufferPool`]. Callers on async paths follow it with
//! a cooperative yield.

mod pool;

pub use pool::BufferPool;

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Below this ratio the selector may merge directly.
pub const DIRECT_THRESHOLD: f64 = 0.70;

/// Above this ratio memory is low.
pub const LOW_THRESHOLD: f64 = 0.80;

/// Above this ratio memory is critical.
pub const CRITICAL_THRESHOLD: f64 = 0.90;

/// Source of current memory usage in bytes.
pub trait MemoryProbe: Send + Sync + fmt::Debug {
    /// Bytes currently in use by this process.
    fn current_usage(&self) -> u64;
}

/// Resident set size of the current process, read through `sysinfo`.
#[derive(Debug)]
pub struct ProcessMemoryProbe {
    pid: Option<sysinfo::Pid>,
    system: Mutex<sysinfo::System>,
}

impl ProcessMemoryProbe {
    /// Create a probe for the current process.
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "Cannot determine current pid, memory readings will be zero");
                None
            }
        };
        Self {
            pid,
            system: Mutex::new(sysinfo::System::new()),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn current_usage(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_process(pid);
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }
}

/// Probe returning a fixed, settable reading.
#[derive(Debug, Default)]
pub struct StaticMemoryProbe {
    usage: AtomicU64,
}

impl StaticMemoryProbe {
    /// Create a probe that reports `usage` bytes.
    pub fn new(usage: u64) -> Self {
        Self {
            usage: AtomicU64::new(usage),
        }
    }

    /// Change the reported reading.
    pub fn set(&self, usage: u64) {
        self.usage.store(usage, Ordering::Relaxed);
    }
}

impl MemoryProbe for StaticMemoryProbe {
    fn current_usage(&self) -> u64 {
        self.usage.load(Ordering::Relaxed)
    }
}

/// Pressure level derived from a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Pressure {
    /// Under 70% of budget.
    Normal,
    /// Between 70% and 80%.
    Elevated,
    /// Over 80%.
    Low,
    /// Over 90%.
    Critical,
}

/// One reading of the probe against the budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    /// Bytes in use.
    pub used: u64,
    /// Budget in bytes.
    pub budget: u64,
}

impl MemorySample {
    /// `used / budget`; infinite for a zero budget with non-zero usage.
    pub fn ratio(&self) -> f64 {
        if self.budget == 0 {
            return if self.used == 0 { 0.0 } else { f64::INFINITY };
        }
        self.used as f64 / self.budget as f64
    }

    /// Pressure level of this sample.
    pub fn pressure(&self) -> Pressure {
        let ratio = self.ratio();
        if ratio > CRITICAL_THRESHOLD {
            Pressure::Critical
        } else if ratio > LOW_THRESHOLD {
            Pressure::Low
        } else if ratio >= DIRECT_THRESHOLD {
            Pressure::Elevated
        } else {
            Pressure::Normal
        }
    }
}

struct MonitorTask {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

/// Periodic sampler with threshold queries and reclamation hints.
pub struct MemoryMonitor {
    probe: Arc<dyn MemoryProbe>,
    budget: AtomicU64,
    interval: Duration,
    pool: Arc<BufferPool>,
    task: Mutex<Option<MonitorTask>>,
    reclaims: AtomicUsize,
    peak: AtomicU64,
}

impl fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("probe", &self.probe)
            .field("budget", &self.budget())
            .field("interval", &self.interval)
            .field("active", &self.is_active())
            .finish()
    }
}

impl MemoryMonitor {
    /// Create a monitor.
    ///
    /// # Arguments
    ///
    /// * `probe` - Source of usage readings
    /// * `budget` - Budget in bytes
    /// * `interval` - Period of the background sampling loop
    pub fn new(probe: Arc<dyn MemoryProbe>, budget: u64, interval: Duration) -> Self {
        Self {
            probe,
            budget: AtomicU64::new(budget),
            interval,
            pool: Arc::new(BufferPool::default()),
            task: Mutex::new(None),
            reclaims: AtomicUsize::new(0),
            peak: AtomicU64::new(0),
        }
    }

    /// Budget in bytes.
    pub fn budget(&self) -> u64 {
        self.budget.load(Ordering::Relaxed)
    }

    /// Replace the budget.
    pub fn set_budget(&self, budget: u64) {
        self.budget.store(budget, Ordering::Relaxed);
    }

    /// Shared chunk buffer pool.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Take a reading now.
    pub fn sample(&self) -> MemorySample {
        let used = self.probe.current_usage();
        self.peak.fetch_max(used, Ordering::Relaxed);
        MemorySample {
            used,
            budget: self.budget(),
        }
    }

    /// Fraction of the budget in use.
    pub fn usage_ratio(&self) -> f64 {
        self.sample().ratio()
    }

    /// Usage above 80% of budget.
    pub fn is_low(&self) -> bool {
        self.usage_ratio() > LOW_THRESHOLD
    }

    /// Usage above 90% of budget.
    pub fn is_critical(&self) -> bool {
        self.usage_ratio() > CRITICAL_THRESHOLD
    }

    /// Usage below 70% of budget.
    pub fn allows_direct(&self) -> bool {
        self.usage_ratio() < DIRECT_THRESHOLD
    }

    /// Issue a reclamation hint: drop idle pooled buffers.
    pub fn reclaim(&self) -> usize {
        let freed = self.pool.release_all();
        let count = self.reclaims.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(freed, reclaims = count, "Reclamation hint issued");
        freed
    }

    /// Hints issued so far.
    pub fn reclaim_count(&self) -> usize {
        self.reclaims.load(Ordering::Relaxed)
    }

    /// Highest reading observed.
    pub fn peak_usage(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }

    /// Start the periodic loop. A second call while running is a no-op.
    ///
    /// Does nothing outside a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.task_slot();
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            trace!("Memory monitor already running");
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Memory monitor needs a tokio runtime, not started");
            return;
        };

        let token = CancellationToken::new();
        let child = token.clone();
        let monitor = Arc::downgrade(self);
        let interval = self.interval;

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                let sample = monitor.sample();
                trace!(used = sample.used, budget = sample.budget, "Memory sample");
                if sample.pressure() >= Pressure::Low {
                    monitor.reclaim();
                }
            }
        });

        debug!(interval_ms = interval.as_millis() as u64, "Memory monitor started");
        *slot = Some(MonitorTask { handle, token });
    }

    /// Stop the periodic loop. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(task) = self.task_slot().take() {
            task.token.cancel();
            debug!("Memory monitor stopped");
        }
    }

    /// Whether the periodic loop is running.
    pub fn is_active(&self) -> bool {
        self.task_slot()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished() && !t.token.is_cancelled())
    }

    fn task_slot(&self) -> std::sync::MutexGuard<'_, Option<MonitorTask>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
