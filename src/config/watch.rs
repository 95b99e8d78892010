//! Polling watcher that reloads the config document on external edits.

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Config, ConfigStore};

/// Default poll period.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Watches the store's file modification time and reloads on change.
///
/// The watcher stops when [`ConfigWatcher::stop`] is called or when it is
/// dropped.
#[derive(Debug)]
pub struct ConfigWatcher {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Start watching with the default one-second interval.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(store: Arc<ConfigStore>, on_change: F) -> Self
    where
        F: Fn(Config) + Send + Sync + 'static,
    {
        Self::with_interval(store, WATCH_INTERVAL, on_change)
    }

    /// Start watching with a custom poll interval.
    pub fn with_interval<F>(store: Arc<ConfigStore>, interval: Duration, on_change: F) -> Self
    where
        F: Fn(Config) + Send + Sync + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();

        let task = tokio::spawn(async move {
            let mut last_seen = modified_at(&store);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let current = modified_at(&store);
                if current == last_seen {
                    continue;
                }
                last_seen = current;

                match store.load() {
                    Ok(config) => {
                        debug!(path = %store.path().display(), "Config file changed, reloaded");
                        on_change(config);
                    }
                    Err(e) => {
                        warn!(path = %store.path().display(), error = %e, "Ignoring unreadable config change");
                    }
                }
            }
        });

        Self {
            token,
            task: Some(task),
        }
    }

    /// Stop watching and wait for the poll task to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Whether the poll task is still alive.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn modified_at(store: &ConfigStore) -> Option<SystemTime> {
    std::fs::metadata(store.path())
        .and_then(|m| m.modified())
        .ok()
}
