//! Per-stage retry policy.
//!
//! Retryability is decided by [`MergeError::is_retryable`], which looks at the
//! error's kind. Only errors without a kind fall back to [`message_is_retryable`].

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::EngineSettings;
use crate::error::{MergeError, Result};

/// Substrings that mark an untagged error as transient.
const RETRYABLE_MARKERS: &[&str] = &["network", "temp file", "out of memory", "i/o", "timeout"];

/// Substrings that mark an untagged error as fatal. These win over
/// [`RETRYABLE_MARKERS`] when both match.
const FATAL_MARKERS: &[&str] = &[
    "file not found",
    "permission denied",
    "invalid pdf format",
    "cancelled by user",
];

/// Outcome of scanning an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Matched a transient marker.
    Transient,
    /// Matched a fatal marker.
    Fatal,
    /// Matched nothing.
    Unmatched,
}

/// Classify an error message by case-insensitive substring match.
pub fn classify_message(message: &str) -> MessageClass {
    let lower = message.to_lowercase();
    if FATAL_MARKERS.iter().any(|m| lower.contains(m)) {
        MessageClass::Fatal
    } else if RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        MessageClass::Transient
    } else {
        MessageClass::Unmatched
    }
}

/// Whether an untagged error message should be retried.
///
/// Unmatched messages are retryable.
pub fn message_is_retryable(message: &str) -> bool {
    classify_message(message) != MessageClass::Fatal
}

/// Linear-backoff retry policy shared by every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay unit; attempt `n` waits `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Build a policy from engine settings.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.retry_delay_ms),
        }
    }

    /// Total attempts a stage may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }

    /// Whether another attempt should follow a failure on `attempt`.
    pub fn should_retry(&self, err: &MergeError, attempt: u32) -> bool {
        attempt < self.max_attempts() && err.is_retryable()
    }

    /// Sleep for the backoff after `attempt`, returning early on cancellation.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the token fires during the wait.
    pub async fn backoff(&self, attempt: u32, token: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = token.cancelled() => Err(MergeError::Cancelled),
            _ = tokio::time::sleep(self.delay_for(attempt)) => Ok(()),
        }
    }
}
