//! Configuration for the merge engine.
//!
//! [`Config`] carries the user preferences the engine consults (memory
//! budget, scratch and output directories, decryption behavior) plus the
//! [`EngineSettings`] that tune chunking, batching, concurrency, retry and
//! polling. It serializes as camelCase JSON so the same document can be
//! persisted by [`ConfigStore`] and edited by hand.
//!
//! # Examples
//!
//! ```
//! use pdfmerge::config::Config;
//!
//! let mut config = Config::default();
//! config.max_memory = 64 * 1024 * 1024;
//! config.validate().unwrap();
//! ```

mod store;
mod watch;

pub use store::{ConfigStore, default_config_path};
pub use watch::ConfigWatcher;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MergeError, Result};

/// Default memory budget (512 MiB).
pub const DEFAULT_MAX_MEMORY: u64 = 512 * 1024 * 1024;

/// Default streaming chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Tuning knobs for the workflow and the merge strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Bytes copied per streaming step.
    pub chunk_size: usize,
    /// Inputs per batch before the batched strategy partitions.
    pub batch_size: usize,
    /// Batch workers allowed to run at once.
    pub max_concurrency: usize,
    /// Retries per stage after the first attempt.
    pub max_retries: u32,
    /// Linear backoff unit in milliseconds.
    pub retry_delay_ms: u64,
    /// Memory monitor sampling period in milliseconds.
    pub memory_check_interval_ms: u64,
    /// Poll period used by graceful cancellation in milliseconds.
    pub cancel_poll_interval_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: 10,
            max_concurrency: 2,
            max_retries: 3,
            retry_delay_ms: 1000,
            memory_check_interval_ms: 1000,
            cancel_poll_interval_ms: 100,
        }
    }
}

impl EngineSettings {
    /// Memory monitor sampling period.
    pub fn memory_check_interval(&self) -> Duration {
        Duration::from_millis(self.memory_check_interval_ms)
    }

    /// Graceful cancellation poll period.
    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms)
    }
}

/// User-facing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Memory budget in bytes; the reference point for pressure thresholds.
    pub max_memory: u64,
    /// Root for scratch directories. `None` uses the OS temp dir.
    pub temp_directory: Option<PathBuf>,
    /// Default parent for relative output paths.
    pub output_directory: Option<PathBuf>,
    /// Try `common_passwords` on encrypted inputs.
    pub auto_decrypt: bool,
    /// Passwords tried in order; duplicates are dropped.
    pub common_passwords: Vec<String>,
    /// Window width, passed through to the UI.
    pub window_width: u32,
    /// Window height, passed through to the UI.
    pub window_height: u32,
    /// Engine tuning.
    pub engine: EngineSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_memory: DEFAULT_MAX_MEMORY,
            temp_directory: None,
            output_directory: None,
            auto_decrypt: true,
            common_passwords: vec![String::new(), "password".into(), "123456".into()],
            window_width: 800,
            window_height: 600,
            engine: EngineSettings::default(),
        }
    }
}

impl Config {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The memory budget is zero
    /// - The chunk size is zero
    /// - The concurrency limit is zero
    /// - The batch size is below 2
    pub fn validate(&self) -> Result<()> {
        if self.max_memory == 0 {
            return Err(MergeError::config("maxMemory must be greater than zero"));
        }
        if self.engine.chunk_size == 0 {
            return Err(MergeError::config("chunkSize must be greater than zero"));
        }
        if self.engine.max_concurrency == 0 {
            return Err(MergeError::config("maxConcurrency must be greater than zero"));
        }
        if self.engine.batch_size < 2 {
            return Err(MergeError::config(format!(
                "batchSize must be at least 2, got {}",
                self.engine.batch_size
            )));
        }
        Ok(())
    }

    /// Drop repeated passwords, keeping the first occurrence of each.
    pub fn normalize_passwords(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.common_passwords.retain(|p| seen.insert(p.clone()));
    }

    /// Scratch root: the configured temp directory or the OS default.
    pub fn scratch_root(&self) -> PathBuf {
        self.temp_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Resolve a relative output path against the output directory.
    pub fn resolve_output(&self, output: &Path) -> PathBuf {
        match &self.output_directory {
            Some(dir) if output.is_relative() => dir.join(output),
            _ => output.to_path_buf(),
        }
    }
}
