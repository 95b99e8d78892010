//! JSON persistence for [`Config`].

use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

use super::{Config, EngineSettings};
use crate::error::{MergeError, Result};

/// Directory under the home directory holding the config file.
const CONFIG_DIR: &str = ".pdf-merger";

/// File name of the config document.
const CONFIG_FILE: &str = "config.json";

/// `~/.pdf-merger/config.json`, or `None` when no home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(CONFIG_DIR).join(CONFIG_FILE))
}

/// On-disk shape: every field optional so partial documents load.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    max_memory: Option<u64>,
    temp_directory: Option<PathBuf>,
    output_directory: Option<PathBuf>,
    auto_decrypt: Option<bool>,
    common_passwords: Option<Vec<String>>,
    window_width: Option<u32>,
    window_height: Option<u32>,
    engine: Option<EngineSettings>,
}

impl ConfigFile {
    /// Fill absent fields from defaults; an absent `autoDecrypt` keeps `prior`.
    fn resolve(self, prior_auto_decrypt: bool) -> Config {
        let defaults = Config::default();
        let mut config = Config {
            max_memory: self.max_memory.unwrap_or(defaults.max_memory),
            temp_directory: self.temp_directory.or(defaults.temp_directory),
            output_directory: self.output_directory.or(defaults.output_directory),
            auto_decrypt: self.auto_decrypt.unwrap_or(prior_auto_decrypt),
            common_passwords: self.common_passwords.unwrap_or(defaults.common_passwords),
            window_width: self.window_width.unwrap_or(defaults.window_width),
            window_height: self.window_height.unwrap_or(defaults.window_height),
            engine: self.engine.unwrap_or(defaults.engine),
        };
        config.normalize_passwords();
        config
    }
}

/// Reads and writes the configuration document.
///
/// Keeps the last loaded config in memory so a document that omits
/// `autoDecrypt` inherits the previous value.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Config>,
}

impl ConfigStore {
    /// Create a store for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Config::default()),
        }
    }

    /// Create a store at `~/.pdf-merger/config.json`.
    ///
    /// # Errors
    ///
    /// Returns a config error if no home directory is set.
    pub fn at_default_location() -> Result<Self> {
        default_config_path()
            .map(Self::new)
            .ok_or_else(|| MergeError::config("cannot locate home directory for config file"))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last loaded or saved configuration.
    pub fn current(&self) -> Config {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Load the document, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Config> {
        let prior_auto_decrypt = self.current().auto_decrypt;

        let config = match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                let file: ConfigFile = serde_json::from_str(&text).map_err(|e| {
                    MergeError::config(format!("{}: {e}", self.path.display()))
                })?;
                file.resolve(prior_auto_decrypt)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Config file not found, using defaults");
                ConfigFile::default().resolve(prior_auto_decrypt)
            }
            Err(e) => return Err(MergeError::from_io_at(&self.path, e)),
        };

        if let Err(e) = config.validate() {
            warn!(path = %self.path.display(), error = %e, "Loaded config is invalid");
            return Err(e);
        }

        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config.clone();
        Ok(config)
    }

    /// Write the document atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or cannot be written.
    pub fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;

        let mut config = config.clone();
        config.normalize_passwords();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| MergeError::from_io_at(parent, e))?;
        }

        let json = serde_json::to_string_pretty(&config)?;
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)
                .map_err(|e| MergeError::from_io_at(&tmp_path, e))?;
            file.write_all(json.as_bytes())
                .and_then(|_| file.write_all(b"\n"))
                .and_then(|_| file.sync_all())
                .map_err(|e| MergeError::from_io_at(&tmp_path, e))?;
        }
        std::fs::rename(&tmp_path, &self.path).map_err(|e| MergeError::from_io_at(&self.path, e))?;

        debug!(path = %self.path.display(), "Config saved");
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
        Ok(())
    }
}
