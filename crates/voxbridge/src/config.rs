//! Daemon configuration: a small JSON file with platform-dir defaults.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::job::ModelKind;

const APP_DIR: &str = "voxbridge";
const CONFIG_FILE: &str = "config.json";

fn default_debounce_ms() -> u64 {
    50
}

fn default_rescan_secs() -> u64 {
    5
}

fn default_history_entries() -> usize {
    crate::history::DEFAULT_MAX_ENTRIES
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root of the filesystem job queue. Defaults to a per-user data dir.
    #[serde(default)]
    pub queue_root: Option<PathBuf>,

    /// Model used when a manifest does not pick one.
    #[serde(default)]
    pub model: ModelKind,

    /// Default language code, `None` for auto-detect.
    #[serde(default)]
    pub language: Option<String>,

    /// Directory holding the model files. Defaults next to the queue root.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_rescan_secs")]
    pub rescan_secs: u64,

    #[serde(default = "default_history_entries")]
    pub history_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_root: None,
            model: ModelKind::default(),
            language: None,
            model_dir: None,
            debounce_ms: default_debounce_ms(),
            rescan_secs: default_rescan_secs(),
            history_entries: default_history_entries(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::Validation {
                message: "debounce_ms must be greater than zero".to_string(),
            });
        }
        if self.rescan_secs == 0 {
            return Err(ConfigError::Validation {
                message: "rescan_secs must be greater than zero".to_string(),
            });
        }
        if self.history_entries == 0 {
            return Err(ConfigError::Validation {
                message: "history_entries must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// The queue root, falling back to `<data dir>/voxbridge/queue`.
    pub fn resolved_queue_root(&self) -> PathBuf {
        if let Some(root) = &self.queue_root {
            return root.clone();
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("queue")
    }

    /// Where history lives, beside the queue.
    pub fn resolved_history_dir(&self) -> PathBuf {
        self.resolved_queue_root()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("history")
    }

    /// Where model files live, `<data dir>/voxbridge/models` by default.
    pub fn resolved_model_dir(&self) -> PathBuf {
        if let Some(dir) = &self.model_dir {
            return dir.clone();
        }
        self.resolved_queue_root()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("models")
    }
}

/// Default config file location, `<config dir>/voxbridge/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}

/// Loads a config file; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    match fs::read_to_string(path) {
        Ok(contents) => load_config_from_str(&contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No config at {}, using defaults", path.display());
            Ok(Config::default())
        }
        Err(e) => Err(ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

pub fn load_config_from_str(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(contents)?;
    config.validate()?;
    Ok(config)
}
