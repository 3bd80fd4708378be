//! Configuration types for StitchWork
//!
//! The file form is TOML. Every field has a default, so an absent or partial
//! file still yields a usable configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the manifest file kept inside the upload directory
pub const MANIFEST_FILE_NAME: &str = ".file_queue.json";

/// Default maximum number of tracked artifacts
pub const DEFAULT_MAX_COUNT: usize = 100;

/// Default maximum artifact age (1 hour)
pub const DEFAULT_MAX_AGE_SECS: u64 = 60 * 60;

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registry limits and location
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Background sweeper schedule
    #[serde(default)]
    pub sweeper: SweeperConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load a configuration file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }
}

/// Registry configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory holding the tracked artifacts and the manifest
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Maximum number of live records
    #[serde(default = "default_max_count")]
    pub max_count: usize,
    /// Maximum record age in seconds
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            max_count: DEFAULT_MAX_COUNT,
            max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }
}

impl RegistryConfig {
    /// Create config for an upload directory with default limits
    pub fn with_upload_dir(upload_dir: impl AsRef<Path>) -> Self {
        Self {
            upload_dir: upload_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Set the maximum number of live records
    #[must_use]
    pub fn max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count;
        self
    }

    /// Set the maximum record age
    ///
    /// The limit is kept in whole seconds; a fractional part rounds up, so a
    /// non-zero duration never becomes a zero limit.
    #[must_use]
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age_secs = max_age.as_secs() + u64::from(max_age.subsec_nanos() > 0);
        self
    }

    /// Maximum record age as a duration
    #[must_use]
    pub const fn max_age_duration(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Full path of the manifest file
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.upload_dir.join(MANIFEST_FILE_NAME)
    }

    /// Reject limits the registry cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.max_count == 0 {
            return Err(Error::configuration("max_count must be greater than zero"));
        }
        if self.upload_dir.as_os_str().is_empty() {
            return Err(Error::configuration("upload_dir must not be empty"));
        }
        Ok(())
    }
}

/// Background sweeper schedule
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Start the sweeper alongside the registry
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Grace period before the first sweep (seconds)
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Pause between sweeps (seconds)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Pause after a failed sweep (seconds)
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_secs: default_initial_delay_secs(),
            interval_secs: default_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

const fn default_max_count() -> usize {
    DEFAULT_MAX_COUNT
}

const fn default_max_age_secs() -> u64 {
    DEFAULT_MAX_AGE_SECS
}

const fn default_true() -> bool {
    true
}

const fn default_initial_delay_secs() -> u64 {
    60
}

const fn default_interval_secs() -> u64 {
    300
}

const fn default_error_backoff_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}
