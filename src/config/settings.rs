//! Configuration settings for reportq.
//!
//! Settings are loaded from `~/.reportq/config.yaml`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::args::OutputFormat;
use crate::config::Paths;
use crate::error::ReportqError;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Queue storage settings.
    pub queue: QueueConfig,
    /// Reconciliation settings.
    pub sync: SyncConfig,
    /// Logging settings.
    pub log: LogConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default output format.
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
    /// Color output setting.
    #[serde(default = "default_color")]
    pub color: ColorSetting,
}

/// Color output setting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColorSetting {
    /// Auto-detect based on terminal.
    #[default]
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

/// Queue storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Database location; defaults to `~/.reportq/reportq.db`.
    pub database: Option<PathBuf>,
    /// Synced records older than this are purged by the retention sweep.
    /// Zero disables the sweep.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// Upper bound on the database file size. Writes beyond it fail with
    /// a storage error instead of growing the file.
    pub max_size_bytes: Option<u64>,
}

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the remote API.
    pub remote_url: Option<String>,
    /// Bearer token sent to the remote API.
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Periodic sync interval while online, in seconds. Zero disables.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Payload field holding the entity's own identifier.
    #[serde(default = "default_correlation_field")]
    pub correlation_field: String,
    /// Number of entity chains replayed concurrently.
    #[serde(default = "default_max_concurrent_chains")]
    pub max_concurrent_chains: usize,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// JSON lines.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level filter; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

// Default value functions for serde
const fn default_output_format() -> OutputFormat {
    OutputFormat::Pretty
}

const fn default_color() -> ColorSetting {
    ColorSetting::Auto
}

const fn default_retention_hours() -> u64 {
    24 * 7
}

const fn default_timeout_secs() -> u64 {
    15
}

const fn default_interval_secs() -> u64 {
    300
}

fn default_correlation_field() -> String {
    "id".to_string()
}

const fn default_max_concurrent_chains() -> usize {
    4
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: default_output_format(),
            color: default_color(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database: None,
            retention_hours: default_retention_hours(),
            max_size_bytes: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            token: None,
            timeout_secs: default_timeout_secs(),
            interval_secs: default_interval_secs(),
            correlation_field: default_correlation_field(),
            max_concurrent_chains: default_max_concurrent_chains(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl QueueConfig {
    /// Resolve the database path against the default data root.
    #[must_use]
    pub fn database_path(&self, paths: &Paths) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| paths.database.clone())
    }

    /// Retention window for synced records, if the sweep is enabled.
    #[must_use]
    pub fn retention(&self) -> Option<chrono::Duration> {
        if self.retention_hours == 0 {
            return None;
        }
        i64::try_from(self.retention_hours)
            .ok()
            .map(chrono::Duration::hours)
    }
}

impl SyncConfig {
    /// Periodic sync interval, if enabled.
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        if self.interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.interval_secs))
        }
    }

    /// Request timeout for remote calls.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, ReportqError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            ReportqError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            ReportqError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), ReportqError> {
        let contents = serde_yaml::to_string(self)
            .map_err(|e| ReportqError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, contents).map_err(|e| {
            ReportqError::Config(format!(
                "Failed to write config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Reject values the reconciler cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `ReportqError::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<(), ReportqError> {
        if self.sync.correlation_field.trim().is_empty() {
            return Err(ReportqError::Config(
                "sync.correlation_field must not be empty".to_string(),
            ));
        }
        if self.sync.max_concurrent_chains == 0 {
            return Err(ReportqError::Config(
                "sync.max_concurrent_chains must be at least 1".to_string(),
            ));
        }
        if self.sync.timeout_secs == 0 {
            return Err(ReportqError::Config(
                "sync.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
