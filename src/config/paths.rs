//! Path resolution for reportq configuration and data files.
//!
//! All reportq data is stored in `~/.reportq/` (or `$REPORTQ_HOME`):
//! - `config.yaml` - Main configuration file
//! - `reportq.db` - SQLite database holding the mutation queue

use std::path::PathBuf;

use crate::error::ReportqError;

/// Environment variable overriding the data root.
pub const HOME_ENV: &str = "REPORTQ_HOME";

/// Paths to reportq configuration and data directories.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.reportq/`
    pub root: PathBuf,
    /// Config file: `~/.reportq/config.yaml`
    pub config_file: PathBuf,
    /// Database file: `~/.reportq/reportq.db`
    pub database: PathBuf,
}

impl Paths {
    /// Create paths based on `$REPORTQ_HOME` or the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if neither location can be determined.
    pub fn new() -> Result<Self, ReportqError> {
        if let Some(root) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }

        let home = std::env::var("HOME").map_err(|_| {
            ReportqError::Config("Could not determine home directory".to_string())
        })?;

        Ok(Self::with_root(PathBuf::from(home).join(".reportq")))
    }

    /// Create paths with a custom root directory (useful for testing).
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            database: root.join("reportq.db"),
            root,
        }
    }

    /// Ensure all directories exist, creating them if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), ReportqError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| {
                ReportqError::Config(format!(
                    "Failed to create directory {}: {e}",
                    self.root.display()
                ))
            })?;
        }

        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_root(PathBuf::from(".reportq")))
    }
}
