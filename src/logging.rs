//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber writing to stderr so command
//! output on stdout stays clean. `RUST_LOG` overrides the configured level.
//!
//! Field names used across the crate: `record_id`, `entity_type`,
//! `operation`, `chain`.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogConfig, LogFormat};
use crate::error::ReportqError;

/// Initialize the global logging subscriber.
///
/// Call once at startup.
///
/// # Errors
///
/// Returns `ReportqError::Config` if the level filter is invalid or a
/// subscriber is already installed.
pub fn init_logging(config: &LogConfig, ansi: bool) -> Result<(), ReportqError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            ReportqError::Config(format!("Invalid log level '{}': {e}", config.level))
        })?,
    };

    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_ansi(ansi),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .try_init(),
    };

    installed.map_err(|e| ReportqError::Config(format!("Failed to initialize logging: {e}")))?;

    tracing::debug!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        // Only meaningful when RUST_LOG does not take precedence
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            level: "reportq=notalevel".to_string(),
            format: LogFormat::Pretty,
        };
        assert!(matches!(
            init_logging(&config, false),
            Err(ReportqError::Config(_))
        ));
    }
}
