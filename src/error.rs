//! Error types for reportq.

use thiserror::Error;

/// Errors produced by the mutation queue, the reconciler, and the CLI.
#[derive(Debug, Error)]
pub enum ReportqError {
    /// The backing medium cannot be read or written (quota, corruption, I/O).
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The remote rejected a replay because server-side state diverged.
    #[error("Sync conflict on record {record_id}: {reason}")]
    SyncConflict {
        /// Record whose replay was rejected
        record_id: String,
        /// Reason reported by the remote
        reason: String,
    },

    /// The queue database was written by a newer release.
    #[error("Unsupported queue schema: {0}")]
    UnsupportedSchema(String),

    /// The remote call failed for reasons unrelated to data validity.
    #[error("Transient network failure: {0}")]
    TransientNetwork(String),

    /// Entity type tag failed validation.
    #[error("Invalid entity type: {0}")]
    InvalidEntityType(String),

    /// Payload could not be interpreted.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Configuration problem.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested item does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization or parsing failure.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Filesystem failure outside the queue database.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReportqError {
    /// Whether this error means queued data may not be persisted.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<rusqlite::Error> for ReportqError {
    fn from(e: rusqlite::Error) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}
