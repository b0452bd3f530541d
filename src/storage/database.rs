//! `SQLite` database connection and operations.
//!
//! The database is stored at `~/.reportq/reportq.db` and holds the mutation
//! queue together with its manual-resolution side table.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::error::ReportqError;

use super::migrations;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

/// How a resilient open ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The file opened cleanly (possibly freshly created).
    Clean,
    /// The file was unreadable; it was moved aside and a new one created.
    Recovered {
        /// Why the original file was rejected
        reason: String,
        /// Where the unreadable file now lives
        quarantined: Option<PathBuf>,
    },
    /// Nothing on disk could be used; the queue lives in memory only.
    InMemory {
        /// Why the on-disk database could not be used
        reason: String,
    },
}

impl Database {
    /// Open the database at a specific path.
    ///
    /// Creates the database file and runs migrations if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened, fails its
    /// integrity check, or migrations fail.
    pub fn open_at(path: &Path) -> Result<Self, ReportqError> {
        let conn = Connection::open(path).map_err(|e| {
            ReportqError::StorageUnavailable(format!(
                "Failed to open database {}: {e}",
                path.display()
            ))
        })?;

        let db = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        db.prepare()?;

        Ok(db)
    }

    /// Open an in-memory database (useful for testing and as a fallback).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self, ReportqError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            ReportqError::StorageUnavailable(format!("Failed to open in-memory database: {e}"))
        })?;

        let db = Self { conn, path: None };
        db.prepare()?;

        Ok(db)
    }

    /// Open the database at `path`, recovering from an unreadable file.
    ///
    /// A file that is not a database or fails its integrity check is renamed
    /// to `<name>.corrupt-<timestamp>` and replaced by an empty queue. If no
    /// file can be used at all the queue falls back to memory for the
    /// session. A file written by a newer schema is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `ReportqError::UnsupportedSchema` for a newer schema, or an
    /// error if even the in-memory fallback cannot be built.
    pub fn open_resilient(path: &Path) -> Result<(Self, OpenOutcome), ReportqError> {
        let first_error = match Self::open_at(path) {
            Ok(db) => return Ok((db, OpenOutcome::Clean)),
            Err(e @ ReportqError::UnsupportedSchema(_)) => return Err(e),
            Err(e) => e.to_string(),
        };

        error!(
            path = %path.display(),
            error = %first_error,
            "Queue database unreadable, resetting to an empty queue"
        );

        let quarantined = if path.exists() {
            match quarantine(path) {
                Ok(moved) => Some(moved),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to move corrupt database aside");
                    None
                },
            }
        } else {
            None
        };

        if quarantined.is_some() || !path.exists() {
            match Self::open_at(path) {
                Ok(db) => {
                    info!(path = %path.display(), "Created fresh queue database");
                    return Ok((
                        db,
                        OpenOutcome::Recovered {
                            reason: first_error,
                            quarantined,
                        },
                    ));
                },
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Fresh queue database failed to open");
                },
            }
        }

        warn!("Falling back to an in-memory queue for this session");
        let db = Self::open_in_memory()?;
        Ok((db, OpenOutcome::InMemory { reason: first_error }))
    }

    fn prepare(&self) -> Result<(), ReportqError> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| {
                ReportqError::StorageUnavailable(format!("Failed to enable foreign keys: {e}"))
            })?;

        self.check_integrity()?;
        migrations::run(&self.conn)
    }

    fn check_integrity(&self) -> Result<(), ReportqError> {
        let verdict: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(|e| ReportqError::StorageUnavailable(format!("Integrity check failed: {e}")))?;

        if verdict == "ok" {
            Ok(())
        } else {
            Err(ReportqError::StorageUnavailable(format!(
                "Integrity check failed: {verdict}"
            )))
        }
    }

    /// Cap the database file size.
    ///
    /// Inserts that would grow the file past the cap fail with `SQLITE_FULL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pragma cannot be applied.
    pub fn limit_size(&self, max_bytes: u64) -> Result<(), ReportqError> {
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))?;
        let page_size = u64::try_from(page_size.max(1)).unwrap_or(4096);
        let pages = (max_bytes / page_size).max(1);

        // The pragma answers with the effective cap, which never drops below
        // the pages already in use
        let effective: i64 = self
            .conn
            .query_row(&format!("PRAGMA max_page_count = {pages}"), [], |row| row.get(0))
            .map_err(|e| ReportqError::StorageUnavailable(format!("Failed to cap database size: {e}")))?;
        debug!(requested = pages, effective, "Capped queue database size");

        Ok(())
    }

    /// Get the current schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<i32, ReportqError> {
        migrations::get_version(&self.conn)
    }

    /// Location of the database file, `None` when held in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a reference to the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Move an unreadable database file (and its journal) out of the way.
fn quarantine(path: &Path) -> std::io::Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let file_name = path
        .file_name()
        .map_or_else(|| "reportq.db".into(), |n| n.to_string_lossy().into_owned());
    let target = path.with_file_name(format!("{file_name}.corrupt-{stamp}"));

    std::fs::rename(path, &target)?;

    for suffix in ["-journal", "-wal", "-shm"] {
        let side = path.with_file_name(format!("{file_name}{suffix}"));
        if side.exists() {
            let _ = std::fs::remove_file(&side);
        }
    }

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.schema_version().unwrap() > 0);
        assert!(db.path().is_none());
    }

    #[test]
    fn test_open_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::open_at(&db_path).unwrap();
        assert!(db.schema_version().unwrap() > 0);
        assert!(db_path.exists());
    }

    #[test]
    fn test_reopen_database() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        {
            let db = Database::open_at(&db_path).unwrap();
            assert!(db.schema_version().unwrap() > 0);
        }

        {
            let db = Database::open_at(&db_path).unwrap();
            assert!(db.schema_version().unwrap() > 0);
        }
    }

    #[test]
    fn test_open_empty_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("empty.db");
        std::fs::write(&db_path, b"").unwrap();

        let (db, outcome) = Database::open_resilient(&db_path).unwrap();
        assert_eq!(outcome, OpenOutcome::Clean);
        assert!(db.schema_version().unwrap() > 0);
    }

    #[test]
    fn test_corrupt_file_is_quarantined() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("queue.db");
        std::fs::write(&db_path, vec![0x42_u8; 8192]).unwrap();

        assert!(Database::open_at(&db_path).is_err());

        let (db, outcome) = Database::open_resilient(&db_path).unwrap();
        match outcome {
            OpenOutcome::Recovered { quarantined, .. } => {
                let moved = quarantined.unwrap();
                assert!(moved.exists());
                assert!(moved
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .starts_with("queue.db.corrupt-"));
            },
            other => panic!("Expected recovery, got {other:?}"),
        }
        assert_eq!(db.path(), Some(db_path.as_path()));
        assert!(db.schema_version().unwrap() > 0);
    }

    #[test]
    fn test_newer_schema_is_not_reset() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("queue.db");
        {
            let db = Database::open_at(&db_path).unwrap();
            db.connection()
                .execute_batch(&format!("PRAGMA user_version = {};", migrations::CURRENT_VERSION + 1))
                .unwrap();
        }

        let err = Database::open_resilient(&db_path).err().unwrap();

        assert!(matches!(err, ReportqError::UnsupportedSchema(_)));
        assert!(db_path.exists());
        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_unopenable_path_falls_back_to_memory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("missing-dir").join("queue.db");

        let (db, outcome) = Database::open_resilient(&db_path).unwrap();
        assert!(matches!(outcome, OpenOutcome::InMemory { .. }));
        assert!(db.path().is_none());
    }
}
