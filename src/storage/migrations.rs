//! Database migrations for reportq.
//!
//! Each migration is a function that upgrades the schema by one version.
//! Migrations are run automatically when the database is opened.

use rusqlite::Connection;

use crate::error::ReportqError;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Get the current schema version from the database.
///
/// Returns 0 if no version has been set (new database).
pub fn get_version(conn: &Connection) -> Result<i32, ReportqError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| ReportqError::StorageUnavailable(format!("Failed to get schema version: {e}")))
}

/// Set the schema version in the database.
fn set_version(conn: &Connection, version: i32) -> Result<(), ReportqError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| ReportqError::StorageUnavailable(format!("Failed to set schema version: {e}")))
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<(), ReportqError> {
    let current = get_version(conn)?;

    if current > CURRENT_VERSION {
        return Err(ReportqError::UnsupportedSchema(format!(
            "Database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    for version in (current + 1)..=CURRENT_VERSION {
        run_migration(conn, version)?;
        set_version(conn, version)?;
    }

    Ok(())
}

/// Run a specific migration.
fn run_migration(conn: &Connection, version: i32) -> Result<(), ReportqError> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(ReportqError::StorageUnavailable(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: Initial schema.
///
/// Creates tables for:
/// - `mutation_queue`: queued mutations keyed by generated id, `seq` keeps
///   insertion order, `format_version` tags the payload shape
/// - `sync_conflicts`: records waiting for manual resolution
fn migrate_v1(conn: &Connection) -> Result<(), ReportqError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS mutation_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            entity_type TEXT NOT NULL,
            operation TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            synced_at TEXT,
            format_version INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_mutation_queue_synced
        ON mutation_queue(synced, seq);

        CREATE TABLE IF NOT EXISTS sync_conflicts (
            record_id TEXT PRIMARY KEY
                REFERENCES mutation_queue(id) ON DELETE CASCADE,
            reason TEXT NOT NULL,
            flagged_at TEXT NOT NULL
        );
        ",
    )
    .map_err(|e| ReportqError::StorageUnavailable(format!("Migration v1 failed: {e}")))
}
