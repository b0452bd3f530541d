//! Mutation queue storage and management.
//!
//! Provides durable persistence and querying of queued mutations. Every
//! operation runs as a single statement under the store lock, so readers
//! never observe a half-written record.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::record::{ConflictFlag, EntityType, MutationOp, MutationRecord};
use crate::error::ReportqError;
use crate::notice::{Notice, NoticeBoard};
use crate::storage::{Database, OpenOutcome};

const SELECT_RECORD: &str = r"SELECT id, entity_type, operation, payload, created_at, synced, format_version
                              FROM mutation_queue";

/// Durable queue of create/update/delete mutations.
pub struct MutationQueueStore {
    inner: Mutex<StoreInner>,
    notices: NoticeBoard,
    degraded: AtomicBool,
}

struct StoreInner {
    db: Database,
    last_created_at: Option<DateTime<Utc>>,
    max_size_bytes: Option<u64>,
}

/// Queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Number of records in the queue
    pub total: usize,
    /// Records waiting for the server
    pub pending: usize,
    /// Records acknowledged by the server
    pub synced: usize,
    /// Pending records flagged for manual resolution
    pub conflicted: usize,
    /// Oldest pending record timestamp
    pub oldest_pending: Option<DateTime<Utc>>,
    /// Approximate serialized size of the queue
    pub size_bytes: u64,
    /// Whether the queue only lives in memory for this session
    pub degraded: bool,
    /// Database file, `None` when in memory
    pub location: Option<PathBuf>,
}

impl MutationQueueStore {
    /// Open the queue at `path`.
    ///
    /// An unreadable file is moved aside and replaced by an empty queue; if
    /// nothing on disk is usable the queue lives in memory for the session.
    /// Both cases are logged and published as
    /// [`Notice::StorageUnavailable`].
    ///
    /// # Errors
    ///
    /// Returns an error only if not even an in-memory queue can be created.
    pub fn open(path: &Path, notices: NoticeBoard) -> Result<Self, ReportqError> {
        let (db, outcome) = Database::open_resilient(path)?;
        let store = Self::with_database(db, notices);

        match outcome {
            OpenOutcome::Clean => {
                debug!(path = %path.display(), "Opened mutation queue");
            },
            OpenOutcome::Recovered {
                reason,
                quarantined,
            } => {
                let moved = quarantined
                    .map(|p| format!(" (kept at {})", p.display()))
                    .unwrap_or_default();
                store.notices.publish(Notice::StorageUnavailable {
                    message: format!("Queue database was unreadable and has been reset{moved}: {reason}"),
                });
            },
            OpenOutcome::InMemory { reason } => {
                store.degraded.store(true, Ordering::SeqCst);
                store.notices.publish(Notice::StorageUnavailable {
                    message: format!("Queue is held in memory for this session: {reason}"),
                });
            },
        }

        Ok(store)
    }

    /// Create a queue over an existing database connection.
    #[must_use]
    pub fn with_database(db: Database, notices: NoticeBoard) -> Self {
        let last_created_at = latest_created_at(db.connection());
        let degraded = db.path().is_none();

        Self {
            inner: Mutex::new(StoreInner {
                db,
                last_created_at,
                max_size_bytes: None,
            }),
            notices,
            degraded: AtomicBool::new(degraded),
        }
    }

    /// Create an in-memory queue (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory(notices: NoticeBoard) -> Result<Self, ReportqError> {
        Ok(Self::with_database(Database::open_in_memory()?, notices))
    }

    /// Board on which this queue publishes notices.
    #[must_use]
    pub const fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    /// Whether the queue only lives in memory for this session.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Cap the on-disk size of the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the cap cannot be applied.
    pub fn limit_size(&self, max_bytes: u64) -> Result<(), ReportqError> {
        let mut inner = self.inner.lock();
        inner.db.limit_size(max_bytes)?;
        inner.max_size_bytes = Some(max_bytes);
        Ok(())
    }

    /// Append a mutation and return its generated id.
    ///
    /// # Errors
    ///
    /// Returns `ReportqError::StorageUnavailable` if the write is rejected
    /// (quota, read-only medium, I/O); a matching notice is published too.
    pub fn enqueue(
        &self,
        entity_type: EntityType,
        operation: MutationOp,
        payload: Value,
    ) -> Result<String, ReportqError> {
        let payload_json = serde_json::to_string(&payload)?;

        let mut inner = self.inner.lock();
        let now = Utc::now().trunc_subsecs(6);
        let created_at = inner.last_created_at.map_or(now, |last| last.max(now));
        let record = MutationRecord::new(entity_type, operation, payload, created_at);

        let inserted = inner.db.connection().execute(
            r"INSERT INTO mutation_queue (id, entity_type, operation, payload, created_at, synced, format_version)
              VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                record.id,
                record.entity_type.as_str(),
                record.operation.as_str(),
                payload_json,
                timestamp(&record.created_at),
                record.format_version,
            ],
        );

        if let Err(e) = inserted {
            return Err(self.write_failed(&mut inner, "Failed to enqueue mutation", &e));
        }

        inner.last_created_at = Some(created_at);
        let pending = count_pending(inner.db.connection()).ok();
        drop(inner);

        info!(
            record_id = %record.id,
            entity_type = %record.entity_type,
            operation = %record.operation,
            "Queued mutation"
        );
        if let Some(count) = pending {
            self.notices.publish(Notice::PendingCount { count });
        }

        Ok(record.id)
    }

    /// Every record, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn list_all(&self) -> Result<Vec<MutationRecord>, ReportqError> {
        self.read_records(&format!("{SELECT_RECORD} ORDER BY seq ASC"))
    }

    /// Records not yet acknowledged by the server, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn list_unsynced(&self) -> Result<Vec<MutationRecord>, ReportqError> {
        self.read_records(&format!("{SELECT_RECORD} WHERE synced = 0 ORDER BY seq ASC"))
    }

    /// Get a specific record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, id: &str) -> Result<Option<MutationRecord>, ReportqError> {
        let inner = self.inner.lock();
        let raw = inner
            .db
            .connection()
            .query_row(&format!("{SELECT_RECORD} WHERE id = ?1"), [id], RawRecord::from_row)
            .optional()
            .map_err(|e| storage_error("Failed to query record", &e))?;

        Ok(raw.and_then(RawRecord::decode_logged))
    }

    /// Flag a record as acknowledged by the server.
    ///
    /// Idempotent: an absent or already-synced id is a no-op. Returns whether
    /// the flag changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_synced(&self, id: &str) -> Result<bool, ReportqError> {
        let mut inner = self.inner.lock();
        let changed = inner.db.connection().execute(
            "UPDATE mutation_queue SET synced = 1, synced_at = ?1 WHERE id = ?2 AND synced = 0",
            params![timestamp(&Utc::now()), id],
        );

        match changed {
            Ok(rows) => {
                if rows > 0 {
                    debug!(record_id = %id, "Marked record synced");
                }
                Ok(rows > 0)
            },
            Err(e) => Err(self.write_failed(&mut inner, "Failed to mark record synced", &e)),
        }
    }

    /// Permanently delete a record. No-op if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove(&self, id: &str) -> Result<bool, ReportqError> {
        let mut inner = self.inner.lock();
        match inner
            .db
            .connection()
            .execute("DELETE FROM mutation_queue WHERE id = ?1", [id])
        {
            Ok(rows) => {
                if rows > 0 {
                    info!(record_id = %id, "Removed record");
                }
                Ok(rows > 0)
            },
            Err(e) => Err(self.write_failed(&mut inner, "Failed to remove record", &e)),
        }
    }

    /// Delete every synced record. Unsynced records are never touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_synced(&self) -> Result<usize, ReportqError> {
        let mut inner = self.inner.lock();
        match inner
            .db
            .connection()
            .execute("DELETE FROM mutation_queue WHERE synced = 1", [])
        {
            Ok(rows) => {
                info!(purged = rows, "Purged synced records");
                Ok(rows)
            },
            Err(e) => Err(self.write_failed(&mut inner, "Failed to purge synced records", &e)),
        }
    }

    /// Delete synced records acknowledged more than `age` ago.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_synced_older_than(&self, age: chrono::Duration) -> Result<usize, ReportqError> {
        let cutoff = Utc::now() - age;
        let mut inner = self.inner.lock();
        match inner.db.connection().execute(
            "DELETE FROM mutation_queue WHERE synced = 1 AND synced_at < ?1",
            [timestamp(&cutoff)],
        ) {
            Ok(rows) => {
                if rows > 0 {
                    info!(purged = rows, cutoff = %cutoff, "Retention sweep purged synced records");
                }
                Ok(rows)
            },
            Err(e) => Err(self.write_failed(&mut inner, "Failed to sweep synced records", &e)),
        }
    }

    /// Approximate serialized size of the queue contents in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn size_bytes(&self) -> Result<u64, ReportqError> {
        let inner = self.inner.lock();
        let mut stmt = inner
            .db
            .connection()
            .prepare(SELECT_RECORD)
            .map_err(|e| storage_error("Failed to prepare query", &e))?;
        let rows = stmt
            .query_map([], RawRecord::from_row)
            .map_err(|e| storage_error("Failed to measure queue", &e))?;

        let mut total = 0_u64;
        for row in rows {
            let raw = row.map_err(|e| storage_error("Failed to read record", &e))?;
            total += raw.stored_len();
        }
        Ok(total)
    }

    /// Number of records waiting for the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn pending_count(&self) -> Result<usize, ReportqError> {
        let inner = self.inner.lock();
        count_pending(inner.db.connection()).map_err(|e| storage_error("Failed to count pending", &e))
    }

    /// Flag an unsynced record for manual resolution.
    ///
    /// Returns `false` if the record is absent or already synced.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn flag_conflict(&self, id: &str, reason: &str) -> Result<bool, ReportqError> {
        let mut inner = self.inner.lock();
        match inner.db.connection().execute(
            r"INSERT INTO sync_conflicts (record_id, reason, flagged_at)
              SELECT id, ?2, ?3 FROM mutation_queue WHERE id = ?1 AND synced = 0
              ON CONFLICT(record_id) DO UPDATE SET
                  reason = excluded.reason,
                  flagged_at = excluded.flagged_at",
            params![id, reason, timestamp(&Utc::now())],
        ) {
            Ok(rows) => {
                if rows > 0 {
                    warn!(record_id = %id, reason = %reason, "Record flagged for manual resolution");
                }
                Ok(rows > 0)
            },
            Err(e) => Err(self.write_failed(&mut inner, "Failed to flag conflict", &e)),
        }
    }

    /// Drop the manual-resolution flag so the record is replayed again.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear_conflict(&self, id: &str) -> Result<bool, ReportqError> {
        let mut inner = self.inner.lock();
        match inner
            .db
            .connection()
            .execute("DELETE FROM sync_conflicts WHERE record_id = ?1", [id])
        {
            Ok(rows) => Ok(rows > 0),
            Err(e) => Err(self.write_failed(&mut inner, "Failed to clear conflict", &e)),
        }
    }

    /// Records waiting for manual resolution, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn conflicts(&self) -> Result<Vec<ConflictFlag>, ReportqError> {
        let inner = self.inner.lock();
        let conn = inner.db.connection();

        let mut stmt = conn
            .prepare(
                r"SELECT c.record_id, c.reason, c.flagged_at
                  FROM sync_conflicts c
                  JOIN mutation_queue q ON q.id = c.record_id
                  ORDER BY q.seq ASC",
            )
            .map_err(|e| storage_error("Failed to prepare query", &e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| storage_error("Failed to query conflicts", &e))?;

        let mut flags = Vec::new();
        for row in rows {
            let (record_id, reason, stamp) =
                row.map_err(|e| storage_error("Failed to read conflict", &e))?;
            // The flag still holds the chain back; only its age is unknown
            let flagged_at = parse_timestamp(&stamp).unwrap_or_else(|| {
                warn!(record_id = %record_id, flagged_at = %stamp, "Unreadable conflict timestamp");
                DateTime::<Utc>::MIN_UTC
            });
            flags.push(ConflictFlag {
                record_id,
                reason,
                flagged_at,
            });
        }

        Ok(flags)
    }

    /// Ids of records flagged for manual resolution.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn flagged_ids(&self) -> Result<HashSet<String>, ReportqError> {
        Ok(self
            .conflicts()?
            .into_iter()
            .map(|flag| flag.record_id)
            .collect())
    }

    /// Get queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn stats(&self) -> Result<QueueStats, ReportqError> {
        let records = self.list_all()?;
        let flagged = self.flagged_ids()?;
        let size_bytes = self.size_bytes()?;
        let location = self.inner.lock().db.path().map(Path::to_path_buf);

        let pending: Vec<&MutationRecord> = records.iter().filter(|r| !r.synced).collect();

        Ok(QueueStats {
            total: records.len(),
            pending: pending.len(),
            synced: records.len() - pending.len(),
            conflicted: pending.iter().filter(|r| flagged.contains(&r.id)).count(),
            oldest_pending: pending.iter().map(|r| r.created_at).min(),
            size_bytes,
            degraded: self.is_degraded(),
            location,
        })
    }

    fn read_records(&self, sql: &str) -> Result<Vec<MutationRecord>, ReportqError> {
        let mut inner = self.inner.lock();
        match query_records(inner.db.connection(), sql) {
            Ok(records) => Ok(records),
            Err(e) if is_corruption(&e) => {
                self.reset(&mut inner, &e.to_string());
                Ok(Vec::new())
            },
            Err(e) => Err(storage_error("Failed to read queue", &e)),
        }
    }

    /// Turn a failed write into an error the caller cannot miss.
    fn write_failed(
        &self,
        inner: &mut StoreInner,
        context: &str,
        e: &rusqlite::Error,
    ) -> ReportqError {
        let err = storage_error(context, e);
        error!(error = %e, "{context}");

        if is_corruption(e) {
            self.reset(inner, &e.to_string());
        } else {
            self.notices.publish(Notice::StorageUnavailable {
                message: err.to_string(),
            });
        }

        err
    }

    /// Replace a corrupt database with an empty queue.
    fn reset(&self, inner: &mut StoreInner, reason: &str) {
        error!(reason = %reason, "Queue database corrupt, resetting to an empty queue");

        let path = inner.db.path().map(Path::to_path_buf);
        let Ok(placeholder) = Database::open_in_memory() else {
            error!("Could not allocate a replacement queue");
            return;
        };
        // Release the file handle before the file is moved aside
        inner.db = placeholder;

        if let Some(path) = path {
            match Database::open_resilient(&path) {
                Ok((db, outcome)) => {
                    if matches!(outcome, OpenOutcome::InMemory { .. }) {
                        self.degraded.store(true, Ordering::SeqCst);
                    }
                    inner.db = db;
                },
                Err(e) => {
                    error!(error = %e, "Replacement queue failed to open");
                    self.degraded.store(true, Ordering::SeqCst);
                },
            }
        } else {
            self.degraded.store(true, Ordering::SeqCst);
        }

        if let Some(max) = inner.max_size_bytes {
            if let Err(e) = inner.db.limit_size(max) {
                warn!(error = %e, "Failed to re-apply size cap");
            }
        }

        self.notices.publish(Notice::StorageUnavailable {
            message: format!("Queue database was corrupt and has been reset: {reason}"),
        });
    }
}

/// One row as stored, before validation.
struct RawRecord {
    id: String,
    entity_type: String,
    operation: String,
    payload: String,
    created_at: String,
    synced: bool,
    format_version: u32,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            operation: row.get(2)?,
            payload: row.get(3)?,
            created_at: row.get(4)?,
            synced: row.get::<_, i64>(5)? != 0,
            format_version: row.get(6)?,
        })
    }

    fn decode(self) -> Result<MutationRecord, String> {
        let entity_type = EntityType::new(&self.entity_type).map_err(|e| e.to_string())?;
        let operation = self.operation.parse::<MutationOp>().map_err(|e| e.to_string())?;
        let payload = serde_json::from_str(&self.payload).map_err(|e| format!("payload: {e}"))?;
        let created_at = parse_timestamp(&self.created_at)
            .ok_or_else(|| format!("created_at: {}", self.created_at))?;

        Ok(MutationRecord {
            id: self.id,
            entity_type,
            operation,
            payload,
            created_at,
            synced: self.synced,
            format_version: self.format_version,
        })
    }

    /// Bytes this row accounts for. Undecodable rows count their raw text.
    fn stored_len(self) -> u64 {
        let raw_len = [
            &self.id,
            &self.entity_type,
            &self.operation,
            &self.payload,
            &self.created_at,
        ]
        .iter()
        .map(|field| field.len() as u64)
        .sum();
        self.decode()
            .map_or(raw_len, |record| record.serialized_len() as u64)
    }

    /// Decode, logging and dropping rows that cannot be interpreted.
    fn decode_logged(self) -> Option<MutationRecord> {
        let id = self.id.clone();
        match self.decode() {
            Ok(record) => Some(record),
            Err(reason) => {
                warn!(record_id = %id, reason = %reason, "Skipping undecodable queue row");
                None
            },
        }
    }
}

fn query_records(conn: &Connection, sql: &str) -> Result<Vec<MutationRecord>, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], RawRecord::from_row)?;

    let mut records = Vec::new();
    for row in rows {
        if let Some(record) = row?.decode_logged() {
            records.push(record);
        }
    }

    Ok(records)
}

fn count_pending(conn: &Connection) -> Result<usize, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM mutation_queue WHERE synced = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or(0))
}

fn latest_created_at(conn: &Connection) -> Option<DateTime<Utc>> {
    conn.query_row(
        "SELECT created_at FROM mutation_queue ORDER BY seq DESC LIMIT 1",
        [],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .ok()
    .flatten()
    .and_then(|s| parse_timestamp(&s))
}

fn is_corruption(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
    )
}

fn storage_error(context: &str, e: &rusqlite::Error) -> ReportqError {
    ReportqError::StorageUnavailable(format!("{context}: {e}"))
}

/// Fixed-width UTC timestamps so stored values sort lexically.
fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
