//! Queue inspection and maintenance commands.

use std::collections::HashSet;
use std::io::Read;

use colored::Colorize;
use serde_json::{json, Value};

use super::Context;
use crate::cli::args::{EnqueueArgs, OutputFormat};
use crate::error::ReportqError;
use crate::notice::Notice;
use crate::output::{format_conflicts, format_record, format_records, format_stats, to_json};
use crate::queue::EntityType;

/// Queue a mutation.
///
/// # Errors
///
/// Returns an error if the payload is not JSON, the write is rejected, or
/// the queue database cannot be opened. A queue held in memory would vanish
/// when this process exits, so nothing is written to it.
pub fn enqueue(ctx: &Context, args: EnqueueArgs) -> Result<String, ReportqError> {
    let raw = if args.payload == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        args.payload
    };

    let payload: Value = serde_json::from_str(&raw)
        .map_err(|e| ReportqError::InvalidPayload(format!("Payload is not valid JSON: {e}")))?;

    let store = ctx.open_store()?;
    if store.is_degraded() {
        return Err(ReportqError::StorageUnavailable(format!(
            "{} cannot be opened, the change was not queued",
            ctx.config.queue.database_path(&ctx.paths).display()
        )));
    }
    let id = store.enqueue(args.entity_type.clone(), args.operation, payload)?;
    let pending = store.pending_count()?;

    match ctx.format {
        OutputFormat::Json => to_json(&json!({
            "id": id,
            "entity_type": args.entity_type,
            "operation": args.operation,
            "pending": pending,
        })),
        OutputFormat::Pretty => Ok(format!(
            "{} Queued {} {} {}\n  {}",
            "✓".green(),
            args.operation.display_name(),
            args.entity_type,
            id.dimmed(),
            Notice::PendingCount { count: pending }.headline()
        )),
    }
}

/// List records.
///
/// # Errors
///
/// Returns an error if the queue cannot be read.
pub fn list(
    ctx: &Context,
    unsynced: bool,
    entity: Option<&EntityType>,
) -> Result<String, ReportqError> {
    let store = ctx.open_store()?;
    let mut records = if unsynced {
        store.list_unsynced()?
    } else {
        store.list_all()?
    };
    if let Some(entity) = entity {
        records.retain(|r| &r.entity_type == entity);
    }
    let flagged = store.flagged_ids()?;

    let title = if unsynced { "Pending" } else { "Queue" };
    format_records(&records, &flagged, title, ctx.format)
}

/// Show one record.
///
/// # Errors
///
/// Returns `ReportqError::NotFound` if no record has this id.
pub fn show(ctx: &Context, id: &str) -> Result<String, ReportqError> {
    let store = ctx.open_store()?;
    let record = store
        .get(id)?
        .ok_or_else(|| ReportqError::NotFound(format!("Record {id}")))?;
    let conflict = store.conflicts()?.into_iter().find(|c| c.record_id == id);

    format_record(&record, conflict.as_ref(), ctx.format)
}

/// Show queue statistics.
///
/// # Errors
///
/// Returns an error if the queue cannot be read.
pub fn status(ctx: &Context) -> Result<String, ReportqError> {
    let store = ctx.open_store()?;
    format_stats(&store.stats()?, ctx.format)
}

/// Delete a record.
///
/// # Errors
///
/// Returns `ReportqError::NotFound` if no record has this id.
pub fn remove(ctx: &Context, id: &str) -> Result<String, ReportqError> {
    let store = ctx.open_store()?;
    if !store.remove(id)? {
        return Err(ReportqError::NotFound(format!("Record {id}")));
    }

    match ctx.format {
        OutputFormat::Json => to_json(&json!({ "removed": id })),
        OutputFormat::Pretty => Ok(format!("{} Removed {id}", "✓".green())),
    }
}

/// Delete synced records, optionally only older ones.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn purge(ctx: &Context, older_than_hours: Option<u64>) -> Result<String, ReportqError> {
    let store = ctx.open_store()?;
    let purged = match older_than_hours {
        Some(hours) => {
            let hours = i64::try_from(hours)
                .map_err(|_| ReportqError::InvalidPayload(format!("Too many hours: {hours}")))?;
            store.purge_synced_older_than(chrono::Duration::hours(hours))?
        },
        None => store.purge_synced()?,
    };

    match ctx.format {
        OutputFormat::Json => to_json(&json!({ "purged": purged })),
        OutputFormat::Pretty => Ok(format!(
            "{} Purged {purged} synced record{}",
            "✓".green(),
            if purged == 1 { "" } else { "s" }
        )),
    }
}

/// List records waiting for manual resolution.
///
/// # Errors
///
/// Returns an error if the queue cannot be read.
pub fn conflicts(ctx: &Context) -> Result<String, ReportqError> {
    let store = ctx.open_store()?;
    let flags = store.conflicts()?;
    let ids: HashSet<&str> = flags.iter().map(|f| f.record_id.as_str()).collect();
    let mut records: Vec<_> = store
        .list_unsynced()?
        .into_iter()
        .filter(|r| ids.contains(r.id.as_str()))
        .collect();

    let paired: Vec<_> = flags
        .into_iter()
        .map(|flag| {
            let record = records
                .iter()
                .position(|r| r.id == flag.record_id)
                .map(|i| records.swap_remove(i));
            (flag, record)
        })
        .collect();

    format_conflicts(&paired, ctx.format)
}

/// Retry or discard a rejected record.
///
/// # Errors
///
/// Returns `ReportqError::NotFound` if the record is not flagged.
pub fn resolve(ctx: &Context, id: &str, retry: bool) -> Result<String, ReportqError> {
    let store = ctx.open_store()?;
    let flagged = store.flagged_ids()?;
    if !flagged.contains(id) {
        return Err(ReportqError::NotFound(format!(
            "No conflict recorded for {id}"
        )));
    }

    let action = if retry {
        store.clear_conflict(id)?;
        "retry"
    } else {
        store.remove(id)?;
        "discard"
    };

    match ctx.format {
        OutputFormat::Json => to_json(&json!({ "record_id": id, "action": action })),
        OutputFormat::Pretty if retry => Ok(format!(
            "{} {id} will be replayed on the next sync",
            "✓".green()
        )),
        OutputFormat::Pretty => Ok(format!("{} Discarded {id}", "✓".green())),
    }
}
