//! JSON output formatting for reportq.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::json;

use crate::error::ReportqError;
use crate::queue::{ConflictFlag, MutationRecord};

/// Format records as JSON
///
/// # Errors
///
/// Returns `ReportqError::Parse` if JSON serialization fails.
pub fn format_records_json(
    records: &[MutationRecord],
    flagged: &HashSet<String>,
    title: &str,
) -> Result<String, ReportqError> {
    let items: Vec<_> = records
        .iter()
        .map(|record| {
            json!({
                "id": record.id,
                "entity_type": record.entity_type,
                "operation": record.operation,
                "payload": record.payload,
                "created_at": record.created_at,
                "synced": record.synced,
                "conflict": flagged.contains(&record.id),
            })
        })
        .collect();

    let output = json!({
        "list": title,
        "count": records.len(),
        "items": items
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format a single record as JSON
///
/// # Errors
///
/// Returns `ReportqError::Parse` if JSON serialization fails.
pub fn format_record_json(
    record: &MutationRecord,
    conflict: Option<&ConflictFlag>,
) -> Result<String, ReportqError> {
    let mut value = serde_json::to_value(record)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("conflict".to_string(), serde_json::to_value(conflict)?);
    }
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Format conflicts as JSON
///
/// # Errors
///
/// Returns `ReportqError::Parse` if JSON serialization fails.
pub fn format_conflicts_json(
    conflicts: &[(ConflictFlag, Option<MutationRecord>)],
) -> Result<String, ReportqError> {
    let items: Vec<_> = conflicts
        .iter()
        .map(|(flag, record)| {
            json!({
                "record_id": flag.record_id,
                "reason": flag.reason,
                "flagged_at": flag.flagged_at,
                "record": record,
            })
        })
        .collect();

    let output = json!({
        "count": conflicts.len(),
        "items": items
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Generic JSON formatter for any serializable type
///
/// # Errors
///
/// Returns `ReportqError::Parse` if JSON serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, ReportqError> {
    Ok(serde_json::to_string_pretty(value)?)
}
