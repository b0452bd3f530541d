//! Record types for the mutation queue.
//!
//! Defines the queued unit of work and the tags that describe it.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReportqError;

/// Payload shape version written with every record.
pub const RECORD_FORMAT_VERSION: u32 = 1;

/// Tag naming the logical resource a mutation targets.
///
/// Lower-case ASCII letters, digits, `_` and `-` only, so it can appear in
/// URLs and log fields unescaped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityType(String);

impl EntityType {
    /// Reports.
    pub const REPORT: &'static str = "report";
    /// Findings attached to a report.
    pub const FINDING: &'static str = "finding";

    /// Validate and wrap an entity type tag.
    ///
    /// # Errors
    ///
    /// Returns `ReportqError::InvalidEntityType` if the tag is empty or
    /// contains characters outside `[a-z0-9_-]`.
    pub fn new(tag: &str) -> Result<Self, ReportqError> {
        let tag = tag.trim();
        let valid = !tag.is_empty()
            && tag
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

        if valid {
            Ok(Self(tag.to_string()))
        } else {
            Err(ReportqError::InvalidEntityType(tag.to_string()))
        }
    }

    /// The `report` entity type.
    #[must_use]
    pub fn report() -> Self {
        Self(Self::REPORT.to_string())
    }

    /// The `finding` entity type.
    #[must_use]
    pub fn finding() -> Self {
        Self(Self::FINDING.to_string())
    }

    /// Borrow the tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityType {
    type Error = ReportqError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.0
    }
}

impl FromStr for EntityType {
    type Err = ReportqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of mutation; decides how the payload is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
    /// Create a new entity
    Create,
    /// Update an existing entity
    Update,
    /// Delete an entity
    Delete,
}

impl MutationOp {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Get the display name for this operation.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

impl FromStr for MutationOp {
    type Err = ReportqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ReportqError::InvalidPayload(format!(
                "Unknown operation: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for MutationOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued create/update/delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Generated id, doubles as the idempotency token
    pub id: String,
    /// Targeted resource
    pub entity_type: EntityType,
    /// Mutation kind
    pub operation: MutationOp,
    /// Entity state at queue time
    pub payload: Value,
    /// Enqueue time, non-decreasing across the store
    pub created_at: DateTime<Utc>,
    /// Whether the server acknowledged this record
    pub synced: bool,
    /// Payload shape version
    #[serde(default = "default_format_version")]
    pub format_version: u32,
}

const fn default_format_version() -> u32 {
    RECORD_FORMAT_VERSION
}

impl MutationRecord {
    /// Build a fresh, unsynced record with a newly generated id.
    #[must_use]
    pub fn new(
        entity_type: EntityType,
        operation: MutationOp,
        payload: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity_type,
            operation,
            payload,
            created_at,
            synced: false,
            format_version: RECORD_FORMAT_VERSION,
        }
    }

    /// The entity's own identifier, read from `field` in the payload.
    ///
    /// Strings and integers are accepted; anything else has no key.
    #[must_use]
    pub fn correlation_key(&self, field: &str) -> Option<String> {
        correlation_key(&self.payload, field)
    }

    /// Serialized size of this record in bytes.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len())
    }
}

/// Read an entity key from `field` of a payload.
///
/// Non-empty strings and integers are keys; anything else is not.
#[must_use]
pub fn correlation_key(payload: &Value, field: &str) -> Option<String> {
    match payload.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// A record waiting for manual resolution after a rejected replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictFlag {
    /// Rejected record
    pub record_id: String,
    /// Reason reported by the remote
    pub reason: String,
    /// When the rejection was recorded
    pub flagged_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_type_validation() {
        assert!(EntityType::new("report").is_ok());
        assert!(EntityType::new("site-visit_2").is_ok());
        assert!(EntityType::new("").is_err());
        assert!(EntityType::new("Report").is_err());
        assert!(EntityType::new("a/b").is_err());
    }

    #[test]
    fn test_entity_type_deserialize_rejects_invalid() {
        let ok: EntityType = serde_json::from_str("\"finding\"").unwrap();
        assert_eq!(ok, EntityType::finding());
        assert!(serde_json::from_str::<EntityType>("\"NOPE\"").is_err());
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!("create".parse::<MutationOp>().unwrap(), MutationOp::Create);
        assert_eq!("UPDATE".parse::<MutationOp>().unwrap(), MutationOp::Update);
        assert_eq!("delete".parse::<MutationOp>().unwrap(), MutationOp::Delete);
        assert!("upsert".parse::<MutationOp>().is_err());
    }

    #[test]
    fn test_new_record_is_unsynced_with_unique_id() {
        let a = MutationRecord::new(
            EntityType::report(),
            MutationOp::Create,
            json!({"name": "R1"}),
            Utc::now(),
        );
        let b = MutationRecord::new(
            EntityType::report(),
            MutationOp::Create,
            json!({"name": "R1"}),
            Utc::now(),
        );

        assert!(!a.synced);
        assert_ne!(a.id, b.id);
        assert_eq!(a.format_version, RECORD_FORMAT_VERSION);
    }

    #[test]
    fn test_correlation_key() {
        let record = |payload| {
            MutationRecord::new(EntityType::finding(), MutationOp::Update, payload, Utc::now())
        };

        assert_eq!(
            record(json!({"id": "f-1"})).correlation_key("id"),
            Some("f-1".to_string())
        );
        assert_eq!(
            record(json!({"id": 42})).correlation_key("id"),
            Some("42".to_string())
        );
        assert_eq!(record(json!({"id": ""})).correlation_key("id"), None);
        assert_eq!(record(json!({"id": 1.5})).correlation_key("id"), None);
        assert_eq!(record(json!({"name": "x"})).correlation_key("id"), None);
        assert_eq!(
            record(json!({"uuid": "u"})).correlation_key("uuid"),
            Some("u".to_string())
        );
        assert_eq!(
            correlation_key(&json!({"id": 7}), "id"),
            record(json!({"id": 7})).correlation_key("id")
        );
    }

    #[test]
    fn test_serialized_len_matches_json() {
        let record = MutationRecord::new(
            EntityType::report(),
            MutationOp::Create,
            json!({"name": "R1"}),
            Utc::now(),
        );
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(record.serialized_len(), json.len());
    }
}
