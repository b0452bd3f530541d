//! Remote API seam used by the reconciler.
//!
//! The transport lives behind [`RemoteApi`]; the reconciler only cares
//! whether a replay landed, collided with server state, or never got there.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::queue::{EntityType, MutationOp, MutationRecord};

/// Result of one replayed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemoteOutcome {
    /// The server applied the mutation.
    Applied,
    /// The server had already applied this idempotency token.
    AlreadyApplied,
    /// The server refused the mutation because its state diverged.
    Conflict {
        /// Reason given by the server
        reason: String,
    },
    /// The call failed for reasons unrelated to the data.
    Transient {
        /// Cause of the failure
        reason: String,
    },
}

impl RemoteOutcome {
    /// Whether the server positively acknowledged the mutation.
    #[must_use]
    pub const fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Applied | Self::AlreadyApplied)
    }
}

/// Remote system the queue is reconciled against.
///
/// Every method receives the record id as an idempotency token; replaying
/// the same token must not apply the mutation twice, deletes included.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create an entity.
    async fn create(
        &self,
        entity_type: &EntityType,
        payload: &Value,
        idempotency_key: &str,
    ) -> RemoteOutcome;

    /// Update an entity.
    async fn update(
        &self,
        entity_type: &EntityType,
        payload: &Value,
        idempotency_key: &str,
    ) -> RemoteOutcome;

    /// Delete an entity.
    async fn delete(
        &self,
        entity_type: &EntityType,
        payload: &Value,
        idempotency_key: &str,
    ) -> RemoteOutcome;
}

/// Send one record to the remote call matching its operation.
pub async fn replay(remote: &dyn RemoteApi, record: &MutationRecord) -> RemoteOutcome {
    match record.operation {
        MutationOp::Create => {
            remote
                .create(&record.entity_type, &record.payload, &record.id)
                .await
        },
        MutationOp::Update => {
            remote
                .update(&record.entity_type, &record.payload, &record.id)
                .await
        },
        MutationOp::Delete => {
            remote
                .delete(&record.entity_type, &record.payload, &record.id)
                .await
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockall::predicate::eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_replay_dispatches_by_operation() {
        let record = MutationRecord::new(
            EntityType::finding(),
            MutationOp::Delete,
            json!({"id": "f-1"}),
            Utc::now(),
        );

        let mut remote = MockRemoteApi::new();
        remote.expect_create().never();
        remote.expect_update().never();
        remote
            .expect_delete()
            .with(
                eq(EntityType::finding()),
                eq(json!({"id": "f-1"})),
                eq(record.id.clone()),
            )
            .times(1)
            .returning(|_, _, _| RemoteOutcome::AlreadyApplied);

        let outcome = replay(&remote, &record).await;
        assert!(outcome.is_acknowledged());
    }

    #[test]
    fn test_acknowledged() {
        assert!(RemoteOutcome::Applied.is_acknowledged());
        assert!(RemoteOutcome::AlreadyApplied.is_acknowledged());
        assert!(!RemoteOutcome::Conflict {
            reason: "x".to_string()
        }
        .is_acknowledged());
        assert!(!RemoteOutcome::Transient {
            reason: "x".to_string()
        }
        .is_acknowledged());
    }
}
