//! User-facing notices raised by the queue and the reconciler.
//!
//! The UI subscribes here to render toasts, banners, and the pending-sync
//! counter. Publishing with nobody listening is fine.

use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the notice channel; slow subscribers lose the oldest notices.
const NOTICE_CAPACITY: usize = 64;

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Queued changes may not survive a restart.
    StorageUnavailable {
        /// Underlying cause
        message: String,
    },
    /// A replay was rejected and needs manual resolution.
    SyncConflict {
        /// Rejected record
        record_id: String,
        /// Entity type of the rejected record
        entity_type: String,
        /// Reason reported by the remote
        reason: String,
    },
    /// Number of records still waiting for the server.
    PendingCount {
        /// Unsynced record count
        count: usize,
    },
}

impl Notice {
    /// Short text suitable for a banner.
    #[must_use]
    pub fn headline(&self) -> String {
        match self {
            Self::StorageUnavailable { .. } => {
                "Changes may not be saved offline".to_string()
            },
            Self::SyncConflict { entity_type, .. } => {
                format!("A {entity_type} change was rejected by the server")
            },
            Self::PendingCount { count } => match count {
                0 => "All changes synced".to_string(),
                1 => "1 change waiting to sync".to_string(),
                n => format!("{n} changes waiting to sync"),
            },
        }
    }
}

/// Fan-out channel for [`Notice`]s.
#[derive(Debug, Clone)]
pub struct NoticeBoard {
    tx: broadcast::Sender<Notice>,
}

impl NoticeBoard {
    /// Create an empty board.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { tx }
    }

    /// Publish a notice to every current subscriber.
    pub fn publish(&self, notice: Notice) {
        // No receivers is not an error
        let _ = self.tx.send(notice);
    }

    /// Receive notices published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let board = NoticeBoard::new();
        board.publish(Notice::PendingCount { count: 3 });
    }

    #[test]
    fn test_subscriber_receives_notice() {
        let board = NoticeBoard::new();
        let mut rx = board.subscribe();

        board.publish(Notice::StorageUnavailable {
            message: "database or disk is full".to_string(),
        });

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.headline(), "Changes may not be saved offline");
    }

    #[test]
    fn test_pending_headline() {
        assert_eq!(
            Notice::PendingCount { count: 0 }.headline(),
            "All changes synced"
        );
        assert_eq!(
            Notice::PendingCount { count: 1 }.headline(),
            "1 change waiting to sync"
        );
        assert_eq!(
            Notice::PendingCount { count: 5 }.headline(),
            "5 changes waiting to sync"
        );
    }

    #[test]
    fn test_notice_json_shape() {
        let json = serde_json::to_value(Notice::SyncConflict {
            record_id: "r1".to_string(),
            entity_type: "finding".to_string(),
            reason: "deleted".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "sync_conflict");
        assert_eq!(json["record_id"], "r1");
    }
}
