//! Durable queue of offline mutations.
//!
//! UI actions append create/update/delete records here whenever a network
//! write cannot be confirmed. Records stay until the reconciler marks them
//! synced and a retention sweep purges them, or until they are removed by
//! hand.

mod record;
mod store;

pub use record::{
    correlation_key, ConflictFlag, EntityType, MutationOp, MutationRecord, RECORD_FORMAT_VERSION,
};
pub use store::{MutationQueueStore, QueueStats};
