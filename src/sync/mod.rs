//! Reconciliation of the mutation queue with the remote API.
//!
//! - [`RemoteApi`]: the seam to the server, with [`HttpRemote`] as transport
//! - [`SyncReconciler`]: replays one snapshot of unsynced records
//! - [`SyncScheduler`]: decides when the reconciler runs

#[cfg(test)]
pub(crate) mod fake;
mod http;
mod reconciler;
mod remote;
mod scheduler;

pub use http::{classify, HttpRemote, IDEMPOTENCY_HEADER};
pub use reconciler::{
    format_run_report, plan_chains, Chain, ReconcilerConfig, RecordStatus, ReplayResult,
    RunReport, SyncReconciler,
};
pub use remote::{replay, RemoteApi, RemoteOutcome};
pub use scheduler::{SchedulerConfig, SyncScheduler};
