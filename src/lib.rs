//! reportq - offline-first mutation queue
//!
//! Keeps create/update/delete mutations for reports and findings in a
//! durable local queue while the network is unavailable, and replays them
//! against the remote API once connectivity returns.
//!
//! - [`queue::MutationQueueStore`]: durable append-and-mark store
//! - [`connectivity::ConnectivityMonitor`]: the online/offline signal
//! - [`sync::SyncReconciler`] and [`sync::SyncScheduler`]: replay and its triggers

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod logging;
pub mod notice;
pub mod output;
pub mod queue;
pub mod storage;
pub mod sync;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use error::ReportqError;
