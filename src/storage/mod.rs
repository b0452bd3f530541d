//! Storage layer for reportq.
//!
//! This module provides SQLite-based persistence for the mutation queue.

mod database;
mod migrations;

pub use database::{Database, OpenOutcome};
pub use migrations::CURRENT_VERSION;
