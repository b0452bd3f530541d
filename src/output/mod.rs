//! Output formatting for reportq.
//!
//! This module provides formatters for displaying queue data in various formats.

mod json;
mod pretty;

use std::collections::HashSet;

use crate::cli::args::OutputFormat;
use crate::error::ReportqError;
use crate::queue::{ConflictFlag, MutationRecord, QueueStats};
use crate::sync::{format_run_report, RunReport};

pub use json::*;
pub use pretty::*;

/// Format records based on output format
///
/// # Errors
///
/// Returns `ReportqError::Parse` if JSON serialization fails.
pub fn format_records(
    records: &[MutationRecord],
    flagged: &HashSet<String>,
    title: &str,
    format: OutputFormat,
) -> Result<String, ReportqError> {
    match format {
        OutputFormat::Pretty => Ok(format_records_pretty(records, flagged, title)),
        OutputFormat::Json => format_records_json(records, flagged, title),
    }
}

/// Format a single record based on output format
///
/// # Errors
///
/// Returns `ReportqError::Parse` if JSON serialization fails.
pub fn format_record(
    record: &MutationRecord,
    conflict: Option<&ConflictFlag>,
    format: OutputFormat,
) -> Result<String, ReportqError> {
    match format {
        OutputFormat::Pretty => Ok(format_record_pretty(record, conflict)),
        OutputFormat::Json => format_record_json(record, conflict),
    }
}

/// Format queue statistics based on output format
///
/// # Errors
///
/// Returns `ReportqError::Parse` if JSON serialization fails.
pub fn format_stats(stats: &QueueStats, format: OutputFormat) -> Result<String, ReportqError> {
    match format {
        OutputFormat::Pretty => Ok(format_stats_pretty(stats)),
        OutputFormat::Json => to_json(stats),
    }
}

/// Format conflicts based on output format
///
/// # Errors
///
/// Returns `ReportqError::Parse` if JSON serialization fails.
pub fn format_conflicts(
    conflicts: &[(ConflictFlag, Option<MutationRecord>)],
    format: OutputFormat,
) -> Result<String, ReportqError> {
    match format {
        OutputFormat::Pretty => Ok(format_conflicts_pretty(conflicts)),
        OutputFormat::Json => format_conflicts_json(conflicts),
    }
}

/// Format a sync run report based on output format
///
/// # Errors
///
/// Returns `ReportqError::Parse` if JSON serialization fails.
pub fn format_report(report: &RunReport, format: OutputFormat) -> Result<String, ReportqError> {
    match format {
        OutputFormat::Pretty => Ok(format_run_report(report)),
        OutputFormat::Json => to_json(report),
    }
}
