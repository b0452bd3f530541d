//! Sync command implementation.
//!
//! `sync` runs the reconciler once; `daemon` keeps a scheduler alive and
//! feeds it connectivity events read from stdin.

use std::sync::Arc;

use colored::Colorize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use super::{print_notice, Context};
use crate::cli::args::OutputFormat;
use crate::connectivity::ConnectivityMonitor;
use crate::error::ReportqError;
use crate::notice::Notice;
use crate::queue::MutationQueueStore;
use crate::output::{format_report, format_stats, to_json};
use crate::sync::{
    plan_chains, Chain, HttpRemote, ReconcilerConfig, SchedulerConfig, SyncReconciler,
    SyncScheduler,
};

/// Replay pending mutations once.
///
/// Ctrl-C cancels the run; records without an acknowledgment stay queued.
///
/// # Errors
///
/// Returns an error if the queue cannot be read or no remote is configured.
pub async fn sync(ctx: &Context, dry_run: bool) -> Result<String, ReportqError> {
    let store = ctx.open_store()?;

    if dry_run {
        let chains = plan_chains(store.list_unsynced()?, &ctx.config.sync.correlation_field);
        return format_plan(&chains, ctx.format);
    }

    let remote = Arc::new(HttpRemote::from_config(&ctx.config.sync)?);
    let reconciler = SyncReconciler::new(
        Arc::clone(&store),
        remote,
        ReconcilerConfig::from(&ctx.config.sync),
    );

    let mut notices = store.notices().subscribe();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let run = reconciler.run(cancel_rx);
    tokio::pin!(run);

    let report = loop {
        tokio::select! {
            report = &mut run => break report?,
            _ = tokio::signal::ctrl_c(), if !*cancel_tx.borrow() => {
                info!("Interrupted, cancelling sync run");
                let _ = cancel_tx.send(true);
            },
        }
    };

    while let Ok(notice) = notices.try_recv() {
        if matches!(notice, Notice::SyncConflict { .. }) {
            print_notice(&notice);
        }
    }

    if let Some(retention) = ctx.config.queue.retention() {
        store.purge_synced_older_than(retention)?;
    }

    format_report(&report, ctx.format)
}

/// Format the chains a run would replay.
fn format_plan(chains: &[Chain], format: OutputFormat) -> Result<String, ReportqError> {
    match format {
        OutputFormat::Json => {
            let items: Vec<_> = chains
                .iter()
                .map(|chain| {
                    json!({
                        "chain": chain.label,
                        "records": chain
                            .records
                            .iter()
                            .map(|r| json!({"id": r.id, "operation": r.operation}))
                            .collect::<Vec<_>>(),
                    })
                })
                .collect();
            to_json(&json!({ "dry_run": true, "chains": items }))
        },
        OutputFormat::Pretty => {
            let total: usize = chains.iter().map(|c| c.records.len()).sum();
            let mut lines = vec![
                format!(
                    "{} {total} records in {} chains would be replayed",
                    "Dry run:".bold(),
                    chains.len()
                ),
                "─".repeat(40),
            ];
            for chain in chains {
                let ops: Vec<&str> = chain.records.iter().map(|r| r.operation.as_str()).collect();
                lines.push(format!("  {}  {}", chain.label.cyan(), ops.join(" → ")));
            }
            Ok(lines.join("\n"))
        },
    }
}

/// Run the scheduler until stdin closes, `quit` is read, or Ctrl-C.
///
/// # Errors
///
/// Returns an error if the queue cannot be opened, no remote is configured,
/// or stdin fails.
pub async fn daemon(ctx: &Context, start_offline: bool) -> Result<String, ReportqError> {
    let store = ctx.open_store()?;
    let remote = Arc::new(HttpRemote::from_config(&ctx.config.sync)?);
    let reconciler = Arc::new(SyncReconciler::new(
        Arc::clone(&store),
        remote,
        ReconcilerConfig::from(&ctx.config.sync),
    ));

    let monitor = ConnectivityMonitor::new(!start_offline);
    let mut notices = store.notices().subscribe();
    let scheduler = SyncScheduler::spawn(
        reconciler,
        monitor.clone(),
        SchedulerConfig {
            interval: ctx.config.sync.interval(),
            retention: ctx.config.queue.retention(),
        },
    );
    let mut reports = scheduler.reports();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!(connectivity = %monitor.connectivity(), "Daemon started");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {},
                    "online" => {
                        monitor.set_reachable(true);
                    },
                    "offline" => {
                        monitor.set_reachable(false);
                    },
                    "sync" => scheduler.sync_now(),
                    "status" => {
                        if let Some(text) = status_text(&store, ctx.format) {
                            println!("{text}");
                        }
                    },
                    "quit" | "exit" => break,
                    other => warn!(command = %other, "Unknown daemon command"),
                }
            },
            notice = notices.recv() => match notice {
                Ok(notice) => print_notice(&notice),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Dropped notices");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = reports.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = reports.borrow_and_update().clone();
                if let Some(report) = latest {
                    match format_report(&report, ctx.format) {
                        Ok(text) => println!("{text}"),
                        Err(e) => warn!(error = %e, "Failed to render sync report"),
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    scheduler.shutdown().await;
    info!("Daemon stopped");
    Ok(String::new())
}

/// Queue status for the daemon; a failed read is logged, not fatal.
fn status_text(store: &MutationQueueStore, format: OutputFormat) -> Option<String> {
    match store.stats().and_then(|stats| format_stats(&stats, format)) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, "Failed to read queue status");
            None
        },
    }
}
