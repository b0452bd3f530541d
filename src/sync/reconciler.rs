//! Sync reconciler for replaying queued mutations.
//!
//! Drains one snapshot of unsynced records against the remote, chain by
//! chain, and marks each record synced only after the remote acknowledged it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::remote::{replay, RemoteApi, RemoteOutcome};
use crate::config::SyncConfig;
use crate::error::ReportqError;
use crate::notice::Notice;
use crate::queue::{EntityType, MutationOp, MutationQueueStore, MutationRecord};

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Payload field holding an entity's own identifier
    pub correlation_field: String,
    /// Chains replayed at the same time
    pub max_concurrent_chains: usize,
    /// Upper bound on a single remote call
    pub call_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for ReconcilerConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            correlation_field: config.correlation_field.clone(),
            max_concurrent_chains: config.max_concurrent_chains.max(1),
            call_timeout: config.timeout(),
        }
    }
}

/// What happened to one record during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    /// Acknowledged and marked synced.
    Synced {
        /// The remote had already applied this token
        duplicate: bool,
    },
    /// Rejected by the remote and flagged for manual resolution.
    Conflict {
        /// Reason reported by the remote
        reason: String,
    },
    /// The call failed and aborted the run.
    Transient {
        /// Cause of the failure
        reason: String,
    },
    /// Held back because its chain is waiting for manual resolution.
    Skipped {
        /// Why the record was held back
        reason: String,
    },
    /// Never sent, or sent without an answer, before the run stopped.
    Untried,
}

/// Result of replaying a single record.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayResult {
    /// Record ID
    pub record_id: String,
    /// Entity type
    pub entity_type: EntityType,
    /// Operation
    pub operation: MutationOp,
    /// Chain the record was replayed in
    pub chain: String,
    /// Outcome
    #[serde(flatten)]
    pub status: RecordStatus,
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Records in the run's snapshot
    pub snapshot: usize,
    /// Records marked synced
    pub synced: usize,
    /// Records flagged as conflicts
    pub conflicts: usize,
    /// Records whose call failed
    pub transient: usize,
    /// Records held back behind a conflict
    pub skipped: usize,
    /// Records not sent
    pub untried: usize,
    /// Why the run stopped early, if it did
    pub aborted: Option<String>,
    /// Whether the run was cancelled
    pub cancelled: bool,
    /// Individual results, in snapshot order per chain
    pub results: Vec<ReplayResult>,
}

impl RunReport {
    /// Add a result.
    pub fn add(&mut self, result: ReplayResult) {
        match result.status {
            RecordStatus::Synced { .. } => self.synced += 1,
            RecordStatus::Conflict { .. } => self.conflicts += 1,
            RecordStatus::Transient { .. } => self.transient += 1,
            RecordStatus::Skipped { .. } => self.skipped += 1,
            RecordStatus::Untried => self.untried += 1,
        }
        self.results.push(result);
    }

    /// Whether every record in the snapshot ended up synced.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.synced == self.snapshot
    }

    /// Get total records accounted for.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.synced + self.conflicts + self.transient + self.skipped + self.untried
    }
}

/// Insertion-ordered records of one logical entity.
#[derive(Debug, Clone)]
pub struct Chain {
    /// `entity_type:key`, or `entity_type#record_id` for keyless records
    pub label: String,
    /// Records in insertion order
    pub records: Vec<MutationRecord>,
}

/// Partition records into chains.
///
/// Chains appear in the order of their first record; records keep their
/// relative order inside a chain.
#[must_use]
pub fn plan_chains(records: Vec<MutationRecord>, correlation_field: &str) -> Vec<Chain> {
    let mut chains: Vec<Chain> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let label = record.correlation_key(correlation_field).map_or_else(
            || format!("{}#{}", record.entity_type, record.id),
            |key| format!("{}:{key}", record.entity_type),
        );

        if let Some(&slot) = index.get(&label) {
            chains[slot].records.push(record);
        } else {
            index.insert(label.clone(), chains.len());
            chains.push(Chain {
                label,
                records: vec![record],
            });
        }
    }

    chains
}

/// Shared stop state of a run.
#[derive(Default)]
struct RunHalt {
    aborted: Mutex<Option<String>>,
    cancelled: AtomicBool,
}

impl RunHalt {
    fn abort(&self, reason: String) {
        let mut aborted = self.aborted.lock();
        if aborted.is_none() {
            warn!(reason = %reason, "Aborting sync run");
            *aborted = Some(reason);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.aborted.lock().is_some()
    }
}

/// Replays the queue against the remote.
pub struct SyncReconciler {
    store: Arc<MutationQueueStore>,
    remote: Arc<dyn RemoteApi>,
    config: ReconcilerConfig,
    run_lock: tokio::sync::Mutex<()>,
}

impl SyncReconciler {
    /// Create a new reconciler.
    #[must_use]
    pub fn new(
        store: Arc<MutationQueueStore>,
        remote: Arc<dyn RemoteApi>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            remote,
            config,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Queue this reconciler drains.
    #[must_use]
    pub fn store(&self) -> &Arc<MutationQueueStore> {
        &self.store
    }

    /// Run one reconciliation pass over a snapshot of unsynced records.
    ///
    /// Runs never overlap; a second caller waits for the active run to end.
    /// Setting `cancel` to `true` stops the run and drops the in-flight
    /// call, whose record stays unsynced.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read.
    pub async fn run(&self, cancel: watch::Receiver<bool>) -> Result<RunReport, ReportqError> {
        let _running = self.run_lock.lock().await;

        let snapshot = self.store.list_unsynced()?;
        let flagged = self.store.flagged_ids()?;
        let snapshot_len = snapshot.len();
        let chains = plan_chains(snapshot, &self.config.correlation_field);

        info!(
            records = snapshot_len,
            chains = chains.len(),
            "Starting sync run"
        );

        let halt = RunHalt::default();
        let chain_results: Vec<Vec<ReplayResult>> = stream::iter(chains)
            .map(|chain| self.run_chain(chain, &flagged, &halt, cancel.clone()))
            .buffered(self.config.max_concurrent_chains.max(1))
            .collect()
            .await;

        let mut report = RunReport {
            snapshot: snapshot_len,
            ..RunReport::default()
        };
        for result in chain_results.into_iter().flatten() {
            report.add(result);
        }
        report.aborted = halt.aborted.lock().take();
        report.cancelled = halt.cancelled.load(Ordering::SeqCst);

        info!(
            synced = report.synced,
            conflicts = report.conflicts,
            untried = report.untried,
            cancelled = report.cancelled,
            "Sync run finished"
        );

        match self.store.pending_count() {
            Ok(count) => self.store.notices().publish(Notice::PendingCount { count }),
            Err(e) => warn!(error = %e, "Failed to count pending records"),
        }

        Ok(report)
    }

    async fn run_chain(
        &self,
        chain: Chain,
        flagged: &HashSet<String>,
        halt: &RunHalt,
        mut cancel: watch::Receiver<bool>,
    ) -> Vec<ReplayResult> {
        let label = chain.label;
        let mut results = Vec::with_capacity(chain.records.len());
        let mut held_back: Option<String> = None;

        for record in chain.records {
            if *cancel.borrow() {
                halt.cancel();
            }

            let status = if let Some(reason) = &held_back {
                RecordStatus::Skipped {
                    reason: reason.clone(),
                }
            } else if flagged.contains(&record.id) {
                debug!(record_id = %record.id, chain = %label, "Chain waiting for manual resolution");
                let reason = "Awaiting manual resolution".to_string();
                held_back = Some(format!("Earlier record {} awaits manual resolution", record.id));
                RecordStatus::Skipped { reason }
            } else if halt.is_stopped() {
                RecordStatus::Untried
            } else {
                let outcome = tokio::select! {
                    biased;
                    () = cancelled(&mut cancel) => None,
                    outcome = self.call(&record) => Some(outcome),
                };

                match outcome {
                    None => {
                        info!(record_id = %record.id, chain = %label, "Sync run cancelled mid-call");
                        halt.cancel();
                        RecordStatus::Untried
                    },
                    Some(outcome) => self.settle(&record, &label, outcome, halt, &mut held_back),
                }
            };

            results.push(ReplayResult {
                record_id: record.id,
                entity_type: record.entity_type,
                operation: record.operation,
                chain: label.clone(),
                status,
            });
        }

        results
    }

    async fn call(&self, record: &MutationRecord) -> RemoteOutcome {
        debug!(
            record_id = %record.id,
            entity_type = %record.entity_type,
            operation = %record.operation,
            "Replaying record"
        );
        match tokio::time::timeout(self.config.call_timeout, replay(self.remote.as_ref(), record))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => RemoteOutcome::Transient {
                reason: format!(
                    "Remote call timed out after {}s",
                    self.config.call_timeout.as_secs_f64()
                ),
            },
        }
    }

    /// Apply a remote answer to the store.
    fn settle(
        &self,
        record: &MutationRecord,
        chain: &str,
        outcome: RemoteOutcome,
        halt: &RunHalt,
        held_back: &mut Option<String>,
    ) -> RecordStatus {
        match outcome {
            RemoteOutcome::Applied | RemoteOutcome::AlreadyApplied => {
                let duplicate = outcome == RemoteOutcome::AlreadyApplied;
                match self.store.mark_synced(&record.id) {
                    Ok(_) => {
                        debug!(record_id = %record.id, duplicate, "Record acknowledged");
                        RecordStatus::Synced { duplicate }
                    },
                    Err(e) => {
                        // Acknowledged but not recorded; the replay is repeated next run
                        let reason = format!("Failed to record acknowledgment: {e}");
                        halt.abort(reason.clone());
                        RecordStatus::Transient { reason }
                    },
                }
            },
            RemoteOutcome::Conflict { reason } => {
                let err = ReportqError::SyncConflict {
                    record_id: record.id.clone(),
                    reason: reason.clone(),
                };
                warn!(
                    entity_type = %record.entity_type,
                    chain = %chain,
                    error = %err,
                    "Remote rejected replay"
                );
                if let Err(e) = self.store.flag_conflict(&record.id, &reason) {
                    warn!(record_id = %record.id, error = %e, "Failed to flag conflict");
                }
                self.store.notices().publish(Notice::SyncConflict {
                    record_id: record.id.clone(),
                    entity_type: record.entity_type.to_string(),
                    reason: reason.clone(),
                });
                *held_back = Some(format!("Earlier record {} was rejected", record.id));
                RecordStatus::Conflict { reason }
            },
            RemoteOutcome::Transient { reason } => {
                let err = ReportqError::TransientNetwork(format!(
                    "{} {}: {reason}",
                    record.operation, record.id
                ));
                halt.abort(err.to_string());
                RecordStatus::Transient { reason }
            },
        }
    }
}

/// Resolves once `cancel` reads `true`; never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Format a run report for display.
#[must_use]
pub fn format_run_report(report: &RunReport) -> String {
    let mut lines = Vec::new();

    lines.push(format!("Sync completed: {} records", report.snapshot));
    lines.push("─".repeat(40));

    if report.synced > 0 {
        lines.push(format!(
            "  {} {}",
            "✓".green(),
            format!("{} synced", report.synced).green()
        ));
    }

    if report.conflicts > 0 {
        lines.push(format!(
            "  {} {}",
            "✗".red(),
            format!("{} rejected (see `reportq conflicts`)", report.conflicts).red()
        ));
    }

    if report.transient > 0 {
        lines.push(format!(
            "  {} {}",
            "!".yellow(),
            format!("{} failed", report.transient).yellow()
        ));
    }

    let waiting = report.skipped + report.untried;
    if waiting > 0 {
        lines.push(format!(
            "  {} {}",
            "○".yellow(),
            format!("{waiting} still pending").yellow()
        ));
    }

    if report.cancelled {
        lines.push(format!("  {}", "Run cancelled".yellow()));
    } else if let Some(reason) = &report.aborted {
        lines.push(format!("  {} {reason}", "Run stopped:".yellow()));
    }

    // Show first few problems
    let problems: Vec<_> = report
        .results
        .iter()
        .filter_map(|r| match &r.status {
            RecordStatus::Conflict { reason } | RecordStatus::Transient { reason } => {
                Some((r, reason))
            },
            _ => None,
        })
        .take(3)
        .collect();

    if !problems.is_empty() {
        lines.push(String::new());
        lines.push("Errors:".to_string());
        for (result, reason) in problems {
            lines.push(format!(
                "  - {} {}: {reason}",
                result.operation, result.chain
            ));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::NoticeBoard;
    use crate::sync::fake::FakeRemote;
    use serde_json::json;
    use tokio::sync::Semaphore;

    fn store() -> Arc<MutationQueueStore> {
        Arc::new(MutationQueueStore::in_memory(NoticeBoard::new()).unwrap())
    }

    fn reconciler(
        store: &Arc<MutationQueueStore>,
        remote: &Arc<FakeRemote>,
        chains: usize,
    ) -> Arc<SyncReconciler> {
        let remote: Arc<dyn RemoteApi> = Arc::clone(remote) as Arc<dyn RemoteApi>;
        Arc::new(SyncReconciler::new(
            Arc::clone(store),
            remote,
            ReconcilerConfig {
                max_concurrent_chains: chains,
                ..ReconcilerConfig::default()
            },
        ))
    }

    fn never_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn report(id: &str) -> serde_json::Value {
        json!({"id": id, "title": format!("Report {id}")})
    }

    #[tokio::test]
    async fn test_created_report_syncs() {
        let store = store();
        let remote = Arc::new(FakeRemote::new());
        let r1 = store
            .enqueue(EntityType::report(), MutationOp::Create, report("r1"))
            .unwrap();

        let result = reconciler(&store, &remote, 4)
            .run(never_cancel())
            .await
            .unwrap();

        assert_eq!(result.synced, 1);
        assert!(result.is_clean());
        assert!(store.list_unsynced().unwrap().is_empty());
        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, r1);
        assert!(all[0].synced);
        assert_eq!(remote.calls()[0].token, r1);
    }

    #[tokio::test]
    async fn test_failed_update_blocks_later_delete() {
        let store = store();
        let remote = Arc::new(FakeRemote::new());
        remote.script(
            MutationOp::Update,
            "A",
            RemoteOutcome::Transient {
                reason: "503 Service Unavailable".to_string(),
            },
        );
        store
            .enqueue(EntityType::report(), MutationOp::Update, report("A"))
            .unwrap();
        store
            .enqueue(EntityType::report(), MutationOp::Delete, json!({"id": "A"}))
            .unwrap();

        let result = reconciler(&store, &remote, 1)
            .run(never_cancel())
            .await
            .unwrap();

        let calls = remote.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation, MutationOp::Update);
        assert_eq!(result.transient, 1);
        assert_eq!(result.untried, 1);
        assert!(result.aborted.is_some());
        assert_eq!(store.list_unsynced().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_stops_other_chains() {
        let store = store();
        let remote = Arc::new(FakeRemote::new());
        remote.script(
            MutationOp::Create,
            "A",
            RemoteOutcome::Transient {
                reason: "connection reset".to_string(),
            },
        );
        store
            .enqueue(EntityType::report(), MutationOp::Create, report("A"))
            .unwrap();
        store
            .enqueue(EntityType::report(), MutationOp::Create, report("B"))
            .unwrap();

        let result = reconciler(&store, &remote, 1)
            .run(never_cancel())
            .await
            .unwrap();

        assert_eq!(remote.calls().len(), 1);
        assert_eq!(result.untried, 1);
        assert_eq!(store.pending_count().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_records_unsynced() {
        let store = store();
        // No permits: every call hangs until the timeout fires
        let remote = Arc::new(FakeRemote::gated(Arc::new(Semaphore::new(0))));
        store
            .enqueue(EntityType::report(), MutationOp::Create, report("A"))
            .unwrap();
        store
            .enqueue(EntityType::report(), MutationOp::Update, report("A"))
            .unwrap();

        let reconciler = Arc::new(SyncReconciler::new(
            Arc::clone(&store),
            Arc::clone(&remote) as Arc<dyn RemoteApi>,
            ReconcilerConfig {
                call_timeout: Duration::from_secs(5),
                ..ReconcilerConfig::default()
            },
        ));

        let result = reconciler.run(never_cancel()).await.unwrap();

        assert_eq!(result.transient, 1);
        assert_eq!(result.untried, 1);
        assert!(result.aborted.unwrap().contains("timed out"));
        assert_eq!(remote.calls().len(), 1);
        assert_eq!(store.list_unsynced().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replaying_twice_applies_once() {
        let store = store();
        let remote = Arc::new(FakeRemote::new());
        let id = store
            .enqueue(EntityType::report(), MutationOp::Create, report("A"))
            .unwrap();
        let record = store.get(&id).unwrap().unwrap();

        // A previous run's call landed but the acknowledgment was lost
        let first = replay(remote.as_ref(), &record).await;
        assert_eq!(first, RemoteOutcome::Applied);
        let state_after_one = remote.state();

        let result = reconciler(&store, &remote, 4)
            .run(never_cancel())
            .await
            .unwrap();

        assert_eq!(
            result.results[0].status,
            RecordStatus::Synced { duplicate: true }
        );
        assert_eq!(remote.state(), state_after_one);
        assert!(store.get(&id).unwrap().unwrap().synced);
    }

    #[tokio::test]
    async fn test_conflict_halts_only_its_chain() {
        let store = store();
        let notices = store.notices().subscribe();
        let remote = Arc::new(FakeRemote::new());
        remote.script(
            MutationOp::Update,
            "A",
            RemoteOutcome::Conflict {
                reason: "412 Precondition Failed".to_string(),
            },
        );

        store
            .enqueue(EntityType::report(), MutationOp::Create, report("A"))
            .unwrap();
        let update = store
            .enqueue(EntityType::report(), MutationOp::Update, report("A"))
            .unwrap();
        store
            .enqueue(EntityType::report(), MutationOp::Delete, json!({"id": "A"}))
            .unwrap();
        store
            .enqueue(EntityType::report(), MutationOp::Create, report("B"))
            .unwrap();

        let result = reconciler(&store, &remote, 2)
            .run(never_cancel())
            .await
            .unwrap();

        assert_eq!(result.synced, 2);
        assert_eq!(result.conflicts, 1);
        assert_eq!(result.skipped, 1);
        assert!(result.aborted.is_none());

        let unsynced: Vec<_> = store
            .list_unsynced()
            .unwrap()
            .into_iter()
            .map(|r| r.operation)
            .collect();
        assert_eq!(unsynced, vec![MutationOp::Update, MutationOp::Delete]);
        assert!(store.flagged_ids().unwrap().contains(&update));
        assert!(!remote
            .calls()
            .iter()
            .any(|c| c.operation == MutationOp::Delete));

        let mut notices = notices;
        let mut saw_conflict = false;
        while let Ok(notice) = notices.try_recv() {
            if let Notice::SyncConflict { record_id, .. } = notice {
                assert_eq!(record_id, update);
                saw_conflict = true;
            }
        }
        assert!(saw_conflict);
    }

    #[tokio::test]
    async fn test_flagged_chain_is_skipped_until_cleared() {
        let store = store();
        let remote = Arc::new(FakeRemote::new());
        let first = store
            .enqueue(EntityType::finding(), MutationOp::Update, json!({"id": 7}))
            .unwrap();
        store
            .enqueue(EntityType::finding(), MutationOp::Delete, json!({"id": 7}))
            .unwrap();
        store.flag_conflict(&first, "409 Conflict").unwrap();

        let reconciler = reconciler(&store, &remote, 4);
        let result = reconciler.run(never_cancel()).await.unwrap();
        assert_eq!(result.skipped, 2);
        assert!(remote.calls().is_empty());

        store.clear_conflict(&first).unwrap();
        let result = reconciler.run(never_cancel()).await.unwrap();
        assert_eq!(result.synced, 2);
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_drops_in_flight_call() {
        let store = store();
        let gate = Arc::new(Semaphore::new(0));
        let remote = Arc::new(FakeRemote::gated(Arc::clone(&gate)));
        let started = remote.started();
        store
            .enqueue(EntityType::report(), MutationOp::Create, report("A"))
            .unwrap();
        store
            .enqueue(EntityType::report(), MutationOp::Update, report("A"))
            .unwrap();

        let reconciler = reconciler(&store, &remote, 4);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let run = tokio::spawn({
            let reconciler = Arc::clone(&reconciler);
            async move { reconciler.run(cancel_rx).await }
        });

        started.notified().await;
        cancel_tx.send(true).unwrap();
        let result = run.await.unwrap().unwrap();

        assert!(result.cancelled);
        assert_eq!(result.synced, 0);
        assert_eq!(result.untried, 2);
        assert_eq!(remote.calls().len(), 1);
        assert_eq!(store.pending_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_records_enqueued_mid_run_wait_for_next_run() {
        let store = store();
        let gate = Arc::new(Semaphore::new(0));
        let remote = Arc::new(FakeRemote::gated(Arc::clone(&gate)));
        let started = remote.started();
        store
            .enqueue(EntityType::report(), MutationOp::Create, report("A"))
            .unwrap();

        let reconciler = reconciler(&store, &remote, 4);
        let run = tokio::spawn({
            let reconciler = Arc::clone(&reconciler);
            async move { reconciler.run(never_cancel()).await }
        });

        started.notified().await;
        let late = store
            .enqueue(EntityType::report(), MutationOp::Create, report("B"))
            .unwrap();
        gate.add_permits(10);

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.snapshot, 1);
        assert_eq!(result.synced, 1);
        assert_eq!(store.list_unsynced().unwrap()[0].id, late);

        let result = reconciler.run(never_cancel()).await.unwrap();
        assert_eq!(result.synced, 1);
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_plan_chains_groups_by_entity_and_key() {
        let now = chrono::Utc::now();
        let records = vec![
            MutationRecord::new(EntityType::report(), MutationOp::Create, json!({"id": "1"}), now),
            MutationRecord::new(EntityType::finding(), MutationOp::Create, json!({"id": "1"}), now),
            MutationRecord::new(EntityType::report(), MutationOp::Update, json!({"id": "1"}), now),
            MutationRecord::new(EntityType::report(), MutationOp::Create, json!({"title": "x"}), now),
            MutationRecord::new(EntityType::report(), MutationOp::Create, json!({"title": "y"}), now),
        ];

        let chains = plan_chains(records, "id");

        assert_eq!(chains.len(), 4);
        assert_eq!(chains[0].label, "report:1");
        assert_eq!(chains[0].records.len(), 2);
        assert_eq!(chains[0].records[1].operation, MutationOp::Update);
        assert_eq!(chains[1].label, "finding:1");
        assert!(chains[2].label.starts_with("report#"));
        assert_ne!(chains[2].label, chains[3].label);
    }

    #[test]
    fn test_run_report_counts() {
        let mut report = RunReport {
            snapshot: 2,
            ..RunReport::default()
        };
        let result = |status| ReplayResult {
            record_id: "x".to_string(),
            entity_type: EntityType::report(),
            operation: MutationOp::Create,
            chain: "report:1".to_string(),
            status,
        };

        report.add(result(RecordStatus::Synced { duplicate: false }));
        report.add(result(RecordStatus::Untried));

        assert_eq!(report.synced, 1);
        assert_eq!(report.untried, 1);
        assert_eq!(report.total(), 2);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_format_run_report() {
        colored::control::set_override(false);
        let mut report = RunReport {
            snapshot: 1,
            ..RunReport::default()
        };
        report.add(ReplayResult {
            record_id: "x".to_string(),
            entity_type: EntityType::report(),
            operation: MutationOp::Update,
            chain: "report:1".to_string(),
            status: RecordStatus::Conflict {
                reason: "409 Conflict".to_string(),
            },
        });

        let output = format_run_report(&report);
        assert!(output.contains("Sync completed: 1 records"));
        assert!(output.contains("1 rejected"));
        assert!(output.contains("409 Conflict"));
    }
}
