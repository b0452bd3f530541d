//! Background driver for the reconciler.
//!
//! Turns connectivity transitions, a periodic timer, and manual requests
//! into reconciliation runs. Only one run is active at a time; any number
//! of triggers arriving during a run collapse into a single follow-up run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::reconciler::{RunReport, SyncReconciler};
use crate::connectivity::{Connectivity, ConnectivityMonitor, Subscription};

/// Scheduler settings.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Periodic trigger while online; `None` disables the timer
    pub interval: Option<Duration>,
    /// Synced records older than this are purged after each run
    pub retention: Option<chrono::Duration>,
}

/// Handle on a running scheduler loop.
pub struct SyncScheduler {
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    reports: watch::Receiver<Option<Arc<RunReport>>>,
    completed: Arc<AtomicU64>,
    subscription: Subscription,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Start the scheduler loop on the current tokio runtime.
    ///
    /// If the monitor reports online at start, a first run is triggered
    /// immediately so work left from a previous session drains.
    #[must_use]
    pub fn spawn(
        reconciler: Arc<SyncReconciler>,
        monitor: ConnectivityMonitor,
        config: SchedulerConfig,
    ) -> Self {
        let trigger = Arc::new(Notify::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (reports_tx, reports) = watch::channel(None);
        let completed = Arc::new(AtomicU64::new(0));

        let subscription = {
            let trigger = Arc::clone(&trigger);
            monitor.subscribe(move |state| {
                if state == Connectivity::Online {
                    trigger.notify_one();
                }
            })
        };

        if monitor.is_online() {
            trigger.notify_one();
        }

        let worker = Worker {
            reconciler,
            monitor,
            config,
            trigger: Arc::clone(&trigger),
            shutdown: shutdown_rx,
            reports: reports_tx,
            completed: Arc::clone(&completed),
        };
        let handle = tokio::spawn(worker.run());

        Self {
            trigger,
            shutdown,
            reports,
            completed,
            subscription,
            handle,
        }
    }

    /// Request a run. Coalesces with any other pending request.
    pub fn sync_now(&self) {
        self.trigger.notify_one();
    }

    /// Receiver for the report of the most recent run.
    #[must_use]
    pub fn reports(&self) -> watch::Receiver<Option<Arc<RunReport>>> {
        self.reports.clone()
    }

    /// Number of runs finished so far.
    #[must_use]
    pub fn completed_runs(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Stop the loop, cancelling the active run, and wait for it to exit.
    pub async fn shutdown(self) {
        self.subscription.unsubscribe();
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Sync scheduler task failed");
        }
    }
}

struct Worker {
    reconciler: Arc<SyncReconciler>,
    monitor: ConnectivityMonitor,
    config: SchedulerConfig,
    trigger: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
    reports: watch::Sender<Option<Arc<RunReport>>>,
    completed: Arc<AtomicU64>,
}

impl Worker {
    async fn run(mut self) {
        let mut ticker = self.config.interval.map(|period| {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        info!(interval = ?self.config.interval, "Sync scheduler started");

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                },
                () = self.trigger.notified() => {
                    debug!("Sync requested");
                },
                _ = tick(ticker.as_mut()) => {
                    debug!("Periodic sync tick");
                },
            }

            if !self.monitor.is_online() {
                debug!("Offline, skipping sync run");
                continue;
            }

            if !self.run_once().await {
                break;
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Drive one run to completion. Returns `false` if shutdown was requested.
    async fn run_once(&mut self) -> bool {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut connectivity = self.monitor.watch();
        if connectivity.borrow_and_update().is_offline() {
            debug!("Went offline before the run started");
            return true;
        }
        let mut keep_going = true;

        let run = self.reconciler.run(cancel_rx);
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                changed = connectivity.changed(), if !*cancel_tx.borrow() => {
                    if changed.is_err() || connectivity.borrow_and_update().is_offline() {
                        info!("Connectivity lost, cancelling sync run");
                        let _ = cancel_tx.send(true);
                    }
                },
                changed = self.shutdown.changed(), if keep_going => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        keep_going = false;
                        let _ = cancel_tx.send(true);
                    }
                },
            }
        };

        match result {
            Ok(report) => {
                self.sweep();
                self.completed.fetch_add(1, Ordering::SeqCst);
                self.reports.send_replace(Some(Arc::new(report)));
            },
            Err(e) => {
                error!(error = %e, "Sync run failed");
                self.completed.fetch_add(1, Ordering::SeqCst);
            },
        }

        keep_going
    }

    fn sweep(&self) {
        let Some(retention) = self.config.retention else {
            return;
        };
        if let Err(e) = self.reconciler.store().purge_synced_older_than(retention) {
            warn!(error = %e, "Retention sweep failed");
        }
    }
}

/// Next tick of an optional timer; never resolves when the timer is off.
async fn tick(ticker: Option<&mut tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        },
        None => std::future::pending::<()>().await,
    }
}
