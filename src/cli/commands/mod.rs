//! Command implementations for reportq.
//!
//! Every command returns the text to print on stdout; warnings and logs go
//! to stderr.

mod queue;
mod sync;

pub use queue::{conflicts, enqueue, list, purge, remove, resolve, show, status};
pub use sync::{daemon, sync};

use std::sync::Arc;

use colored::Colorize;
use tokio::sync::broadcast;

use crate::cli::args::OutputFormat;
use crate::config::{Config, Paths};
use crate::error::ReportqError;
use crate::notice::{Notice, NoticeBoard};
use crate::queue::MutationQueueStore;

/// Everything a command needs from the environment.
#[derive(Debug, Clone)]
pub struct Context {
    /// Resolved data paths
    pub paths: Paths,
    /// Loaded configuration
    pub config: Config,
    /// Output format for this invocation
    pub format: OutputFormat,
}

impl Context {
    /// Open the queue described by the configuration.
    ///
    /// Storage warnings raised while opening are printed to stderr.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created or not even
    /// an in-memory queue can be built.
    pub fn open_store(&self) -> Result<Arc<MutationQueueStore>, ReportqError> {
        self.paths.ensure_dirs()?;

        let board = NoticeBoard::new();
        let mut notices = board.subscribe();
        let store = MutationQueueStore::open(&self.config.queue.database_path(&self.paths), board)?;
        if let Some(max_bytes) = self.config.queue.max_size_bytes {
            store.limit_size(max_bytes)?;
        }

        print_storage_warnings(&mut notices);
        Ok(Arc::new(store))
    }
}

/// Print queued storage warnings to stderr.
fn print_storage_warnings(notices: &mut broadcast::Receiver<Notice>) {
    while let Ok(notice) = notices.try_recv() {
        if matches!(notice, Notice::StorageUnavailable { .. }) {
            print_notice(&notice);
        }
    }
}

/// Print a notice on stderr the way a UI banner would show it.
pub(crate) fn print_notice(notice: &Notice) {
    match notice {
        Notice::StorageUnavailable { message } => eprintln!(
            "{}: {} ({message})",
            "warning".yellow().bold(),
            notice.headline()
        ),
        Notice::SyncConflict {
            record_id, reason, ..
        } => eprintln!(
            "{}: {} [{record_id}] {reason}",
            "conflict".red().bold(),
            notice.headline()
        ),
        Notice::PendingCount { .. } => eprintln!("{}", notice.headline().dimmed()),
    }
}
