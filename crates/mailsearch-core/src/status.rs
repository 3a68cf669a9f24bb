//! Indexing progress reporting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Progress of an indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexProgress {
    /// A run has been requested but no work is done yet.
    NotStarted,
    /// Percentage of the requested time range covered.
    InProgress(u8),
    /// No run is active.
    Done,
}

/// Why an indexing run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexingErrorReason {
    /// The entity source was unreachable; retrying once online may help.
    ConnectionLost,
    /// Any other failure.
    Unknown,
}

/// Snapshot of the mail index state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchIndexStateInfo {
    /// True while the index is being set up.
    pub initializing: bool,
    /// Whether mail indexing is enabled.
    pub mail_index_enabled: bool,
    /// Progress of the current run.
    pub progress: IndexProgress,
    /// Oldest point in time all mailboxes are indexed to.
    pub current_mail_index_timestamp: i64,
    /// Oldest point in time the current run aims for.
    pub aimed_mail_index_timestamp: i64,
    /// Mails loaded by the current run.
    pub indexed_mail_count: usize,
    /// Set when a run failed; the range down to here still needs indexing.
    pub failed_indexing_up_to: Option<i64>,
    /// Reason of the failure.
    pub error: Option<IndexingErrorReason>,
}

/// Receives index state updates.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Called whenever the index state changes.
    async fn update_index_state(&self, state: SearchIndexStateInfo);
}

/// Status sink that writes updates to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingStatusSink;

#[async_trait]
impl StatusSink for LoggingStatusSink {
    async fn update_index_state(&self, state: SearchIndexStateInfo) {
        if let Some(error) = state.error {
            warn!(
                ?error,
                failed_indexing_up_to = state.failed_indexing_up_to,
                current = state.current_mail_index_timestamp,
                "Mail indexing failed"
            );
        } else {
            info!(
                progress = ?state.progress,
                current = state.current_mail_index_timestamp,
                aimed = state.aimed_mail_index_timestamp,
                indexed_mail_count = state.indexed_mail_count,
                "Mail index state"
            );
        }
    }
}

/// Turns units of work into percentage steps.
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    total_work: u64,
    work_completed: u64,
    percentage: u8,
}

impl ProgressMonitor {
    /// Creates a monitor for `total_work` units.
    #[must_use]
    pub const fn new(total_work: u64) -> Self {
        Self {
            total_work,
            work_completed: 0,
            percentage: 0,
        }
    }

    /// Records finished work. Returns the new percentage if it changed.
    pub fn work_done(&mut self, amount: u64) -> Option<u8> {
        self.work_completed = self.work_completed.saturating_add(amount);
        let percentage = if self.total_work == 0 {
            100
        } else {
            let done = self.work_completed.min(self.total_work);
            u8::try_from(done * 100 / self.total_work).unwrap_or(100)
        };
        if percentage == self.percentage {
            return None;
        }
        self.percentage = percentage;
        Some(percentage)
    }

    /// Current percentage.
    #[must_use]
    pub const fn percentage(&self) -> u8 {
        self.percentage
    }
}
