//! Indexer configuration.

use serde::{Deserialize, Serialize};

use crate::date::DAY_IN_MILLIS;
use crate::{Error, Result};

/// Tunables of the mail indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// How many days back the first backfill after enabling goes.
    pub initial_mail_index_interval_days: i64,
    /// Page size when loading mail lists.
    pub mail_indexer_chunk: usize,
    /// Chunk size when loading mail details and attachments.
    pub entity_indexer_chunk: usize,
    /// Width of one backfill time window.
    pub mail_index_batch_interval_ms: i64,
    /// Staged instances above which a backfill changeset is flushed early.
    pub max_staged_instances: usize,
    /// Mailboxes processed concurrently per time window.
    pub mailbox_concurrency: usize,
    /// Lists processed concurrently per mailbox.
    pub list_concurrency: usize,
    /// Detail and attachment chunks loaded concurrently.
    pub entity_chunk_concurrency: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            initial_mail_index_interval_days: 28,
            mail_indexer_chunk: 100,
            entity_indexer_chunk: 20,
            mail_index_batch_interval_ms: DAY_IN_MILLIS,
            max_staged_instances: 500,
            mailbox_concurrency: 5,
            list_concurrency: 2,
            entity_chunk_concurrency: 2,
        }
    }
}

impl IndexerConfig {
    /// Checks values the indexer cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a non-positive batch interval or
    /// initial interval.
    pub fn validate(&self) -> Result<()> {
        if self.mail_index_batch_interval_ms <= 0 {
            return Err(Error::InvalidConfig(format!(
                "mail_index_batch_interval_ms must be positive, got {}",
                self.mail_index_batch_interval_ms
            )));
        }
        if self.initial_mail_index_interval_days < 0 {
            return Err(Error::InvalidConfig(format!(
                "initial_mail_index_interval_days must not be negative, got {}",
                self.initial_mail_index_interval_days
            )));
        }
        Ok(())
    }

    /// Width of one backfill time window, falling back to one day for
    /// non-positive values.
    #[must_use]
    pub fn batch_interval_ms(&self) -> i64 {
        if self.mail_index_batch_interval_ms > 0 {
            self.mail_index_batch_interval_ms
        } else {
            DAY_IN_MILLIS
        }
    }
}
