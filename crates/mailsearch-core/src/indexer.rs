//! Mail indexer.
//!
//! Owns the indexing state of one user: whether mail indexing is enabled, how
//! far back all mailboxes are indexed, and which lists are excluded. Backfill
//! walks every mailbox backward in time in fixed windows and commits the
//! results in batches; live entity events are reconciled into the same kind
//! of changeset.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::future::try_join_all;
use mail_parser::decoders::html::html_to_text;
use mailsearch_index::model::metadata;
use mailsearch_index::{
    AttributeHandler, FULL_INDEXED_TIMESTAMP, GroupData, GroupTimestamp, GroupType, IndexUpdate,
    IndexerCore, MoveInstance, NOTHING_INDEXED_TIMESTAMP, ObjectStore, SearchIndexEntry,
};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::IndexerConfig;
use crate::date::DateProvider;
use crate::entity::{EntityClient, EntityRestClient, OwnerKeyProvider, ReverseRange, TypeRef};
use crate::loader::{IndexLoader, MailWithDetails, try_join_bounded};
use crate::model::{
    EntityEventBatch, EntityUpdate, File, GroupId, ListId, Mail, MailAddress, MailBox,
    MailDetails, MailDetailsBlob, MailDetailsDraft, MailFolder, MailFolderType, MailboxGroupRoot,
    OperationType, User, filter_mail_memberships,
};
use crate::status::{
    IndexProgress, IndexingErrorReason, ProgressMonitor, SearchIndexStateInfo, StatusSink,
};
use crate::{Error, Result};

/// Attributes of a mail that are indexed.
pub mod attributes {
    use mailsearch_index::AttributeDescriptor;

    /// Subject line.
    pub const SUBJECT: AttributeDescriptor = AttributeDescriptor {
        id: 105,
        name: "subject",
    };
    /// Sender as `name <address>`.
    pub const SENDER: AttributeDescriptor = AttributeDescriptor {
        id: 111,
        name: "sender",
    };
    /// To recipients. The id predates the details split and is kept so
    /// entries written by older clients still match.
    pub const TO_RECIPIENTS: AttributeDescriptor = AttributeDescriptor {
        id: 112,
        name: "toRecipients",
    };
    /// Cc recipients.
    pub const CC_RECIPIENTS: AttributeDescriptor = AttributeDescriptor {
        id: 113,
        name: "ccRecipients",
    };
    /// Bcc recipients.
    pub const BCC_RECIPIENTS: AttributeDescriptor = AttributeDescriptor {
        id: 114,
        name: "bccRecipients",
    };
    /// Attachment file names.
    pub const ATTACHMENTS: AttributeDescriptor = AttributeDescriptor {
        id: 115,
        name: "attachments",
    };
    /// Body text with HTML stripped.
    pub const BODY: AttributeDescriptor = AttributeDescriptor {
        id: 116,
        name: "body",
    };
}

/// Lifecycle state of the mail indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerState {
    /// Mail indexing is off.
    Disabled,
    /// Enabled, no backfill running.
    Idle,
    /// A backfill is running.
    Indexing,
    /// A backfill is running and has been asked to stop.
    Cancelling,
}

/// Collaborators of the mail indexer.
pub struct IndexerContext {
    /// Index core the indexer stages and commits through.
    pub core: Arc<IndexerCore>,
    /// Uncached entity source.
    pub rest_client: Arc<dyn EntityRestClient>,
    /// Entity source backed by the shared cache.
    pub cached_client: Arc<dyn EntityRestClient>,
    /// Clock.
    pub date_provider: Arc<dyn DateProvider>,
    /// Receiver of index state updates.
    pub status_sink: Arc<dyn StatusSink>,
}

/// Index entries of a newly created mail.
#[derive(Debug, Clone)]
pub struct NewMailEntries {
    /// The loaded mail.
    pub mail: Mail,
    /// Token → entries of the mail.
    pub key_to_entries: HashMap<String, Vec<SearchIndexEntry>>,
}

/// Name of the index database of a user.
#[must_use]
pub fn index_database_name(user_id: &str) -> String {
    STANDARD.encode(Sha256::digest(user_id.as_bytes()))
}

/// Oldest point in time all mail groups are indexed to.
///
/// Groups that have not indexed anything yet are ignored unless they come
/// first. The result is fully indexed only if every group is.
#[must_use]
pub fn get_current_index_timestamp(group_index_timestamps: &[i64]) -> i64 {
    let mut current = NOTHING_INDEXED_TIMESTAMP;
    for (index, &timestamp) in group_index_timestamps.iter().enumerate() {
        if index == 0 {
            current = timestamp;
        } else if timestamp == NOTHING_INDEXED_TIMESTAMP {
            // New membership, picked up after its first backfill.
        } else if timestamp == FULL_INDEXED_TIMESTAMP
            && current != FULL_INDEXED_TIMESTAMP
            && current != NOTHING_INDEXED_TIMESTAMP
        {
            // A fully indexed group does not lower a concrete timestamp.
        } else if (current == FULL_INDEXED_TIMESTAMP && timestamp != current)
            || timestamp < current
        {
            current = timestamp;
        }
    }
    current
}

struct MailboxIndexData {
    mail_list_ids: Vec<ListId>,
    newest_timestamp: i64,
    owner_group: GroupId,
}

struct PreparedMail {
    mail: Mail,
    details: MailDetails,
    files: Vec<File>,
}

struct ListBatch {
    list_id: ListId,
    loaded_completely: bool,
    mails: Vec<PreparedMail>,
}

/// Resumes event processing of a running core and clears the indexing flag
/// however a run ends.
struct RunGuard<'a> {
    indexer: &'a MailIndexer,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.indexer.core.is_stopped_processing() {
            self.indexer.core.queue().resume();
        }
        self.indexer.is_indexing.store(false, Ordering::SeqCst);
    }
}

/// Incremental, resumable mail indexer of one user.
pub struct MailIndexer {
    core: Arc<IndexerCore>,
    rest_client: Arc<dyn EntityRestClient>,
    cached_client: Arc<dyn EntityRestClient>,
    entity_client: EntityClient,
    date_provider: Arc<dyn DateProvider>,
    status_sink: Arc<dyn StatusSink>,
    config: IndexerConfig,
    mail_indexing_enabled: AtomicBool,
    indexing_cancelled: AtomicBool,
    is_indexing: AtomicBool,
    is_using_offline_cache: AtomicBool,
    current_index_timestamp: AtomicI64,
    excluded_list_ids: RwLock<HashSet<ListId>>,
    runs: tokio::sync::Mutex<()>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MailIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailIndexer")
            .field("state", &self.state())
            .field("current_index_timestamp", &self.current_index_timestamp())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MailIndexer {
    /// Creates a disabled indexer.
    #[must_use]
    pub fn new(context: IndexerContext, config: IndexerConfig) -> Self {
        Self {
            entity_client: EntityClient::new(Arc::clone(&context.cached_client)),
            core: context.core,
            rest_client: context.rest_client,
            cached_client: context.cached_client,
            date_provider: context.date_provider,
            status_sink: context.status_sink,
            config,
            mail_indexing_enabled: AtomicBool::new(false),
            indexing_cancelled: AtomicBool::new(false),
            is_indexing: AtomicBool::new(false),
            is_using_offline_cache: AtomicBool::new(false),
            current_index_timestamp: AtomicI64::new(NOTHING_INDEXED_TIMESTAMP),
            excluded_list_ids: RwLock::new(HashSet::new()),
            runs: tokio::sync::Mutex::new(()),
            background: Mutex::new(None),
        }
    }

    /// The index core.
    #[must_use]
    pub const fn core(&self) -> &Arc<IndexerCore> {
        &self.core
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> IndexerState {
        if !self.mail_indexing_enabled() {
            IndexerState::Disabled
        } else if !self.is_indexing.load(Ordering::SeqCst) {
            IndexerState::Idle
        } else if self.indexing_cancelled.load(Ordering::SeqCst) {
            IndexerState::Cancelling
        } else {
            IndexerState::Indexing
        }
    }

    /// Whether mail indexing is enabled.
    #[must_use]
    pub fn mail_indexing_enabled(&self) -> bool {
        self.mail_indexing_enabled.load(Ordering::SeqCst)
    }

    /// Oldest point in time all mailboxes are indexed to.
    #[must_use]
    pub fn current_index_timestamp(&self) -> i64 {
        self.current_index_timestamp.load(Ordering::SeqCst)
    }

    /// Lists that are never indexed.
    #[must_use]
    pub fn excluded_list_ids(&self) -> HashSet<ListId> {
        self.excluded_list_ids.read().clone()
    }

    /// Whether mails are read through a persistent offline cache.
    pub fn set_is_using_offline_cache(&self, is_using_offline_cache: bool) {
        self.is_using_offline_cache
            .store(is_using_offline_cache, Ordering::SeqCst);
    }

    /// Creates unindexed group data for the user's groups that have none.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    pub async fn init_group_data(&self, user: &User) -> Result<()> {
        let groups: Vec<(GroupId, GroupType)> = user
            .memberships
            .iter()
            .map(|membership| (membership.group.clone(), membership.group_type))
            .collect();
        self.core.init_group_data(&groups).await?;
        Ok(())
    }

    /// Enables mail indexing.
    ///
    /// The first time, the user's spam folders are recorded as excluded and a
    /// backfill of the initial interval starts in the background. Later calls
    /// only restore the excluded lists.
    ///
    /// # Errors
    ///
    /// Returns an error if the index or the user's mailboxes cannot be read.
    pub async fn enable_mail_indexing(self: &Arc<Self>, user: &User) -> Result<()> {
        let enabled: Option<bool> = {
            let mut tx = self
                .core
                .store()
                .create_transaction(true, &[ObjectStore::MetaData])
                .await?;
            tx.get_json(ObjectStore::MetaData, metadata::MAIL_INDEXING_ENABLED)
                .await?
        };

        if enabled.unwrap_or(false) {
            let excluded: Option<Vec<ListId>> = {
                let mut tx = self
                    .core
                    .store()
                    .create_transaction(true, &[ObjectStore::MetaData])
                    .await?;
                tx.get_json(ObjectStore::MetaData, metadata::EXCLUDED_LIST_IDS)
                    .await?
            };
            *self.excluded_list_ids.write() = excluded.unwrap_or_default().into_iter().collect();
            self.mail_indexing_enabled.store(true, Ordering::SeqCst);
            debug!("Mail indexing was already enabled");
            return Ok(());
        }

        let spam_list_ids = self.load_spam_list_ids(user).await?;
        let mut tx = self
            .core
            .store()
            .create_transaction(false, &[ObjectStore::MetaData])
            .await?;
        tx.put_json(ObjectStore::MetaData, metadata::MAIL_INDEXING_ENABLED, &true)
            .await?;
        tx.put_json(ObjectStore::MetaData, metadata::EXCLUDED_LIST_IDS, &spam_list_ids)
            .await?;
        tx.commit().await?;

        *self.excluded_list_ids.write() = spam_list_ids.into_iter().collect();
        self.mail_indexing_enabled.store(true, Ordering::SeqCst);

        let oldest_timestamp = self
            .date_provider
            .start_of_day_shifted_by(-self.config.initial_mail_index_interval_days);
        info!(user = %user.id, oldest_timestamp, "Mail indexing enabled, starting initial indexing");

        let indexer = Arc::clone(self);
        let user = user.clone();
        let handle = tokio::spawn(async move {
            indexer.index_mailboxes(&user, oldest_timestamp).await;
        });
        if self.background.lock().replace(handle).is_some() {
            debug!("Detached previous background indexing task");
        }
        Ok(())
    }

    /// Disables mail indexing and erases the user's index.
    ///
    /// A running backfill stops at its next checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the index database cannot be deleted.
    pub async fn disable_mail_indexing(&self, user_id: &str) -> Result<()> {
        self.mail_indexing_enabled.store(false, Ordering::SeqCst);
        self.indexing_cancelled.store(true, Ordering::SeqCst);
        self.excluded_list_ids.write().clear();
        self.core
            .store()
            .delete_database(&index_database_name(user_id))
            .await?;
        self.current_index_timestamp
            .store(NOTHING_INDEXED_TIMESTAMP, Ordering::SeqCst);
        info!(user = user_id, "Mail indexing disabled, index deleted");
        Ok(())
    }

    /// Asks a running backfill to stop after the mails in flight.
    pub fn cancel_mail_indexing(&self) {
        info!("Cancelling mail indexing");
        self.indexing_cancelled.store(true, Ordering::SeqCst);
    }

    /// Extends the index back to `new_oldest_timestamp` unless it already
    /// reaches that far.
    pub async fn extend_index_if_needed(&self, user: &User, new_oldest_timestamp: i64) {
        let current = self.current_index_timestamp();
        if current > FULL_INDEXED_TIMESTAMP && current > new_oldest_timestamp {
            self.index_mailboxes(user, new_oldest_timestamp).await;
        } else {
            debug!(current, new_oldest_timestamp, "Index already covers the range");
        }
    }

    /// Waits for the backfill started by [`MailIndexer::enable_mail_indexing`].
    pub async fn wait_for_background_indexing(&self) {
        let handle = self.background.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Background indexing task failed");
        }
    }

    /// Indexes all of the user's mailboxes back to `oldest_timestamp`.
    ///
    /// Runs are serialized. Failures are reported through the status sink,
    /// never returned; a cancelled run or a closed index is not a failure.
    pub async fn index_mailboxes(&self, user: &User, oldest_timestamp: i64) {
        if !self.mail_indexing_enabled() {
            return;
        }
        let _run = self.runs.lock().await;
        if !self.mail_indexing_enabled() {
            return;
        }

        self.is_indexing.store(true, Ordering::SeqCst);
        self.core.queue().pause();
        let _guard = RunGuard { indexer: self };
        self.indexing_cancelled.store(false, Ordering::SeqCst);
        self.core.reset_stats();

        self.send_status(IndexProgress::NotStarted, oldest_timestamp, None, None)
            .await;

        let result = self.index_mailboxes_up_to(user, oldest_timestamp).await;
        self.core.print_status();
        self.update_current_index_timestamp(user).await;

        match result {
            Ok(()) => {
                self.send_status(IndexProgress::Done, oldest_timestamp, None, None)
                    .await;
            }
            Err(e) if self.is_expected_abort(&e) => {
                info!(reason = %e, "Mail indexing stopped");
                self.send_status(IndexProgress::Done, oldest_timestamp, None, None)
                    .await;
            }
            Err(e) => {
                warn!(error = %e, oldest_timestamp, "Mail indexing failed");
                let reason = if matches!(e, Error::Connection(_)) {
                    IndexingErrorReason::ConnectionLost
                } else {
                    IndexingErrorReason::Unknown
                };
                self.send_status(
                    IndexProgress::Done,
                    oldest_timestamp,
                    Some(oldest_timestamp),
                    Some(reason),
                )
                .await;
            }
        }
    }

    fn is_expected_abort(&self, error: &Error) -> bool {
        self.core.is_stopped_processing()
            || matches!(error, Error::Cancelled)
            || matches!(error, Error::Index(e) if e.is_closed())
    }

    async fn index_mailboxes_up_to(&self, user: &User, oldest_timestamp: i64) -> Result<()> {
        let mut mailboxes = Vec::new();
        for membership in filter_mail_memberships(user) {
            let mailbox = self.load_mailbox(&membership.group).await?;
            let Some(group_data) = self.core.get_group_data(&membership.group).await? else {
                // Added after login; indexed once its group data exists.
                debug!(group = %membership.group, "No group data, skipping mailbox");
                continue;
            };
            let newest_timestamp = if group_data.index_timestamp == NOTHING_INDEXED_TIMESTAMP {
                self.date_provider.start_of_day_shifted_by(1)
            } else {
                group_data.index_timestamp
            };
            if newest_timestamp > oldest_timestamp {
                mailboxes.push((mailbox, newest_timestamp));
            }
        }

        if mailboxes.is_empty() {
            debug!(oldest_timestamp, "All mailboxes already indexed");
            return Ok(());
        }
        self.index_mail_lists(mailboxes, oldest_timestamp).await
    }

    async fn index_mail_lists(
        &self,
        mailboxes: Vec<(MailBox, i64)>,
        oldest_timestamp: i64,
    ) -> Result<()> {
        let newest_timestamp = mailboxes
            .iter()
            .map(|(_, newest)| *newest)
            .fold(0, i64::max);
        let mut progress =
            ProgressMonitor::new(u64::try_from(newest_timestamp - oldest_timestamp).unwrap_or(0));
        let loader = IndexLoader::new(
            Arc::clone(&self.rest_client),
            Arc::clone(&self.cached_client),
            self.is_using_offline_cache.load(Ordering::SeqCst),
            &self.config,
        );

        let mut data = Vec::with_capacity(mailboxes.len());
        for (mailbox, newest_timestamp) in mailboxes {
            data.push(MailboxIndexData {
                mail_list_ids: self.load_mail_list_ids(&mailbox).await?,
                newest_timestamp,
                owner_group: mailbox.owner_group,
            });
        }

        self.index_mail_lists_in_time_batches(
            &mut data,
            (newest_timestamp, oldest_timestamp),
            &mut progress,
            &loader,
        )
        .await
    }

    /// Walks `(range_start, range_end)` backward one window at a time,
    /// flushing whenever enough instances are staged and once at the end.
    async fn index_mail_lists_in_time_batches(
        &self,
        mailboxes: &mut [MailboxIndexData],
        (mut range_start, range_end): (i64, i64),
        progress: &mut ProgressMonitor,
        loader: &IndexLoader,
    ) -> Result<()> {
        let mut update = IndexUpdate::new();
        loop {
            if self.indexing_cancelled.load(Ordering::SeqCst) {
                return Err(Error::Cancelled);
            }
            // Land exactly on the requested end so that the watermark stays
            // aligned to the start of a day.
            let batch_end = (range_start - self.config.batch_interval_ms()).max(range_end);

            if range_start <= range_end {
                let per_group = group_timestamps(mailboxes, batch_end, range_start);
                self.core.write_index_update(&per_group, update).await?;
                self.report_progress(progress, range_start - batch_end, range_end)
                    .await;
                return Ok(());
            }

            self.prepare_mail_data_for_time_batch(
                mailboxes,
                batch_end,
                (range_start, batch_end),
                &mut update,
                loader,
            )
            .await?;
            self.report_progress(progress, range_start - batch_end, range_end)
                .await;

            if update.staged_instance_count() > self.config.max_staged_instances {
                let per_group = group_timestamps(mailboxes, batch_end, batch_end);
                debug!(
                    staged = update.staged_instance_count(),
                    batch_end, "Flushing index update"
                );
                self.core
                    .write_index_update(&per_group, std::mem::take(&mut update))
                    .await?;
            }
            range_start = batch_end;
        }
    }

    async fn prepare_mail_data_for_time_batch(
        &self,
        mailboxes: &mut [MailboxIndexData],
        batch_end: i64,
        time_range: (i64, i64),
        update: &mut IndexUpdate,
        loader: &IndexLoader,
    ) -> Result<()> {
        let active: Vec<&MailboxIndexData> = mailboxes
            .iter()
            .filter(|mailbox| batch_end < mailbox.newest_timestamp)
            .collect();
        let batches: Vec<Vec<ListBatch>> =
            try_join_bounded(active, self.config.mailbox_concurrency, |mailbox| {
                self.prepare_mailbox(mailbox, time_range, loader)
            })
            .await?;

        let active = mailboxes
            .iter_mut()
            .filter(|mailbox| batch_end < mailbox.newest_timestamp);
        for (mailbox, lists) in active.zip(batches) {
            for list in lists {
                if list.loaded_completely {
                    debug!(list_id = %list.list_id, "Mail list fully indexed");
                    mailbox.mail_list_ids.retain(|id| *id != list.list_id);
                }
                for PreparedMail {
                    mail,
                    details,
                    files,
                } in list.mails
                {
                    let key_to_entries = self.create_mail_index_entries(&mail, &details, &files);
                    let owner_group = mail.owner_group.as_deref().unwrap_or(&mailbox.owner_group);
                    self.core.encrypt_search_index_entries(
                        &mail.id.list_id,
                        &mail.id.element_id,
                        owner_group,
                        key_to_entries,
                        update,
                    )?;
                }
            }
        }
        Ok(())
    }

    async fn prepare_mailbox(
        &self,
        mailbox: &MailboxIndexData,
        time_range: (i64, i64),
        loader: &IndexLoader,
    ) -> Result<Vec<ListBatch>> {
        let list_ids: Vec<&ListId> = mailbox.mail_list_ids.iter().collect();
        try_join_bounded(list_ids, self.config.list_concurrency, |list_id| {
            self.prepare_list(list_id, time_range, loader)
        })
        .await
    }

    async fn prepare_list(
        &self,
        list_id: &str,
        time_range: (i64, i64),
        loader: &IndexLoader,
    ) -> Result<ListBatch> {
        let start = Instant::now();
        let ReverseRange {
            elements: mails,
            loaded_completely,
        } = loader.load_mails_with_cache(list_id, time_range).await?;

        if self.indexing_cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        self.core.add_mail_count(mails.len());

        let ids: Vec<_> = mails.iter().map(|mail| mail.id.clone()).collect();
        let mails: Vec<Mail> = mails
            .into_iter()
            .filter(|mail| {
                if let Some(errors) = &mail.errors {
                    debug!(mail = %mail.id, errors = %errors, "Skipping mail that failed to decrypt");
                    return false;
                }
                true
            })
            .collect();

        let with_details = loader.load_mail_details(&mails).await?;
        let files = loader.load_attachments(&mails).await?;
        loader.remove_from_cache(&ids).await;

        let prepared = with_details
            .into_iter()
            .map(|MailWithDetails { mail, details }| {
                let files = files
                    .iter()
                    .filter(|file| mail.attachments.contains(&file.id))
                    .cloned()
                    .collect();
                PreparedMail {
                    mail,
                    details,
                    files,
                }
            })
            .collect();

        self.core.add_preparing_time(start.elapsed());
        Ok(ListBatch {
            list_id: list_id.to_string(),
            loaded_completely,
            mails: prepared,
        })
    }

    async fn report_progress(&self, progress: &mut ProgressMonitor, work: i64, aimed: i64) {
        if let Some(percentage) = progress.work_done(u64::try_from(work).unwrap_or(0)) {
            self.send_status(IndexProgress::InProgress(percentage), aimed, None, None)
                .await;
        }
    }

    async fn send_status(
        &self,
        progress: IndexProgress,
        aimed_mail_index_timestamp: i64,
        failed_indexing_up_to: Option<i64>,
        error: Option<IndexingErrorReason>,
    ) {
        self.status_sink
            .update_index_state(SearchIndexStateInfo {
                initializing: false,
                mail_index_enabled: self.mail_indexing_enabled(),
                progress,
                current_mail_index_timestamp: self.current_index_timestamp(),
                aimed_mail_index_timestamp,
                indexed_mail_count: self.core.stats().mail_count,
                failed_indexing_up_to,
                error,
            })
            .await;
    }

    async fn load_mailbox(&self, group_id: &str) -> Result<MailBox> {
        let root: MailboxGroupRoot = self.entity_client.load(None, group_id).await?;
        self.entity_client.load(None, &root.mailbox).await
    }

    async fn load_spam_list_ids(&self, user: &User) -> Result<Vec<ListId>> {
        let mut spam_list_ids = Vec::new();
        for membership in filter_mail_memberships(user) {
            let mailbox = self.load_mailbox(&membership.group).await?;
            let folders: Vec<MailFolder> = self.entity_client.load_all(&mailbox.folders).await?;
            spam_list_ids.extend(
                folders
                    .into_iter()
                    .filter(|folder| folder.folder_type == MailFolderType::Spam)
                    .map(|folder| folder.mails),
            );
        }
        Ok(spam_list_ids)
    }

    async fn load_mail_list_ids(&self, mailbox: &MailBox) -> Result<Vec<ListId>> {
        let folders: Vec<MailFolder> = self.entity_client.load_all(&mailbox.folders).await?;
        let excluded = self.excluded_list_ids.read();
        Ok(folders
            .into_iter()
            .filter(|folder| {
                folder.folder_type != MailFolderType::Spam && !excluded.contains(&folder.mails)
            })
            .map(|folder| folder.mails)
            .collect())
    }

    /// Builds the index entries of a mail.
    #[must_use]
    pub fn create_mail_index_entries(
        &self,
        mail: &Mail,
        details: &MailDetails,
        files: &[File],
    ) -> HashMap<String, Vec<SearchIndexEntry>> {
        let recipients = |addresses: &[MailAddress]| {
            addresses
                .iter()
                .map(MailAddress::to_index_text)
                .collect::<Vec<_>>()
                .join(",")
        };

        self.core.create_index_entries_for_attributes(
            &mail.id.element_id,
            &[
                AttributeHandler::new(attributes::SUBJECT, || Ok(mail.subject.clone())),
                AttributeHandler::new(attributes::TO_RECIPIENTS, || {
                    Ok(recipients(&details.recipients.to))
                }),
                AttributeHandler::new(attributes::CC_RECIPIENTS, || {
                    Ok(recipients(&details.recipients.cc))
                }),
                AttributeHandler::new(attributes::BCC_RECIPIENTS, || {
                    Ok(recipients(&details.recipients.bcc))
                }),
                AttributeHandler::new(attributes::SENDER, || {
                    Ok(mail
                        .sender
                        .as_ref()
                        .map(MailAddress::to_index_text)
                        .unwrap_or_default())
                }),
                AttributeHandler::new(attributes::BODY, || {
                    Ok(details
                        .body
                        .text
                        .as_deref()
                        .map(html_to_text)
                        .unwrap_or_default())
                }),
                AttributeHandler::new(attributes::ATTACHMENTS, || {
                    Ok(files
                        .iter()
                        .map(|file| file.name.as_str())
                        .collect::<Vec<_>>()
                        .join(" "))
                }),
            ],
        )
    }

    fn is_excluded(&self, event: &EntityUpdate) -> bool {
        self.excluded_list_ids
            .read()
            .contains(&event.instance_list_id)
    }

    /// Loads a created mail and builds its entries.
    ///
    /// Returns `None` for mails in excluded lists and for mails that are gone
    /// or no longer accessible.
    ///
    /// # Errors
    ///
    /// Returns any other loading error.
    pub async fn process_new_mail(&self, event: &EntityUpdate) -> Result<Option<NewMailEntries>> {
        if self.is_excluded(event) {
            debug!(mail = %event.id(), "Mail is in an excluded list");
            return Ok(None);
        }
        match self.load_new_mail(event).await {
            Ok(entries) => Ok(Some(entries)),
            Err(e) if e.is_missing_entity() => {
                info!(mail = %event.id(), reason = %e, "Tried to index unavailable mail");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn load_new_mail(&self, event: &EntityUpdate) -> Result<NewMailEntries> {
        let mail: Mail = self
            .entity_client
            .load(Some(&event.instance_list_id), &event.instance_id)
            .await?;

        let details = if let Some(draft_id) = &mail.mail_details_draft {
            let mut keys = OwnerKeyProvider::new();
            if let Some(key) = mail.owner_key() {
                keys.insert(draft_id.element_id.clone(), key);
            }
            let drafts: Vec<MailDetailsDraft> = self
                .entity_client
                .load_multiple(
                    Some(&draft_id.list_id),
                    std::slice::from_ref(&draft_id.element_id),
                    Some(&keys),
                )
                .await?;
            drafts
                .into_iter()
                .next()
                .ok_or_else(|| Error::NotFound(format!("draft details of mail {}", mail.id)))?
                .details
        } else if let Some(blob_id) = &mail.mail_details {
            let mut keys = OwnerKeyProvider::new();
            if let Some(key) = mail.owner_key() {
                keys.insert(blob_id.element_id.clone(), key);
            }
            let blobs: Vec<MailDetailsBlob> = self
                .entity_client
                .load_multiple(
                    Some(&blob_id.list_id),
                    std::slice::from_ref(&blob_id.element_id),
                    Some(&keys),
                )
                .await?;
            blobs
                .into_iter()
                .next()
                .ok_or_else(|| Error::NotFound(format!("details of mail {}", mail.id)))?
                .details
        } else {
            return Err(Error::NotFound(format!("details of mail {}", mail.id)));
        };

        let files: Vec<File> = try_join_all(mail.attachments.iter().map(|id| {
            self.entity_client
                .load::<File>(Some(&id.list_id), &id.element_id)
        }))
        .await?;

        let key_to_entries = self.create_mail_index_entries(&mail, &details, &files);
        Ok(NewMailEntries {
            mail,
            key_to_entries,
        })
    }

    fn stage_new_mail(
        &self,
        entries: NewMailEntries,
        fallback_group: &str,
        update: &mut IndexUpdate,
    ) -> Result<()> {
        let NewMailEntries {
            mail,
            key_to_entries,
        } = entries;
        let owner_group = mail.owner_group.as_deref().unwrap_or(fallback_group);
        self.core.encrypt_search_index_entries(
            &mail.id.list_id,
            &mail.id.element_id,
            owner_group,
            key_to_entries,
            update,
        )?;
        Ok(())
    }

    /// Stages a mail that was moved to `event.instance_list_id`.
    ///
    /// An indexed mail gets its list updated, or is removed when it moved into
    /// an excluded list. A mail that was never indexed is indexed now.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read or the mail cannot be
    /// loaded.
    pub async fn process_moved_mail(
        &self,
        event: &EntityUpdate,
        group_id: &str,
        update: &mut IndexUpdate,
    ) -> Result<()> {
        let enc_instance_id = self.core.encrypt_instance_id(&event.instance_id)?;
        if self.core.get_element_data(&enc_instance_id).await?.is_some() {
            if self.is_excluded(event) {
                debug!(mail = %event.id(), "Mail moved into an excluded list");
                self.core.process_deleted(&event.instance_id, update)?;
            } else {
                update.moves.push(MoveInstance {
                    enc_instance_id,
                    new_list_id: event.instance_list_id.clone(),
                });
            }
        } else if let Some(entries) = self.process_new_mail(event).await? {
            self.stage_new_mail(entries, group_id, update)?;
        }
        Ok(())
    }

    async fn process_updated_mail(
        &self,
        event: &EntityUpdate,
        group_id: &str,
        update: &mut IndexUpdate,
    ) -> Result<()> {
        let mail: Mail = match self
            .entity_client
            .load(Some(&event.instance_list_id), &event.instance_id)
            .await
        {
            Ok(mail) => mail,
            Err(e) if e.is_missing_entity() => {
                info!(mail = %event.id(), reason = %e, "Update event for unavailable mail");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // Only drafts change content in place.
        if mail.is_draft() {
            self.core.process_deleted(&event.instance_id, update)?;
            if let Some(entries) = self.process_new_mail(event).await? {
                self.stage_new_mail(entries, group_id, update)?;
            }
        }
        Ok(())
    }

    /// Stages the mail events of one batch into `update`.
    ///
    /// A create and a delete of the same instance in one batch form a move.
    /// Does nothing while mail indexing is disabled.
    ///
    /// # Errors
    ///
    /// Returns loading or index errors other than missing mails.
    pub async fn process_entity_events(
        &self,
        events: &[EntityUpdate],
        group_id: &str,
        batch_id: &str,
        update: &mut IndexUpdate,
    ) -> Result<()> {
        if !self.mail_indexing_enabled() {
            return Ok(());
        }
        debug!(group_id, batch_id, events = events.len(), "Processing mail events");

        for event in events.iter().filter(|event| event.type_ref == TypeRef::Mail) {
            match event.operation {
                OperationType::Create
                    if contains_event_of_type(events, OperationType::Delete, &event.instance_id) =>
                {
                    self.process_moved_mail(event, group_id, update).await?;
                }
                OperationType::Create => {
                    if let Some(entries) = self.process_new_mail(event).await? {
                        self.stage_new_mail(entries, group_id, update)?;
                    }
                }
                OperationType::Update => {
                    self.process_updated_mail(event, group_id, update).await?;
                }
                OperationType::Delete => {
                    // Part of a move, handled with the create.
                    if !contains_event_of_type(events, OperationType::Create, &event.instance_id)
                    {
                        self.core.process_deleted(&event.instance_id, update)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Reconciles one event batch into the index.
    ///
    /// Waits while a backfill holds the event queue, then commits the batch
    /// in one transaction. Once the core is stopped the batch is dropped.
    ///
    /// # Errors
    ///
    /// Returns loading or index errors other than missing mails.
    pub async fn process_entity_batch(&self, batch: &EntityEventBatch) -> Result<()> {
        if !self.mail_indexing_enabled() {
            return Ok(());
        }
        if self.core.is_stopped_processing() || !self.core.queue().wait_until_resumed().await {
            info!(batch_id = %batch.batch_id, "Index stopped, dropping event batch");
            return Ok(());
        }
        let _run = self.runs.lock().await;
        if self.core.is_stopped_processing() {
            info!(batch_id = %batch.batch_id, "Index stopped, dropping event batch");
            return Ok(());
        }

        let mut update = IndexUpdate::new();
        self.process_entity_events(&batch.events, &batch.group_id, &batch.batch_id, &mut update)
            .await?;
        if update.is_empty() {
            return Ok(());
        }
        self.core.write_index_update(&[], update).await?;
        Ok(())
    }

    /// Recomputes the current index timestamp from the stored group data.
    ///
    /// Errors are logged; the previous value is kept.
    pub async fn update_current_index_timestamp(&self, user: &User) {
        match self.load_group_index_timestamps(user).await {
            Ok(timestamps) => {
                self.current_index_timestamp
                    .store(get_current_index_timestamp(&timestamps), Ordering::SeqCst);
            }
            Err(e) if self.core.is_stopped_processing() => {
                info!(reason = %e, "Index closed, not updating current index timestamp");
            }
            Err(e) => warn!(error = %e, "Could not update current index timestamp"),
        }
    }

    async fn load_group_index_timestamps(&self, user: &User) -> Result<Vec<i64>> {
        let mut tx = self
            .core
            .store()
            .create_transaction(true, &[ObjectStore::GroupData])
            .await?;
        let mut timestamps = Vec::new();
        for membership in filter_mail_memberships(user) {
            let group_data: Option<GroupData> = tx
                .get_json(ObjectStore::GroupData, &membership.group)
                .await?;
            timestamps.push(group_data.map_or(NOTHING_INDEXED_TIMESTAMP, |g| g.index_timestamp));
        }
        Ok(timestamps)
    }
}

fn contains_event_of_type(events: &[EntityUpdate], operation: OperationType, id: &str) -> bool {
    events
        .iter()
        .any(|event| event.operation == operation && event.instance_id == id)
}

/// Watermarks of the mailboxes active below `batch_end`: fully indexed once
/// every list is drained, `timestamp` otherwise.
fn group_timestamps(
    mailboxes: &[MailboxIndexData],
    batch_end: i64,
    timestamp: i64,
) -> Vec<GroupTimestamp> {
    mailboxes
        .iter()
        .filter(|mailbox| batch_end < mailbox.newest_timestamp)
        .map(|mailbox| GroupTimestamp {
            group_id: mailbox.owner_group.clone(),
            index_timestamp: if mailbox.mail_list_ids.is_empty() {
                FULL_INDEXED_TIMESTAMP
            } else {
                timestamp
            },
        })
        .collect()
}
