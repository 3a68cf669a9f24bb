//! Index core: turns attribute text into encrypted entries and commits
//! changesets.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cipher::IndexCipher;
use crate::model::{
    ElementData, EncryptedPosting, EntryPayload, GroupData, GroupTimestamp, GroupType,
    SearchIndexEntry,
};
use crate::queue::EventQueue;
use crate::store::{IndexStore, ObjectStore, Transaction};
use crate::tokenizer::tokenize;
use crate::update::{IndexUpdate, MoveInstance};
use crate::{Error, Result};

/// Error returned by an attribute value producer.
pub type AttributeError = Box<dyn std::error::Error + Send + Sync>;

/// Produces the text of one attribute on demand.
pub type ValueProducer<'a> = Box<dyn Fn() -> std::result::Result<String, AttributeError> + 'a>;

/// Identifies an indexed attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeDescriptor {
    /// Stable attribute id stored in the entries.
    pub id: u64,
    /// Name used in logs.
    pub name: &'static str,
}

/// One attribute of an instance to index.
pub struct AttributeHandler<'a> {
    /// Which attribute this is.
    pub attribute: AttributeDescriptor,
    /// Producer of the attribute's text.
    pub value: ValueProducer<'a>,
}

impl<'a> AttributeHandler<'a> {
    /// Creates a handler from a descriptor and a producer.
    pub fn new(
        attribute: AttributeDescriptor,
        value: impl Fn() -> std::result::Result<String, AttributeError> + 'a,
    ) -> Self {
        Self {
            attribute,
            value: Box::new(value),
        }
    }
}

/// Timing and volume of the current indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Mails loaded for indexing.
    pub mail_count: usize,
    /// Instances written by committed changesets.
    pub written_instances: usize,
    /// Time spent loading entities.
    pub preparing_time: Duration,
    /// Time spent tokenizing.
    pub indexing_time: Duration,
    /// Time spent encrypting.
    pub encryption_time: Duration,
    /// Time spent writing to the store.
    pub storage_time: Duration,
}

/// Encodes, encrypts and commits index entries.
pub struct IndexerCore {
    store: Arc<dyn IndexStore>,
    pub(crate) cipher: Arc<dyn IndexCipher>,
    queue: EventQueue,
    stats: Mutex<IndexStats>,
    stopped: AtomicBool,
}

impl IndexerCore {
    /// Creates a core over the given store and cipher.
    #[must_use]
    pub fn new(store: Arc<dyn IndexStore>, cipher: Arc<dyn IndexCipher>) -> Self {
        Self {
            store,
            cipher,
            queue: EventQueue::new(),
            stats: Mutex::new(IndexStats::default()),
            stopped: AtomicBool::new(false),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// Gate of the live event processing.
    #[must_use]
    pub const fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Builds the token → entries mapping of one instance.
    ///
    /// A producer that fails is logged and skipped; the instance is indexed
    /// with the attributes that could be extracted.
    #[must_use]
    pub fn create_index_entries_for_attributes(
        &self,
        instance_id: &str,
        attributes: &[AttributeHandler<'_>],
    ) -> HashMap<String, Vec<SearchIndexEntry>> {
        let start = Instant::now();
        let mut key_to_entries: HashMap<String, Vec<SearchIndexEntry>> = HashMap::new();

        for handler in attributes {
            let text = match (handler.value)() {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        instance_id,
                        attribute = handler.attribute.name,
                        error = %e,
                        "Could not extract attribute, indexing instance without it"
                    );
                    continue;
                }
            };

            let mut positions_by_token: HashMap<String, Vec<u32>> = HashMap::new();
            for (position, token) in tokenize(&text).into_iter().enumerate() {
                let position = u32::try_from(position).unwrap_or(u32::MAX);
                positions_by_token.entry(token).or_default().push(position);
            }

            for (token, positions) in positions_by_token {
                key_to_entries
                    .entry(token)
                    .or_default()
                    .push(SearchIndexEntry {
                        id: instance_id.to_string(),
                        attribute: handler.attribute.id,
                        positions,
                    });
            }
        }

        self.stats.lock().indexing_time += start.elapsed();
        key_to_entries
    }

    /// Encrypts the entries of one instance and stages them for creation.
    ///
    /// Staging the same instance twice in one changeset keeps the first copy.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or serialization fails.
    pub fn encrypt_search_index_entries(
        &self,
        list_id: &str,
        element_id: &str,
        owner_group: &str,
        key_to_entries: HashMap<String, Vec<SearchIndexEntry>>,
        update: &mut IndexUpdate,
    ) -> Result<()> {
        let start = Instant::now();
        let enc_instance_id = self.encrypt_instance_id(element_id)?;
        if update
            .create
            .enc_instance_id_to_element_data
            .contains_key(&enc_instance_id)
        {
            debug!(element_id, "Instance already staged in this changeset");
            return Ok(());
        }

        let mut enc_words = Vec::with_capacity(key_to_entries.len());
        for (word, entries) in key_to_entries {
            let enc_word = self.cipher.encrypt_index_key(&word)?;
            let mut postings = Vec::with_capacity(entries.len());
            for entry in entries {
                let payload = serde_json::to_vec(&EntryPayload {
                    attribute: entry.attribute,
                    positions: entry.positions,
                })?;
                postings.push(EncryptedPosting {
                    instance: enc_instance_id.clone(),
                    entry: STANDARD.encode(self.cipher.encrypt(&payload)?),
                });
            }
            update
                .create
                .index_map
                .entry(enc_word.clone())
                .or_default()
                .extend(postings);
            enc_words.push(enc_word);
        }

        let words_blob = serde_json::to_vec(&enc_words)?;
        update.create.enc_instance_id_to_element_data.insert(
            enc_instance_id,
            ElementData {
                list_id: list_id.to_string(),
                enc_words: STANDARD.encode(self.cipher.encrypt(&words_blob)?),
                owner_group: owner_group.to_string(),
            },
        );

        self.stats.lock().encryption_time += start.elapsed();
        Ok(())
    }

    /// Encrypted form of an instance id, as used for store keys.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    pub fn encrypt_instance_id(&self, element_id: &str) -> Result<String> {
        self.cipher.encrypt_index_key(element_id)
    }

    /// Stages removal of an instance from the index.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    pub fn process_deleted(&self, element_id: &str, update: &mut IndexUpdate) -> Result<()> {
        let enc_instance_id = self.encrypt_instance_id(element_id)?;
        update.delete.enc_instance_ids.insert(enc_instance_id);
        Ok(())
    }

    /// Reads the bookkeeping of an indexed instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get_element_data(&self, enc_instance_id: &str) -> Result<Option<ElementData>> {
        let mut tx = self
            .store
            .create_transaction(true, &[ObjectStore::ElementData])
            .await?;
        tx.get_json(ObjectStore::ElementData, enc_instance_id).await
    }

    /// Reads the watermark of a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get_group_data(&self, group_id: &str) -> Result<Option<GroupData>> {
        let mut tx = self
            .store
            .create_transaction(true, &[ObjectStore::GroupData])
            .await?;
        tx.get_json(ObjectStore::GroupData, group_id).await
    }

    /// Creates unindexed group data for groups that have none yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn init_group_data(&self, groups: &[(String, GroupType)]) -> Result<()> {
        let mut tx = self
            .store
            .create_transaction(false, &[ObjectStore::GroupData])
            .await?;
        for (group_id, group_type) in groups {
            let existing: Option<GroupData> =
                tx.get_json(ObjectStore::GroupData, group_id).await?;
            if existing.is_none() {
                debug!(group_id, "Initializing group data");
                tx.put_json(ObjectStore::GroupData, group_id, &GroupData::new(*group_type))
                    .await?;
            }
        }
        tx.commit().await
    }

    /// Commits a changeset and the new group watermarks in one transaction.
    ///
    /// Either everything is written or nothing is. Watermarks only ever move
    /// back in time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] once processing stopped,
    /// [`Error::InvalidState`] if a group has no group data, or any store error.
    pub async fn write_index_update(
        &self,
        data_per_group: &[GroupTimestamp],
        update: IndexUpdate,
    ) -> Result<()> {
        if self.is_stopped_processing() {
            return Err(Error::Closed);
        }
        let start = Instant::now();

        let mut tx = self
            .store
            .create_transaction(false, &ObjectStore::ALL)
            .await?;
        move_indexed_instances(tx.as_mut(), &update.moves).await?;
        self.delete_indexed_instances(tx.as_mut(), &update.delete.enc_instance_ids)
            .await?;
        let written = insert_new_instances(tx.as_mut(), update.create).await?;
        update_group_data_index_timestamps(tx.as_mut(), data_per_group).await?;
        tx.commit().await?;

        let mut stats = self.stats.lock();
        stats.storage_time += start.elapsed();
        stats.written_instances += written;
        Ok(())
    }

    async fn delete_indexed_instances(
        &self,
        tx: &mut dyn Transaction,
        enc_instance_ids: &HashSet<String>,
    ) -> Result<()> {
        for enc_instance_id in enc_instance_ids {
            let Some(element_data) = tx
                .get_json::<ElementData>(ObjectStore::ElementData, enc_instance_id)
                .await?
            else {
                debug!("Instance to delete is not indexed");
                continue;
            };

            for enc_word in self.decrypt_words(&element_data)? {
                let postings: Vec<EncryptedPosting> = tx
                    .get_json(ObjectStore::SearchIndex, &enc_word)
                    .await?
                    .unwrap_or_default();
                let remaining: Vec<_> = postings
                    .into_iter()
                    .filter(|posting| &posting.instance != enc_instance_id)
                    .collect();
                if remaining.is_empty() {
                    tx.delete(ObjectStore::SearchIndex, &enc_word).await?;
                } else {
                    tx.put_json(ObjectStore::SearchIndex, &enc_word, &remaining)
                        .await?;
                }
            }
            tx.delete(ObjectStore::ElementData, enc_instance_id).await?;
        }
        Ok(())
    }

    pub(crate) fn decrypt_words(&self, element_data: &ElementData) -> Result<Vec<String>> {
        let blob = self.cipher.decrypt(&STANDARD.decode(&element_data.enc_words)?)?;
        Ok(serde_json::from_slice(&blob)?)
    }

    /// Stops all processing and closes the store.
    pub async fn stop_processing(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.queue.close();
        self.store.close().await;
    }

    /// Returns true once processing has been stopped or the store closed.
    #[must_use]
    pub fn is_stopped_processing(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.store.is_closed()
    }

    /// Clears the run statistics.
    pub fn reset_stats(&self) {
        *self.stats.lock() = IndexStats::default();
    }

    /// Snapshot of the run statistics.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        self.stats.lock().clone()
    }

    /// Adds loaded mails to the run statistics.
    pub fn add_mail_count(&self, count: usize) {
        self.stats.lock().mail_count += count;
    }

    /// Adds entity loading time to the run statistics.
    pub fn add_preparing_time(&self, elapsed: Duration) {
        self.stats.lock().preparing_time += elapsed;
    }

    /// Logs the run statistics.
    pub fn print_status(&self) {
        let stats = self.stats();
        info!(
            mail_count = stats.mail_count,
            written_instances = stats.written_instances,
            preparing_ms = stats.preparing_time.as_millis(),
            indexing_ms = stats.indexing_time.as_millis(),
            encryption_ms = stats.encryption_time.as_millis(),
            storage_ms = stats.storage_time.as_millis(),
            "Indexing run finished"
        );
    }
}

async fn move_indexed_instances(tx: &mut dyn Transaction, moves: &[MoveInstance]) -> Result<()> {
    for MoveInstance {
        enc_instance_id,
        new_list_id,
    } in moves
    {
        match tx
            .get_json::<ElementData>(ObjectStore::ElementData, enc_instance_id)
            .await?
        {
            Some(mut element_data) => {
                element_data.list_id.clone_from(new_list_id);
                tx.put_json(ObjectStore::ElementData, enc_instance_id, &element_data)
                    .await?;
            }
            None => debug!(new_list_id, "Moved instance is not indexed"),
        }
    }
    Ok(())
}

/// Writes new instances, skipping those that are already indexed.
async fn insert_new_instances(
    tx: &mut dyn Transaction,
    create: crate::update::CreateOps,
) -> Result<usize> {
    let mut already_indexed = HashSet::new();
    for (enc_instance_id, element_data) in &create.enc_instance_id_to_element_data {
        let existing: Option<ElementData> =
            tx.get_json(ObjectStore::ElementData, enc_instance_id).await?;
        if existing.is_some() {
            already_indexed.insert(enc_instance_id.as_str());
        } else {
            tx.put_json(ObjectStore::ElementData, enc_instance_id, element_data)
                .await?;
        }
    }

    for (enc_word, postings) in &create.index_map {
        let new_postings: Vec<&EncryptedPosting> = postings
            .iter()
            .filter(|posting| !already_indexed.contains(posting.instance.as_str()))
            .collect();
        if new_postings.is_empty() {
            continue;
        }
        let mut stored: Vec<EncryptedPosting> = tx
            .get_json(ObjectStore::SearchIndex, enc_word)
            .await?
            .unwrap_or_default();
        stored.extend(new_postings.into_iter().cloned());
        tx.put_json(ObjectStore::SearchIndex, enc_word, &stored)
            .await?;
    }

    if !already_indexed.is_empty() {
        debug!(count = already_indexed.len(), "Skipped already indexed instances");
    }
    Ok(create.enc_instance_id_to_element_data.len() - already_indexed.len())
}

async fn update_group_data_index_timestamps(
    tx: &mut dyn Transaction,
    data_per_group: &[GroupTimestamp],
) -> Result<()> {
    for GroupTimestamp {
        group_id,
        index_timestamp,
    } in data_per_group
    {
        let mut group_data: GroupData = tx
            .get_json(ObjectStore::GroupData, group_id)
            .await?
            .ok_or_else(|| {
                Error::InvalidState(format!("GroupData not available for group {group_id}"))
            })?;
        group_data.index_timestamp = group_data.index_timestamp.min(*index_timestamp);
        tx.put_json(ObjectStore::GroupData, group_id, &group_data)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cipher::AesIndexCipher;
    use crate::model::{FULL_INDEXED_TIMESTAMP, NOTHING_INDEXED_TIMESTAMP};
    use crate::store::SqliteIndexStore;

    const SUBJECT: AttributeDescriptor = AttributeDescriptor {
        id: 1,
        name: "subject",
    };
    const BODY: AttributeDescriptor = AttributeDescriptor { id: 2, name: "body" };

    async fn setup() -> (Arc<SqliteIndexStore>, IndexerCore) {
        let store = Arc::new(SqliteIndexStore::in_memory("user").await.unwrap());
        let core = IndexerCore::new(store.clone(), Arc::new(AesIndexCipher::new(b"key")));
        (store, core)
    }

    fn stage(core: &IndexerCore, list: &str, id: &str, subject: &str, update: &mut IndexUpdate) {
        let subject = subject.to_string();
        let entries = core.create_index_entries_for_attributes(
            id,
            &[AttributeHandler::new(SUBJECT, move || Ok(subject.clone()))],
        );
        core.encrypt_search_index_entries(list, id, "group", entries, update)
            .unwrap();
    }

    #[test]
    fn test_entries_collect_positions_per_attribute() {
        let store: Arc<dyn IndexStore> = Arc::new(NeverStore);
        let core = IndexerCore::new(store, Arc::new(AesIndexCipher::new(b"key")));

        let entries = core.create_index_entries_for_attributes(
            "mail1",
            &[
                AttributeHandler::new(SUBJECT, || Ok("hello hello world".to_string())),
                AttributeHandler::new(BODY, || Ok("world".to_string())),
            ],
        );

        assert_eq!(
            entries["hello"],
            vec![SearchIndexEntry {
                id: "mail1".to_string(),
                attribute: 1,
                positions: vec![0, 1],
            }]
        );
        let mut world: Vec<u64> = entries["world"].iter().map(|e| e.attribute).collect();
        world.sort_unstable();
        assert_eq!(world, vec![1, 2]);
    }

    #[test]
    fn test_failing_attribute_does_not_drop_instance() {
        let store: Arc<dyn IndexStore> = Arc::new(NeverStore);
        let core = IndexerCore::new(store, Arc::new(AesIndexCipher::new(b"key")));

        let entries = core.create_index_entries_for_attributes(
            "mail1",
            &[
                AttributeHandler::new(SUBJECT, || Err("body not decrypted".into())),
                AttributeHandler::new(BODY, || Ok("still indexed".to_string())),
            ],
        );

        assert_eq!(entries.len(), 2);
        assert!(entries.contains_key("still"));
        assert!(entries.values().flatten().all(|e| e.attribute == BODY.id));
    }

    #[tokio::test]
    async fn test_write_creates_entries_and_element_data() {
        let (store, core) = setup().await;
        core.init_group_data(&[("group".to_string(), GroupType::Mail)])
            .await
            .unwrap();

        let mut update = IndexUpdate::new();
        stage(&core, "inbox", "mail1", "quarterly report", &mut update);
        stage(&core, "inbox", "mail2", "report draft", &mut update);
        assert_eq!(update.staged_instance_count(), 2);

        core.write_index_update(
            &[GroupTimestamp {
                group_id: "group".to_string(),
                index_timestamp: 1000,
            }],
            update,
        )
        .await
        .unwrap();

        assert_eq!(store.count(ObjectStore::ElementData).await.unwrap(), 2);
        assert_eq!(store.count(ObjectStore::SearchIndex).await.unwrap(), 3);
        assert_eq!(
            core.get_group_data("group").await.unwrap().unwrap().index_timestamp,
            1000
        );
        assert_eq!(core.stats().written_instances, 2);
    }

    #[tokio::test]
    async fn test_reindexing_same_instance_is_skipped() {
        let (store, core) = setup().await;

        let mut update = IndexUpdate::new();
        stage(&core, "inbox", "mail1", "report", &mut update);
        core.write_index_update(&[], update).await.unwrap();

        let mut update = IndexUpdate::new();
        stage(&core, "inbox", "mail1", "report", &mut update);
        core.write_index_update(&[], update).await.unwrap();

        let enc_word = core.cipher.encrypt_index_key("report").unwrap();
        let mut tx = store
            .create_transaction(true, &[ObjectStore::SearchIndex])
            .await
            .unwrap();
        let postings: Vec<EncryptedPosting> = tx
            .get_json(ObjectStore::SearchIndex, &enc_word)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(postings.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_postings_and_element_data() {
        let (store, core) = setup().await;

        let mut update = IndexUpdate::new();
        stage(&core, "inbox", "mail1", "shared word", &mut update);
        stage(&core, "inbox", "mail2", "shared", &mut update);
        core.write_index_update(&[], update).await.unwrap();

        let mut update = IndexUpdate::new();
        core.process_deleted("mail1", &mut update).unwrap();
        core.write_index_update(&[], update).await.unwrap();

        assert_eq!(store.count(ObjectStore::ElementData).await.unwrap(), 1);
        // "word" only belonged to mail1, "shared" still has mail2.
        assert_eq!(store.count(ObjectStore::SearchIndex).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_move_updates_list_id() {
        let (_store, core) = setup().await;

        let mut update = IndexUpdate::new();
        stage(&core, "inbox", "mail1", "subject", &mut update);
        core.write_index_update(&[], update).await.unwrap();

        let enc_instance_id = core.encrypt_instance_id("mail1").unwrap();
        let mut update = IndexUpdate::new();
        update.moves.push(MoveInstance {
            enc_instance_id: enc_instance_id.clone(),
            new_list_id: "archive".to_string(),
        });
        core.write_index_update(&[], update).await.unwrap();

        let element_data = core.get_element_data(&enc_instance_id).await.unwrap().unwrap();
        assert_eq!(element_data.list_id, "archive");
    }

    #[tokio::test]
    async fn test_delete_then_create_in_one_changeset_reindexes() {
        let (store, core) = setup().await;

        let mut update = IndexUpdate::new();
        stage(&core, "drafts", "draft1", "first version", &mut update);
        core.write_index_update(&[], update).await.unwrap();

        let mut update = IndexUpdate::new();
        core.process_deleted("draft1", &mut update).unwrap();
        stage(&core, "drafts", "draft1", "second", &mut update);
        core.write_index_update(&[], update).await.unwrap();

        assert_eq!(store.count(ObjectStore::ElementData).await.unwrap(), 1);
        assert_eq!(store.count(ObjectStore::SearchIndex).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_store_untouched() {
        let (store, core) = setup().await;

        let mut update = IndexUpdate::new();
        stage(&core, "inbox", "mail1", "subject", &mut update);
        let err = core
            .write_index_update(
                &[GroupTimestamp {
                    group_id: "unknown".to_string(),
                    index_timestamp: 1000,
                }],
                update,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(store.count(ObjectStore::ElementData).await.unwrap(), 0);
        assert_eq!(store.count(ObjectStore::SearchIndex).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_watermark_never_moves_forward() {
        let (_store, core) = setup().await;
        core.init_group_data(&[("group".to_string(), GroupType::Mail)])
            .await
            .unwrap();
        assert_eq!(
            core.get_group_data("group").await.unwrap().unwrap().index_timestamp,
            NOTHING_INDEXED_TIMESTAMP
        );

        for timestamp in [5000, 9000, FULL_INDEXED_TIMESTAMP, 3000] {
            core.write_index_update(
                &[GroupTimestamp {
                    group_id: "group".to_string(),
                    index_timestamp: timestamp,
                }],
                IndexUpdate::new(),
            )
            .await
            .unwrap();
        }

        assert_eq!(
            core.get_group_data("group").await.unwrap().unwrap().index_timestamp,
            FULL_INDEXED_TIMESTAMP
        );
    }

    #[tokio::test]
    async fn test_init_group_data_keeps_existing_watermark() {
        let (_store, core) = setup().await;
        let groups = [("group".to_string(), GroupType::Mail)];
        core.init_group_data(&groups).await.unwrap();
        core.write_index_update(
            &[GroupTimestamp {
                group_id: "group".to_string(),
                index_timestamp: 42,
            }],
            IndexUpdate::new(),
        )
        .await
        .unwrap();

        core.init_group_data(&groups).await.unwrap();
        assert_eq!(
            core.get_group_data("group").await.unwrap().unwrap().index_timestamp,
            42
        );
    }

    #[tokio::test]
    async fn test_stopped_core_refuses_writes() {
        let (_store, core) = setup().await;
        core.stop_processing().await;

        assert!(core.is_stopped_processing());
        assert!(core.queue().is_closed());
        let err = core
            .write_index_update(&[], IndexUpdate::new())
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }

    /// Store for tests that never touch persistence.
    struct NeverStore;

    #[async_trait::async_trait]
    impl IndexStore for NeverStore {
        async fn create_transaction(
            &self,
            _read_only: bool,
            _stores: &[ObjectStore],
        ) -> Result<Box<dyn Transaction>> {
            Err(Error::Closed)
        }

        async fn delete_database(&self, _name: &str) -> Result<()> {
            Err(Error::Closed)
        }

        async fn close(&self) {}

        fn is_closed(&self) -> bool {
            true
        }
    }
}
