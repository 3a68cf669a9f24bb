//! Persistent index records.

use serde::{Deserialize, Serialize};

/// Watermark value of a group that has not indexed anything yet.
///
/// Larger than any real timestamp, so taking the minimum with a concrete
/// timestamp always yields the concrete one.
pub const NOTHING_INDEXED_TIMESTAMP: i64 = (1 << 42) - 1;

/// Watermark value of a group whose mail lists have been fully drained.
pub const FULL_INDEXED_TIMESTAMP: i64 = 0;

/// Keys of the metadata object store.
pub mod metadata {
    /// Whether mail indexing has been enabled for this database.
    pub const MAIL_INDEXING_ENABLED: &str = "mailIndexingEnabled";
    /// List ids excluded from indexing, captured when indexing was enabled.
    pub const EXCLUDED_LIST_IDS: &str = "excludedListIds";
}

/// Kind of group a watermark belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    /// A mailbox group.
    Mail,
    /// A contact list group.
    Contact,
    /// The user's own group.
    User,
}

/// Per-group indexing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupData {
    /// Oldest point in time the group's index currently reaches.
    pub index_timestamp: i64,
    /// Kind of group.
    pub group_type: GroupType,
}

impl GroupData {
    /// Group data for a group nothing has been indexed for yet.
    #[must_use]
    pub const fn new(group_type: GroupType) -> Self {
        Self {
            index_timestamp: NOTHING_INDEXED_TIMESTAMP,
            group_type,
        }
    }
}

/// New watermark to persist for a group when a changeset is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTimestamp {
    /// Group id.
    pub group_id: String,
    /// Watermark reached by the committed changeset.
    pub index_timestamp: i64,
}

/// Bookkeeping stored per indexed instance, keyed by its encrypted id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementData {
    /// List the instance currently lives in.
    pub list_id: String,
    /// Encrypted list of the encrypted words the instance was indexed under.
    pub enc_words: String,
    /// Group owning the instance.
    pub owner_group: String,
}

/// One attribute's occurrence of a token in one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchIndexEntry {
    /// Element id of the indexed instance.
    pub id: String,
    /// Id of the attribute the token was found in.
    pub attribute: u64,
    /// Token positions within the attribute's text.
    pub positions: Vec<u32>,
}

/// Encrypted payload of a [`SearchIndexEntry`].
///
/// The instance id is not part of the payload: it is carried separately,
/// encrypted, by the posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct EntryPayload {
    pub attribute: u64,
    pub positions: Vec<u32>,
}

/// A stored posting: one encrypted entry under one encrypted word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPosting {
    /// Encrypted instance id.
    pub instance: String,
    /// Base64 of the encrypted entry payload.
    pub entry: String,
}
