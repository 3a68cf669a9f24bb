//! Transactional key-value storage for the index.
//!
//! The index lives in a handful of named object stores. Every mutation goes
//! through a [`Transaction`]; an uncommitted transaction that is dropped is
//! rolled back, so a changeset is either fully visible or not at all.

mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use sqlite::SqliteIndexStore;

use crate::Result;

/// Named object stores of the index database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectStore {
    /// Encrypted word → encrypted postings.
    SearchIndex,
    /// Encrypted instance id → [`crate::ElementData`].
    ElementData,
    /// Indexing flags and excluded list ids.
    MetaData,
    /// Group id → [`crate::GroupData`].
    GroupData,
}

impl ObjectStore {
    /// All object stores.
    pub const ALL: [Self; 4] = [
        Self::SearchIndex,
        Self::ElementData,
        Self::MetaData,
        Self::GroupData,
    ];

    /// Name used in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SearchIndex => "SearchIndex",
            Self::ElementData => "ElementData",
            Self::MetaData => "MetaData",
            Self::GroupData => "GroupData",
        }
    }
}

impl std::fmt::Display for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A database holding one user's index.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Opens a transaction over the given object stores.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Closed`] once the store has been closed, or a
    /// database error if the transaction cannot be started.
    async fn create_transaction(
        &self,
        read_only: bool,
        stores: &[ObjectStore],
    ) -> Result<Box<dyn Transaction>>;

    /// Erases every object store of the named database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be erased.
    async fn delete_database(&self, name: &str) -> Result<()>;

    /// Closes the store. Later operations fail with [`crate::Error::Closed`].
    async fn close(&self);

    /// Returns true once [`IndexStore::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// A transaction over a set of object stores.
#[async_trait]
pub trait Transaction: Send {
    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not part of the transaction or the
    /// read fails.
    async fn get(&mut self, store: ObjectStore, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is read-only, the store is not part
    /// of the transaction, or the write fails.
    async fn put(&mut self, store: ObjectStore, key: &str, value: &[u8]) -> Result<()>;

    /// Removes a value if present.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Transaction::put`].
    async fn delete(&mut self, store: ObjectStore, key: &str) -> Result<()>;

    /// Commits all writes of the transaction at once.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is written in that case.
    async fn commit(self: Box<Self>) -> Result<()>;
}

impl dyn Transaction + '_ {
    /// Reads and deserializes a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the value is not valid JSON for `T`.
    pub async fn get_json<T: DeserializeOwned>(
        &mut self,
        store: ObjectStore,
        key: &str,
    ) -> Result<Option<T>> {
        match self.get(store, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serializes and writes a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn put_json<T: Serialize + Sync>(
        &mut self,
        store: ObjectStore,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(store, key, &bytes).await
    }
}
