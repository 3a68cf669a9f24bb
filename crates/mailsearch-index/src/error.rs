//! Error types for the index core.

use thiserror::Error;

use crate::store::ObjectStore;

/// Errors that can occur while building, encrypting or committing index data.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Stored value was not valid base64.
    #[error("Encoding error: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Encryption or decryption failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// The store has been closed and no longer accepts operations.
    #[error("Index store is closed")]
    Closed,

    /// Attempted to write through a read-only transaction.
    #[error("Transaction is read-only, cannot write to {0}")]
    ReadOnly(ObjectStore),

    /// Attempted to access an object store the transaction was not opened for.
    #[error("Object store {0} is not part of this transaction")]
    StoreNotInTransaction(ObjectStore),

    /// The persisted index is not in the state the operation requires.
    #[error("Invalid database state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Returns true if the error means the store was shut down underneath us.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::Database(sqlx::Error::PoolClosed))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
