//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur while loading entities or indexing mail.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested entity does not exist (anymore).
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Access to the entity has been revoked.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// The entity source could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Indexing was cancelled.
    #[error("Indexing cancelled")]
    Cancelled,

    /// The entity source rejected the request.
    #[error("Request failed: {0}")]
    Rest(String),

    /// Index operation failed.
    #[error("Index error: {0}")]
    Index(#[from] mailsearch_index::Error),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An entity did not have the expected type or shape.
    #[error("Invalid entity: {0}")]
    InvalidEntity(String),
}

impl Error {
    /// Returns true for errors that mean there is nothing to index.
    #[must_use]
    pub const fn is_missing_entity(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NotAuthorized(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
