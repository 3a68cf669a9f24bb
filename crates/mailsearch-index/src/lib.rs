//! # mailsearch-index
//!
//! Encrypted full-text index core for `mailsearch`.
//!
//! This crate provides:
//! - Tokenizing attribute text into index entries
//! - A cipher facade for index keys and entry payloads (AES-256-GCM-SIV)
//! - In-memory changesets of creations, moves and deletions
//! - A transactional key-value store with a `SQLite` backend
//! - Atomic commits of changesets together with per-group watermarks
//! - Token-set search over committed entries

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cipher;
mod index_core;
mod error;
pub mod model;
pub mod queue;
mod search;
pub mod store;
pub mod tokenizer;
pub mod update;

pub use cipher::{AesIndexCipher, IndexCipher};
pub use index_core::{
    AttributeDescriptor, AttributeError, AttributeHandler, IndexStats, IndexerCore, ValueProducer,
};
pub use error::{Error, Result};
pub use model::{
    ElementData, EncryptedPosting, FULL_INDEXED_TIMESTAMP, GroupData, GroupTimestamp, GroupType,
    NOTHING_INDEXED_TIMESTAMP, SearchIndexEntry,
};
pub use queue::EventQueue;
pub use search::SearchHit;
pub use store::{IndexStore, ObjectStore, SqliteIndexStore, Transaction};
pub use update::{CreateOps, DeleteOps, IndexUpdate, MoveInstance};
