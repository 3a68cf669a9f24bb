//! # mailsearch-core
//!
//! Mail indexing for `mailsearch`, built on `mailsearch-index`.
//!
//! This crate provides:
//! - The mail entity model and an entity loading facade over a REST source
//! - An in-memory entity source and a per-run ephemeral entity cache
//! - Loading of mails, details and attachments in bounded chunks
//! - The mail indexer: enabling, disabling, backfill in time windows and
//!   reconciliation of live entity events
//! - Progress reporting through a status sink

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod date;
pub mod entity;
mod error;
pub mod indexer;
pub mod loader;
pub mod memory;
pub mod model;
pub mod status;

pub use cache::EphemeralEntityCache;
pub use config::IndexerConfig;
pub use date::{DAY_IN_MILLIS, DateProvider, FixedDateProvider, SystemDateProvider};
pub use entity::{
    Entity, EntityCache, EntityClient, EntityRestClient, Instance, OwnerKeyProvider,
    ReverseRange, TypeRef,
};
pub use error::{Error, Result};
pub use indexer::{
    IndexerContext, IndexerState, MailIndexer, NewMailEntries, get_current_index_timestamp,
    index_database_name,
};
pub use loader::{IndexLoader, MailWithDetails};
pub use memory::{InMemoryEntityClient, InjectedFailure};
pub use status::{
    IndexProgress, IndexingErrorReason, LoggingStatusSink, ProgressMonitor, SearchIndexStateInfo,
    StatusSink,
};
