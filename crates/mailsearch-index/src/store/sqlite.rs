//! SQLite index store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{Sqlite, SqlitePool, SqlitePoolOptions};
use tracing::{debug, warn};

use super::{IndexStore, ObjectStore, Transaction};
use crate::{Error, Result};

/// Index store backed by a single SQLite table.
pub struct SqliteIndexStore {
    pool: SqlitePool,
    name: String,
    closed: AtomicBool,
}

impl SqliteIndexStore {
    /// Opens (or creates) the index database at the given path.
    ///
    /// `name` identifies the database for [`IndexStore::delete_database`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str, name: impl Into<String>) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        // SQLite has a single writer; one connection keeps transactions
        // strictly serialized instead of failing with SQLITE_BUSY.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await?;

        let store = Self {
            pool,
            name: name.into(),
            closed: AtomicBool::new(false),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory(name: impl Into<String>) -> Result<Self> {
        // The in-memory database lives exactly as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self {
            pool,
            name: name.into(),
            closed: AtomicBool::new(false),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS index_store (
                store TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (store, key)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Name of the database.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of values held by an object store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count(&self, store: ObjectStore) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let row = sqlx::query(r"SELECT COUNT(*) as count FROM index_store WHERE store = ?")
            .bind(store.as_str())
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.get("count");
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn create_transaction(
        &self,
        read_only: bool,
        stores: &[ObjectStore],
    ) -> Result<Box<dyn Transaction>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let tx = self.pool.begin().await.map_err(|e| match e {
            sqlx::Error::PoolClosed => Error::Closed,
            other => Error::Database(other),
        })?;

        Ok(Box::new(SqliteTransaction {
            tx,
            read_only,
            stores: stores.to_vec(),
        }))
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        if name != self.name {
            warn!(name, current = %self.name, "Refusing to delete a database this store does not hold");
            return Ok(());
        }
        if self.is_closed() {
            return Err(Error::Closed);
        }

        sqlx::query(r"DELETE FROM index_store")
            .execute(&self.pool)
            .await?;

        debug!(name, "Deleted index database");
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pool.close().await;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
    read_only: bool,
    stores: Vec<ObjectStore>,
}

impl SqliteTransaction {
    fn check(&self, store: ObjectStore, write: bool) -> Result<()> {
        if !self.stores.contains(&store) {
            return Err(Error::StoreNotInTransaction(store));
        }
        if write && self.read_only {
            return Err(Error::ReadOnly(store));
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn get(&mut self, store: ObjectStore, key: &str) -> Result<Option<Vec<u8>>> {
        self.check(store, false)?;
        let row = sqlx::query(r"SELECT value FROM index_store WHERE store = ? AND key = ?")
            .bind(store.as_str())
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(|row| row.get::<Vec<u8>, _>("value")))
    }

    async fn put(&mut self, store: ObjectStore, key: &str, value: &[u8]) -> Result<()> {
        self.check(store, true)?;
        sqlx::query(
            r"
            INSERT INTO index_store (store, key, value)
            VALUES (?, ?, ?)
            ON CONFLICT(store, key) DO UPDATE SET value = excluded.value
            ",
        )
        .bind(store.as_str())
        .bind(key)
        .bind(value)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete(&mut self, store: ObjectStore, key: &str) -> Result<()> {
        self.check(store, true)?;
        sqlx::query(r"DELETE FROM index_store WHERE store = ? AND key = ?")
            .bind(store.as_str())
            .bind(key)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
