//! Storage backend adapters
//!
//! The loader drives every backend through the same small surface:
//!
//! 1. [`LoadConnection::begin`] opens a scoped transaction
//! 2. [`StagingScope::create_staging`] creates a session-private staging
//!    relation shaped like the target columns
//! 3. [`StagingScope::bulk_copy`] moves all rows into staging set-wise
//! 4. [`StagingScope::merge`] inserts staging into the target, skipping
//!    conflict-key duplicates when the table has a key
//!
//! Connections come from a [`ConnectionProvider`]; the engine never builds
//! pools itself.

pub mod memory;
pub mod mysql;
pub mod postgres;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Database, Pool};

use crate::error::LoadError;
use crate::types::{Row, TableDescriptor};

/// Open transaction on one connection with a staging relation in scope.
///
/// Dropping a scope without calling [`StagingScope::commit`] must discard
/// everything it did.
#[async_trait]
pub trait StagingScope: Send {
    /// Create the staging relation for `table` and return its name
    async fn create_staging(&mut self, table: &TableDescriptor) -> anyhow::Result<String>;

    /// Bulk-load `rows` into the staging relation; returns rows copied
    async fn bulk_copy(
        &mut self,
        staging: &str,
        table: &TableDescriptor,
        rows: &[Row],
    ) -> anyhow::Result<u64>;

    /// Insert staged rows into the target; returns rows actually inserted
    async fn merge(&mut self, staging: &str, table: &TableDescriptor) -> anyhow::Result<u64>;

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;

    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}

/// A connection exclusively held by one load task
#[async_trait]
pub trait LoadConnection: Send {
    async fn begin<'c>(&'c mut self) -> anyhow::Result<Box<dyn StagingScope + 'c>>;
}

/// Source of connections for the worker pool
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Connection: LoadConnection;

    /// Acquire a connection, waiting at most the provider's bounded timeout
    async fn acquire(&self) -> Result<Self::Connection, LoadError>;

    /// Return a connection after use, on success and failure alike
    async fn release(&self, connection: Self::Connection);

    /// Upper bound on simultaneously open connections, when known
    fn max_connections(&self) -> Option<u32> {
        None
    }
}

/// [`ConnectionProvider`] over an sqlx pool.
///
/// The pool's acquire timeout bounds the wait; running out of it is reported
/// as [`LoadError::ConnectionExhaustion`].
#[derive(Debug, Clone)]
pub struct PoolProvider<DB: Database> {
    pool: Pool<DB>,
}

impl<DB: Database> PoolProvider<DB> {
    pub fn new(pool: Pool<DB>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<DB> {
        &self.pool
    }
}

#[async_trait]
impl<DB> ConnectionProvider for PoolProvider<DB>
where
    DB: Database,
    PoolConnection<DB>: LoadConnection,
{
    type Connection = PoolConnection<DB>;

    async fn acquire(&self) -> Result<PoolConnection<DB>, LoadError> {
        self.pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => LoadError::exhausted(format!(
                "no connection became available within {:?}",
                self.pool.options().get_acquire_timeout()
            )),
            sqlx::Error::PoolClosed => LoadError::exhausted("connection pool is closed"),
            other => LoadError::exhausted(format!("failed to open connection: {}", other)),
        })
    }

    async fn release(&self, connection: PoolConnection<DB>) {
        // Returning the connection to the pool is the release
        drop(connection);
    }

    fn max_connections(&self) -> Option<u32> {
        Some(self.pool.options().get_max_connections())
    }
}

/// Name of the staging relation for `table`
pub fn staging_name(table: &TableDescriptor) -> String {
    format!("salesload_stage_{}", table.name().replace('.', "_"))
}

/// Quote an identifier with `quote`, doubling embedded quote characters
pub(crate) fn quote_ident(name: &str, quote: char) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push(quote);
    for c in name.chars() {
        if c == quote {
            quoted.push(quote);
        }
        quoted.push(c);
    }
    quoted.push(quote);
    quoted
}

/// Quote a possibly schema-qualified table name part by part
pub(crate) fn quote_table(name: &str, quote: char) -> String {
    name.split('.')
        .map(|part| quote_ident(part, quote))
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) fn column_list(table: &TableDescriptor, quote: char) -> String {
    table
        .column_names()
        .map(|c| quote_ident(c, quote))
        .collect::<Vec<_>>()
        .join(", ")
}
