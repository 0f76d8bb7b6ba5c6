//! In-memory backend
//!
//! Backs `--dry-run` and the pipeline tests. Tables live in a shared
//! [`MemoryDatabase`]; every connection handed out by a [`MemoryPool`] sees
//! the same tables but keeps its staging private. Rows inserted by an open
//! transaction are tagged with its id: other transactions already treat them
//! as conflicts, commit clears the tag and rollback removes them.
//!
//! Nothing here waits on a lock. A key held by a transaction that later
//! rolls back stays skipped by whoever merged it concurrently, where
//! PostgreSQL would block and then insert. Dry-run counts can therefore be
//! lower than a real run when a task fails mid-stage.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{staging_name, ConnectionProvider, LoadConnection, StagingScope};
use crate::error::LoadError;
use crate::types::{Row, TableDescriptor, Value};

pub type TxnId = u64;

/// Point in the load path where an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    CreateStaging,
    BulkCopy,
    Merge,
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Begin,
    CreateStaging,
    BulkCopy { rows: usize },
    Merge { inserted: u64 },
    Commit,
    Rollback,
}

/// One entry of the operation log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedOperation {
    pub txn: TxnId,
    /// Target table, once the transaction has created its staging relation
    pub table: Option<String>,
    pub operation: Operation,
}

#[derive(Debug)]
struct StoredRow {
    row: Row,
    txn: Option<TxnId>,
}

#[derive(Debug)]
struct MemoryTable {
    descriptor: TableDescriptor,
    rows: Vec<StoredRow>,
}

impl MemoryTable {
    fn key_of<'r>(&self, row: &'r Row) -> Option<Vec<&'r Value>> {
        let key = self.descriptor.conflict_key()?;
        Some(
            key.iter()
                .filter_map(|k| self.descriptor.column_names().position(|c| c == k))
                .map(|i| &row.values()[i])
                .collect(),
        )
    }
}

#[derive(Debug, Default)]
struct DatabaseState {
    tables: HashMap<String, MemoryTable>,
    failures: HashMap<String, FailurePoint>,
    log: Vec<LoggedOperation>,
}

/// Shared table store
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Mutex<DatabaseState>,
    next_txn: AtomicU64,
}

impl MemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, DatabaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty target table; an existing table of the same name is kept
    pub fn create_table(&self, descriptor: TableDescriptor) {
        self.state()
            .tables
            .entry(descriptor.name().to_string())
            .or_insert_with(|| MemoryTable {
                descriptor,
                rows: Vec::new(),
            });
    }

    /// Make every load into `table` fail at `point`
    pub fn fail_on(&self, table: &str, point: FailurePoint) {
        self.state().failures.insert(table.to_string(), point);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Committed rows of `table` in insertion order
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state()
            .tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|r| r.txn.is_none())
                    .map(|r| r.row.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    pub fn operations(&self) -> Vec<LoggedOperation> {
        self.state().log.clone()
    }

    pub fn clear_operations(&self) {
        self.state().log.clear();
    }

    fn begin(&self) -> TxnId {
        let txn = self.next_txn.fetch_add(1, Ordering::Relaxed) + 1;
        self.record(txn, None, Operation::Begin);
        txn
    }

    fn record(&self, txn: TxnId, table: Option<&str>, operation: Operation) {
        self.state().log.push(LoggedOperation {
            txn,
            table: table.map(str::to_string),
            operation,
        });
    }

    fn check_failure(&self, table: &str, point: FailurePoint) -> Result<()> {
        if self.state().failures.get(table) == Some(&point) {
            bail!("injected {:?} failure on {}", point, table);
        }
        Ok(())
    }

    fn has_table(&self, table: &str) -> bool {
        self.state().tables.contains_key(table)
    }

    /// Insert staged rows under `txn`, skipping keys already present
    fn merge(&self, txn: TxnId, table: &str, staged: &[Row]) -> Result<u64> {
        let mut state = self.state();
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("relation \"{}\" does not exist", table))?;

        let mut inserted = 0u64;
        match target.descriptor.conflict_key() {
            None => {
                for row in staged {
                    target.rows.push(StoredRow {
                        row: row.clone(),
                        txn: Some(txn),
                    });
                    inserted += 1;
                }
            }
            Some(_) => {
                let mut existing: HashSet<Vec<Value>> = target
                    .rows
                    .iter()
                    .filter_map(|r| target.key_of(&r.row))
                    .map(|k| k.into_iter().cloned().collect())
                    .collect();

                let mut fresh = Vec::new();
                for row in staged {
                    let Some(key) = target.key_of(row) else {
                        continue;
                    };
                    if existing.insert(key.into_iter().cloned().collect()) {
                        fresh.push(row.clone());
                    }
                }

                inserted = fresh.len() as u64;
                target.rows.extend(fresh.into_iter().map(|row| StoredRow {
                    row,
                    txn: Some(txn),
                }));
            }
        }

        Ok(inserted)
    }

    fn finish(&self, txn: TxnId, commit: bool) {
        let mut state = self.state();
        for table in state.tables.values_mut() {
            if commit {
                for row in table.rows.iter_mut().filter(|r| r.txn == Some(txn)) {
                    row.txn = None;
                }
            } else {
                table.rows.retain(|r| r.txn != Some(txn));
            }
        }
    }
}

#[derive(Debug, Default)]
struct PoolStats {
    in_use: AtomicUsize,
    peak: AtomicUsize,
    acquired: AtomicUsize,
}

/// Bounded connection provider over a [`MemoryDatabase`]
#[derive(Debug, Clone)]
pub struct MemoryPool {
    db: Arc<MemoryDatabase>,
    semaphore: Arc<Semaphore>,
    max_connections: u32,
    acquire_timeout: Duration,
    latency: Option<Duration>,
    stats: Arc<PoolStats>,
}

impl MemoryPool {
    pub fn new(db: Arc<MemoryDatabase>, max_connections: u32, acquire_timeout: Duration) -> Self {
        Self {
            db,
            semaphore: Arc::new(Semaphore::new(max_connections as usize)),
            max_connections,
            acquire_timeout,
            latency: None,
            stats: Arc::new(PoolStats::default()),
        }
    }

    /// Delay every bulk copy by `latency`, so tasks overlap
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.db
    }

    pub fn in_use(&self) -> usize {
        self.stats.in_use.load(Ordering::SeqCst)
    }

    /// Most connections ever held at the same time
    pub fn peak_in_use(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// Total successful acquisitions
    pub fn acquired(&self) -> usize {
        self.stats.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for MemoryPool {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> Result<MemoryConnection, LoadError> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| {
                LoadError::exhausted(format!(
                    "no connection became available within {:?}",
                    self.acquire_timeout
                ))
            })?
            .map_err(|_| LoadError::exhausted("connection pool is closed"))?;

        let now = self.stats.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now, Ordering::SeqCst);
        self.stats.acquired.fetch_add(1, Ordering::SeqCst);

        Ok(MemoryConnection {
            db: self.db.clone(),
            latency: self.latency,
            stats: self.stats.clone(),
            _permit: permit,
        })
    }

    async fn release(&self, connection: MemoryConnection) {
        drop(connection);
    }

    fn max_connections(&self) -> Option<u32> {
        Some(self.max_connections)
    }
}

/// Connection checked out of a [`MemoryPool`]; dropping it returns the slot
#[derive(Debug)]
pub struct MemoryConnection {
    db: Arc<MemoryDatabase>,
    latency: Option<Duration>,
    stats: Arc<PoolStats>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.stats.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LoadConnection for MemoryConnection {
    async fn begin<'c>(&'c mut self) -> Result<Box<dyn StagingScope + 'c>> {
        let txn = self.db.begin();
        Ok(Box::new(MemoryScope {
            conn: self,
            txn,
            table: None,
            staging: HashMap::new(),
            finished: false,
        }))
    }
}

pub struct MemoryScope<'c> {
    conn: &'c mut MemoryConnection,
    txn: TxnId,
    table: Option<String>,
    staging: HashMap<String, Vec<Row>>,
    finished: bool,
}

impl MemoryScope<'_> {
    fn db(&self) -> &MemoryDatabase {
        &self.conn.db
    }

    fn record(&self, operation: Operation) {
        self.db().record(self.txn, self.table.as_deref(), operation);
    }

    fn end(&mut self, commit: bool) {
        self.finished = true;
        self.db().finish(self.txn, commit);
        self.record(if commit { Operation::Commit } else { Operation::Rollback });
    }
}

impl Drop for MemoryScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.end(false);
        }
    }
}

#[async_trait]
impl StagingScope for MemoryScope<'_> {
    async fn create_staging(&mut self, table: &TableDescriptor) -> Result<String> {
        self.table = Some(table.name().to_string());
        self.db().check_failure(table.name(), FailurePoint::CreateStaging)?;
        if !self.db().has_table(table.name()) {
            bail!("relation \"{}\" does not exist", table.name());
        }

        let staging = staging_name(table);
        self.staging.insert(staging.clone(), Vec::new());
        self.record(Operation::CreateStaging);
        Ok(staging)
    }

    async fn bulk_copy(&mut self, staging: &str, table: &TableDescriptor, rows: &[Row]) -> Result<u64> {
        if let Some(latency) = self.conn.latency {
            tokio::time::sleep(latency).await;
        }
        self.db().check_failure(table.name(), FailurePoint::BulkCopy)?;

        self.staging
            .get_mut(staging)
            .ok_or_else(|| anyhow!("staging relation \"{}\" does not exist", staging))?
            .extend(rows.iter().cloned());

        self.record(Operation::BulkCopy { rows: rows.len() });
        Ok(rows.len() as u64)
    }

    async fn merge(&mut self, staging: &str, table: &TableDescriptor) -> Result<u64> {
        self.db().check_failure(table.name(), FailurePoint::Merge)?;

        let staged = self
            .staging
            .get(staging)
            .ok_or_else(|| anyhow!("staging relation \"{}\" does not exist", staging))?;
        let inserted = self.db().merge(self.txn, table.name(), staged)?;

        self.record(Operation::Merge { inserted });
        Ok(inserted)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if let Some(table) = self.table.clone() {
            self.db().check_failure(&table, FailurePoint::Commit)?;
        }
        self.end(true);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.end(false);
        Ok(())
    }
}
