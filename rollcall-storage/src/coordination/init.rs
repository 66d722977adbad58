//! One-time table setup, safe under concurrency and quota outages.
//!
//! Seeding a table that already holds data would duplicate or clobber live
//! rows, so every inconclusive verification resolves to "defer" rather than
//! "create". Concurrent callers for the same table share a single in-flight
//! verification and all observe its result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rollcall_core::{HeaderMap, RawRow, Record, StoreError, StoreResult, TableName};
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::cache::Evict;
use crate::remote::{RemoteOp, RemoteStore};
use crate::retry::RetryExecutor;

type Slot = Arc<OnceCell<StoreResult<bool>>>;

struct InitInner {
    remote: Arc<dyn RemoteStore>,
    retry: RetryExecutor,
    ttl: Duration,
    known: Mutex<HashMap<TableName, Instant>>,
    in_flight: Mutex<HashMap<TableName, Slot>>,
    verifications: AtomicU64,
    seed_runs: AtomicU64,
    deferred: AtomicU64,
}

impl InitInner {
    fn known(&self) -> MutexGuard<'_, HashMap<TableName, Instant>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<TableName, Slot>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_known(&self, table: &TableName) -> bool {
        let mut known = self.known();
        match known.get(table) {
            Some(at) if at.elapsed() < self.ttl => true,
            Some(_) => {
                known.remove(table);
                false
            }
            None => false,
        }
    }

    fn mark_known(&self, table: &TableName) {
        self.known().insert(table.clone(), Instant::now());
    }
}

/// Removes a finished slot from the in-flight map when its holder leaves.
struct SlotRelease<'a> {
    inner: &'a InitInner,
    table: &'a TableName,
    slot: Slot,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        // An unfinished slot stays: a waiter will pick up the initialization.
        if !self.slot.initialized() {
            return;
        }
        let mut slots = self.inner.slots();
        if slots
            .get(self.table)
            .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
        {
            slots.remove(self.table);
        }
    }
}

/// Ensures each table is verified or seeded at most once at a time.
#[derive(Clone)]
pub struct InitializationCoordinator {
    inner: Arc<InitInner>,
}

impl std::fmt::Debug for InitializationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationCoordinator")
            .field("ttl", &self.inner.ttl)
            .field("known", &self.inner.known().len())
            .finish_non_exhaustive()
    }
}

impl InitializationCoordinator {
    pub fn new(remote: Arc<dyn RemoteStore>, retry: RetryExecutor, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(InitInner {
                remote,
                retry,
                ttl,
                known: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                verifications: AtomicU64::new(0),
                seed_runs: AtomicU64::new(0),
                deferred: AtomicU64::new(0),
            }),
        }
    }

    /// Make sure `table` exists with a header, running `seed` if it does not.
    ///
    /// Returns `Ok(false)` when the table's state could not be verified
    /// because of quota pressure; `seed` is not run in that case and the
    /// caller should retry later.
    pub async fn ensure_initialized<F, Fut>(&self, table: &TableName, seed: F) -> StoreResult<bool>
    where
        F: FnOnce(TableSeeder) -> Fut + Send,
        Fut: Future<Output = StoreResult<()>> + Send,
    {
        if self.inner.is_known(table) {
            return Ok(true);
        }

        let slot = Arc::clone(self.inner.slots().entry(table.clone()).or_default());
        let _release = SlotRelease {
            inner: &self.inner,
            table,
            slot: Arc::clone(&slot),
        };

        slot.get_or_init(|| self.initialize(table, seed))
            .await
            .clone()
    }

    async fn initialize<F, Fut>(&self, table: &TableName, seed: F) -> StoreResult<bool>
    where
        F: FnOnce(TableSeeder) -> Fut + Send,
        Fut: Future<Output = StoreResult<()>> + Send,
    {
        // A previous slot may have finished between our check and our claim.
        if self.inner.is_known(table) {
            return Ok(true);
        }
        self.inner.verifications.fetch_add(1, Ordering::Relaxed);

        let remote = &*self.inner.remote;
        let retry = &self.inner.retry;

        let header = retry
            .execute(&RemoteOp::LoadHeader.on(table), move || remote.load_header(table))
            .await;

        let exists = match header {
            Ok(Some(columns)) if columns.iter().any(|c| !c.trim().is_empty()) => {
                self.inner.mark_known(table);
                tracing::debug!(table = %table, "Table already initialized");
                return Ok(true);
            }
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(err) if err.is_quota() => {
                tracing::warn!(table = %table, error = %err, "Header check hit quota, probing for data");
                let probe = retry
                    .execute(&RemoteOp::HasData.on(table), move || remote.has_data(table))
                    .await;
                match probe {
                    Ok(true) => {
                        self.inner.mark_known(table);
                        tracing::info!(table = %table, "Table holds data, treating as initialized");
                        return Ok(true);
                    }
                    Ok(false) => true,
                    Err(StoreError::Remote { ref source, .. }) if source.is_not_found() => false,
                    Err(err) if err.is_quota() => {
                        self.inner.deferred.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            table = %table,
                            error = %err,
                            "Table state unknown under quota pressure, deferring initialization"
                        );
                        return Ok(false);
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };

        self.inner.seed_runs.fetch_add(1, Ordering::Relaxed);
        tracing::info!(table = %table, exists, "Seeding table");
        let seeder = TableSeeder {
            table: table.clone(),
            remote: Arc::clone(&self.inner.remote),
            retry: self.inner.retry.clone(),
            exists,
            header: None,
        };
        seed(seeder).await?;

        self.inner.mark_known(table);
        tracing::info!(table = %table, "Table initialized");
        Ok(true)
    }

    /// Whether `table` is known-initialized within the TTL.
    pub fn is_known(&self, table: &TableName) -> bool {
        self.inner.is_known(table)
    }

    /// Forget `table`; the next call re-verifies against the remote store.
    pub fn forget(&self, table: &TableName) -> bool {
        self.inner.known().remove(table).is_some()
    }

    /// Whether an initialization of `table` is currently in flight.
    pub fn in_progress(&self, table: &TableName) -> bool {
        self.inner
            .slots()
            .get(table)
            .is_some_and(|slot| !slot.initialized())
    }

    /// Remote verifications started.
    pub fn verifications(&self) -> u64 {
        self.inner.verifications.load(Ordering::Relaxed)
    }

    /// Seed functions run.
    pub fn seed_runs(&self) -> u64 {
        self.inner.seed_runs.load(Ordering::Relaxed)
    }

    /// Initializations deferred because the table state was unknowable.
    pub fn deferred(&self) -> u64 {
        self.inner.deferred.load(Ordering::Relaxed)
    }
}

impl Evict for InitializationCoordinator {
    fn evict(&self, table: &TableName) -> bool {
        self.forget(table)
    }

    fn evict_all(&self) -> usize {
        let mut known = self.inner.known();
        let count = known.len();
        known.clear();
        count
    }
}

/// Remote access handed to a seed function.
///
/// Every call goes through the retry executor.
pub struct TableSeeder {
    table: TableName,
    remote: Arc<dyn RemoteStore>,
    retry: RetryExecutor,
    exists: bool,
    header: Option<HeaderMap>,
}

impl std::fmt::Debug for TableSeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSeeder")
            .field("table", &self.table)
            .field("exists", &self.exists)
            .finish_non_exhaustive()
    }
}

impl TableSeeder {
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Whether the table existed (without a header) when seeding began.
    pub fn table_exists(&self) -> bool {
        self.exists
    }

    /// Create the table unless it already exists.
    pub async fn create_table(&mut self) -> StoreResult<()> {
        if self.exists {
            return Ok(());
        }
        let remote = &*self.remote;
        let table = &self.table;
        self.retry
            .execute(&RemoteOp::CreateTable.on(table), move || remote.create_table(table))
            .await?;
        self.exists = true;
        Ok(())
    }

    /// Write `R::HEADERS` as the header row.
    pub async fn write_header<R: Record>(&mut self) -> StoreResult<()> {
        self.write_columns(R::HEADERS).await
    }

    /// Write an arbitrary header row, creating the table first if needed.
    pub async fn write_columns(&mut self, columns: &[&str]) -> StoreResult<()> {
        self.create_table().await?;
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let remote = &*self.remote;
        let table = &self.table;
        let cells = &columns;
        self.retry
            .execute(&RemoteOp::SetHeader.on(table), move || remote.set_header(table, cells))
            .await?;
        self.header = Some(HeaderMap::new(self.table.clone(), columns));
        Ok(())
    }

    /// Append one seed row.
    pub async fn append<R: Record>(&mut self, record: &R) -> StoreResult<RawRow> {
        let cells = match &self.header {
            Some(header) => header.encode_new(record),
            None => record.encode(),
        };
        let remote = &*self.remote;
        let table = &self.table;
        self.retry
            .execute(&RemoteOp::AppendRow.on(table), move || {
                remote.append_row(table, cells.clone())
            })
            .await
    }

    /// Append seed rows in order. Returns how many were written.
    pub async fn append_all<R, I>(&mut self, records: I) -> StoreResult<usize>
    where
        R: Record,
        I: IntoIterator<Item = R>,
        I::IntoIter: Send,
    {
        let mut written = 0;
        for record in records {
            self.append(&record).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Reshape the table grid.
    pub async fn resize(&mut self, rows: usize, columns: usize) -> StoreResult<()> {
        let remote = &*self.remote;
        let table = &self.table;
        self.retry
            .execute(&RemoteOp::Resize.on(table), move || {
                remote.resize(table, rows, columns)
            })
            .await
    }
}

/// Seed that creates the table and writes `R::HEADERS`, nothing else.
pub async fn header_only<R: Record>(mut seeder: TableSeeder) -> StoreResult<()> {
    seeder.write_header::<R>().await
}
