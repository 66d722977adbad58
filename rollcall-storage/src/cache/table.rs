//! Per-table row cache with a lazily built key index.
//!
//! A cached table is an immutable [`TableSnapshot`]: the decoded rows, the
//! header they were decoded through and the instant the load started. The
//! key index lives inside the snapshot, so whatever drops a snapshot drops
//! its index with it and the two can never disagree.
//!
//! Rows themselves are shared handles. Two lookups of the same row within
//! one snapshot return the same `Arc`, and the write path updates that
//! handle in place after a successful save so the writer reads its own
//! write until the next invalidation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use rollcall_core::{HeaderMap, RawRow, Record, StoreResult, TableName};
use tokio::time::Instant;

use super::freshness::{CacheRead, Freshness};
use super::stats::{CacheCounters, CacheStats, Evict};
use crate::remote::{RemoteOp, RemoteStore, RowQuery};
use crate::retry::RetryExecutor;

/// Shared handle to a cached row.
pub type Row<R> = Arc<CachedRow<R>>;

#[derive(Debug)]
struct RowState<R> {
    record: R,
    raw: RawRow,
}

/// A decoded row plus the raw cells it came from.
///
/// The raw cells are kept so a save can write back columns the record type
/// does not know about.
#[derive(Debug)]
pub struct CachedRow<R> {
    row_number: usize,
    state: RwLock<RowState<R>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl<R: Record> CachedRow<R> {
    pub(crate) fn new(record: R, raw: RawRow) -> Self {
        Self {
            row_number: raw.row_number,
            state: RwLock::new(RowState { record, raw }),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 1-based row number in the remote table.
    pub fn row_number(&self) -> usize {
        self.row_number
    }

    /// A copy of the current record.
    pub fn record(&self) -> R {
        self.read(R::clone)
    }

    pub fn key(&self) -> String {
        self.read(|record| record.key().to_string())
    }

    /// Borrow the current record for the duration of `f`.
    pub fn read<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state.record)
    }

    pub(crate) fn raw(&self) -> RawRow {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .raw
            .clone()
    }

    pub(crate) fn replace(&self, record: R, raw: RawRow) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.record = record;
        state.raw = raw;
    }

    /// Serializes writers of this row across the save round trip.
    pub(crate) async fn lock_for_write(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }
}

/// One load of one table.
#[derive(Debug)]
struct TableSnapshot<R> {
    header: Option<Arc<HeaderMap>>,
    rows: Vec<Row<R>>,
    loaded_at: Instant,
    index: OnceLock<HashMap<String, Row<R>>>,
}

impl<R: Record> TableSnapshot<R> {
    fn index(&self, table: &TableName, counters: &CacheCounters) -> &HashMap<String, Row<R>> {
        self.index.get_or_init(|| {
            CacheCounters::bump(&counters.index_builds);
            let mut index: HashMap<String, Row<R>> = HashMap::with_capacity(self.rows.len());
            for row in &self.rows {
                let key = row.key();
                if let Some(first) = index.get(&key) {
                    tracing::warn!(
                        table = %table,
                        key = %key,
                        kept_row = first.row_number(),
                        ignored_row = row.row_number(),
                        "Duplicate key in table, keeping the first row"
                    );
                    continue;
                }
                index.insert(key, Arc::clone(row));
            }
            tracing::debug!(table = %table, keys = index.len(), "Built key index");
            index
        })
    }

    fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }
}

#[derive(Debug)]
struct CacheState<R> {
    entries: HashMap<TableName, Arc<TableSnapshot<R>>>,
    /// Bumped by every clear of a table; a load only lands if its table's
    /// generation did not move while it was in flight.
    generations: HashMap<TableName, u64>,
    epoch: u64,
}

impl<R> CacheState<R> {
    fn generation(&self, table: &TableName) -> (u64, u64) {
        (self.epoch, self.generations.get(table).copied().unwrap_or(0))
    }
}

struct Inner<R> {
    name: &'static str,
    remote: Arc<dyn RemoteStore>,
    retry: RetryExecutor,
    ttl: Duration,
    state: Mutex<CacheState<R>>,
    gates: Mutex<HashMap<TableName, Arc<tokio::sync::Mutex<()>>>>,
    counters: CacheCounters,
}

/// Read-through cache of decoded tables keyed by table name.
///
/// Clones share the same entries.
pub struct TableCache<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for TableCache<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> std::fmt::Debug for TableCache<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCache")
            .field("name", &self.inner.name)
            .field("ttl", &self.inner.ttl)
            .finish_non_exhaustive()
    }
}

impl<R: Record> TableCache<R> {
    pub fn new(remote: Arc<dyn RemoteStore>, retry: RetryExecutor, ttl: Duration) -> Self {
        Self::named("table", remote, retry, ttl)
    }

    pub(crate) fn named(
        name: &'static str,
        remote: Arc<dyn RemoteStore>,
        retry: RetryExecutor,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                remote,
                retry,
                ttl,
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    generations: HashMap::new(),
                    epoch: 0,
                }),
                gates: Mutex::new(HashMap::new()),
                counters: CacheCounters::default(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// All rows of `table`, from cache while the entry is younger than the TTL.
    pub async fn get_rows(&self, table: &TableName) -> StoreResult<Vec<Row<R>>> {
        let read = self
            .read_rows(table, Freshness::best_effort(self.inner.ttl))
            .await?;
        Ok(read.into_value())
    }

    /// All rows of `table` under an explicit freshness requirement.
    pub async fn read_rows(
        &self,
        table: &TableName,
        freshness: Freshness,
    ) -> StoreResult<CacheRead<Vec<Row<R>>>> {
        let (snapshot, hit) = self.snapshot(table, freshness).await?;
        let rows = snapshot.rows.clone();
        Ok(if hit {
            CacheRead::from_cache(rows, snapshot.loaded_at)
        } else {
            CacheRead::from_remote(rows, snapshot.loaded_at)
        })
    }

    /// The row whose key equals `key`, if any.
    ///
    /// A valid entry answers from its index without a remote call, including
    /// when the key is absent.
    pub async fn get_indexed_row(&self, table: &TableName, key: &str) -> StoreResult<Option<Row<R>>> {
        Ok(self.locate(table, key).await?.map(|(row, _)| row))
    }

    /// Like [`get_indexed_row`](Self::get_indexed_row), also returning the
    /// header the row was decoded through.
    pub(crate) async fn locate(
        &self,
        table: &TableName,
        key: &str,
    ) -> StoreResult<Option<(Row<R>, Arc<HeaderMap>)>> {
        let (snapshot, _) = self
            .snapshot(table, Freshness::best_effort(self.inner.ttl))
            .await?;
        let Some(header) = snapshot.header.clone() else {
            return Ok(None);
        };
        let row = snapshot
            .index(table, &self.inner.counters)
            .get(key)
            .cloned();
        Ok(row.map(|row| (row, header)))
    }

    /// Header of `table` as last loaded; `None` for a missing or headerless
    /// table.
    pub async fn header(&self, table: &TableName) -> StoreResult<Option<Arc<HeaderMap>>> {
        let (snapshot, _) = self
            .snapshot(table, Freshness::best_effort(self.inner.ttl))
            .await?;
        Ok(snapshot.header.clone())
    }

    /// Whether `table` has an entry that is still within the TTL.
    pub fn is_cached(&self, table: &TableName) -> bool {
        self.fresh_entry(table, self.inner.ttl).is_some()
    }

    /// Tables with a live entry, sorted.
    pub fn cached_tables(&self) -> Vec<TableName> {
        let state = self.lock_state();
        let mut tables: Vec<TableName> = state
            .entries
            .iter()
            .filter(|(_, snapshot)| snapshot.age() < self.inner.ttl)
            .map(|(table, _)| table.clone())
            .collect();
        tables.sort();
        tables
    }

    /// Drop the entry (and its index) for `table`. Returns whether one existed.
    pub fn clear(&self, table: &TableName) -> bool {
        let removed = {
            let mut state = self.lock_state();
            *state.generations.entry(table.clone()).or_insert(0) += 1;
            state.entries.remove(table).is_some()
        };
        if removed {
            CacheCounters::bump(&self.inner.counters.evictions);
            tracing::debug!(cache = self.inner.name, table = %table, "Cleared table entry");
        }
        removed
    }

    /// Drop every entry. Returns how many were dropped.
    pub fn clear_all(&self) -> usize {
        let removed = {
            let mut state = self.lock_state();
            state.epoch += 1;
            state.generations.clear();
            let removed = state.entries.len();
            state.entries.clear();
            removed
        };
        for _ in 0..removed {
            CacheCounters::bump(&self.inner.counters.evictions);
        }
        if removed > 0 {
            tracing::debug!(cache = self.inner.name, entries = removed, "Cleared all table entries");
        }
        removed
    }

    /// Add a row just appended remotely to the cached snapshot of `table`.
    ///
    /// The existing row handles carry over into the new snapshot. A load
    /// still in flight started before the append and is not cached. With no
    /// cached entry only that load is fenced off.
    pub(crate) fn insert_appended(&self, table: &TableName, record: R, raw: RawRow) -> Row<R> {
        let row = Arc::new(CachedRow::new(record, raw));
        let mut state = self.lock_state();
        *state.generations.entry(table.clone()).or_insert(0) += 1;
        let Some(current) = state.entries.get(table).cloned() else {
            return row;
        };

        let mut rows = current.rows.clone();
        rows.push(Arc::clone(&row));
        state.entries.insert(
            table.clone(),
            Arc::new(TableSnapshot {
                header: current.header.clone(),
                rows,
                loaded_at: current.loaded_at,
                index: OnceLock::new(),
            }),
        );
        drop(state);
        tracing::debug!(
            cache = self.inner.name,
            table = %table,
            row = row.row_number(),
            "Added appended row to cached table"
        );
        row
    }

    pub fn stats(&self) -> CacheStats {
        let entry_count = self.lock_state().entries.len() as u64;
        self.inner.counters.snapshot(entry_count)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CacheState<R>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fresh_entry(&self, table: &TableName, window: Duration) -> Option<Arc<TableSnapshot<R>>> {
        let state = self.lock_state();
        state
            .entries
            .get(table)
            .filter(|snapshot| snapshot.age() < window)
            .cloned()
    }

    fn gate(&self, table: &TableName) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.inner.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(table.clone()).or_default())
    }

    fn release_gate(&self, table: &TableName, gate: Arc<tokio::sync::Mutex<()>>) {
        drop(gate);
        let mut gates = self.inner.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if gates.get(table).is_some_and(|g| Arc::strong_count(g) == 1) {
            gates.remove(table);
        }
    }

    /// Serve a snapshot of `table`, loading it when nothing acceptable is
    /// cached. Concurrent loads of one table are coalesced behind a gate.
    async fn snapshot(
        &self,
        table: &TableName,
        freshness: Freshness,
    ) -> StoreResult<(Arc<TableSnapshot<R>>, bool)> {
        let window = freshness.window(self.inner.ttl);
        if let Some(window) = window {
            if let Some(snapshot) = self.fresh_entry(table, window) {
                CacheCounters::bump(&self.inner.counters.hits);
                tracing::debug!(cache = self.inner.name, table = %table, "Cache hit");
                return Ok((snapshot, true));
            }
        }

        let requested_at = Instant::now();
        let prior = self.lock_state().entries.get(table).cloned();
        let gate = self.gate(table);
        let result = {
            let _permit = gate.lock().await;

            // Someone else may have loaded while we waited.
            let landed = {
                let state = self.lock_state();
                state.entries.get(table).cloned().filter(|snapshot| match window {
                    Some(window) => snapshot.age() < window,
                    // A consistent read only reuses a load that started
                    // after it was requested.
                    None => {
                        snapshot.loaded_at >= requested_at
                            && !prior.as_ref().is_some_and(|p| Arc::ptr_eq(p, snapshot))
                    }
                })
            };

            match landed {
                Some(snapshot) => {
                    CacheCounters::bump(&self.inner.counters.hits);
                    tracing::debug!(cache = self.inner.name, table = %table, "Cache hit after coalesced load");
                    Ok((snapshot, true))
                }
                None => self.load(table).await.map(|snapshot| (snapshot, false)),
            }
        };
        self.release_gate(table, gate);
        result
    }

    async fn load(&self, table: &TableName) -> StoreResult<Arc<TableSnapshot<R>>> {
        CacheCounters::bump(&self.inner.counters.misses);
        let generation = self.lock_state().generation(table);
        let loaded_at = Instant::now();
        tracing::debug!(cache = self.inner.name, table = %table, "Cache miss, loading from remote");

        let remote = &*self.inner.remote;
        let retry = &self.inner.retry;

        let columns = retry
            .execute(&RemoteOp::LoadHeader.on(table), move || remote.load_header(table))
            .await?;
        let columns = match columns {
            Some(columns) if columns.iter().any(|c| !c.trim().is_empty()) => columns,
            _ => {
                // Nothing worth caching: the table is missing or has no
                // header yet, and initialization will change that.
                tracing::debug!(cache = self.inner.name, table = %table, "Table missing or headerless");
                return Ok(Arc::new(TableSnapshot {
                    header: None,
                    rows: Vec::new(),
                    loaded_at,
                    index: OnceLock::new(),
                }));
            }
        };

        let header = HeaderMap::new(table.clone(), columns);
        header.validate::<R>()?;

        let raw_rows = retry
            .execute(&RemoteOp::GetRows.on(table), move || {
                remote.get_rows(table, RowQuery::all())
            })
            .await?;

        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in raw_rows {
            if raw.is_blank() {
                continue;
            }
            match header.decode::<R>(&raw) {
                Ok(record) => rows.push(Arc::new(CachedRow::new(record, raw))),
                Err(err) => {
                    CacheCounters::bump(&self.inner.counters.skipped_rows);
                    tracing::warn!(
                        cache = self.inner.name,
                        table = %table,
                        row = raw.row_number,
                        error = %err,
                        "Skipping malformed row"
                    );
                }
            }
        }

        let snapshot = Arc::new(TableSnapshot {
            header: Some(Arc::new(header)),
            rows,
            loaded_at,
            index: OnceLock::new(),
        });
        CacheCounters::bump(&self.inner.counters.loads);

        let mut state = self.lock_state();
        if state.generation(table) == generation {
            state.entries.insert(table.clone(), Arc::clone(&snapshot));
            tracing::debug!(
                cache = self.inner.name,
                table = %table,
                rows = snapshot.rows.len(),
                "Loaded table"
            );
        } else {
            tracing::debug!(
                cache = self.inner.name,
                table = %table,
                "Table invalidated during load, not caching"
            );
        }
        Ok(snapshot)
    }
}

impl<R: Record> Evict for TableCache<R> {
    fn evict(&self, table: &TableName) -> bool {
        self.clear(table)
    }

    fn evict_all(&self) -> usize {
        self.clear_all()
    }
}
