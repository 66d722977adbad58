//! The store handed to application code.
//!
//! One `CacheStore` is built at process start and shared by `Arc`. It owns
//! every cache and coordination primitive, and is the only way row data is
//! mutated, so in-flight tracking always matches what is actually being
//! written.

use std::future::Future;
use std::sync::Arc;

use rollcall_core::{
    AttendanceRecord, EmployeeRecord, HeaderMap, Record, RosterEntry, SchemaError, StoreConfig,
    StoreError, StoreResult, TableName,
};
use uuid::Uuid;

use crate::cache::{CacheRead, CacheStats, Evict, Freshness, Row, RosterCache, TableCache};
use crate::coordination::{
    header_only, InitializationCoordinator, InvalidationScheduler, OperationTracker, TableSeeder,
};
use crate::dedup::DedupWindow;
use crate::remote::{RemoteOp, RemoteStore};
use crate::retry::RetryExecutor;

/// Result of a row mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutateOutcome<R> {
    /// Saved; carries the record as written.
    Applied(R),
    /// No row with that key.
    NotFound,
    /// The event was already handled within the dedup window.
    Duplicate,
}

impl<R> MutateOutcome<R> {
    pub fn is_applied(&self) -> bool {
        matches!(self, MutateOutcome::Applied(_))
    }

    pub fn applied(self) -> Option<R> {
        match self {
            MutateOutcome::Applied(record) => Some(record),
            _ => None,
        }
    }
}

/// Result of appending a row.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome<R> {
    /// Written at the given row number.
    Appended(R, usize),
    /// A row with the same key already exists; nothing was written.
    KeyExists,
}

/// Point-in-time counters across the whole store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub tables: CacheStats,
    pub roster: CacheStats,
    pub busy_tables: usize,
    pub pending_invalidations: usize,
    pub invalidations_fired: u64,
    pub invalidations_dropped: u64,
    pub init_verifications: u64,
    pub init_seed_runs: u64,
    pub init_deferred: u64,
    pub retries: u64,
    pub retries_exhausted: u64,
    pub dedup_entries: usize,
}

/// Caching, coordinated facade over a [`RemoteStore`].
///
/// `R` is the day-table record and `E` the roster entry.
pub struct CacheStore<R = AttendanceRecord, E = EmployeeRecord> {
    config: StoreConfig,
    remote: Arc<dyn RemoteStore>,
    retry: RetryExecutor,
    tables: TableCache<R>,
    roster: RosterCache<E>,
    init: InitializationCoordinator,
    scheduler: InvalidationScheduler,
    tracker: OperationTracker,
    dedup: DedupWindow,
}

impl<R, E> std::fmt::Debug for CacheStore<R, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl<R: Record, E: RosterEntry> CacheStore<R, E> {
    pub fn new(remote: Arc<dyn RemoteStore>, config: StoreConfig) -> Self {
        let retry = RetryExecutor::new(config.retry.clone());
        let tables = TableCache::new(Arc::clone(&remote), retry.clone(), config.table_ttl());
        let roster = RosterCache::new(
            config.roster_table(),
            Arc::clone(&remote),
            retry.clone(),
            config.roster_ttl(),
        );
        let init = InitializationCoordinator::new(Arc::clone(&remote), retry.clone(), config.init_ttl());
        let scheduler = InvalidationScheduler::new(config.invalidation_delay());
        scheduler.register(Arc::new(tables.clone()) as Arc<dyn Evict>);
        scheduler.register(Arc::new(roster.clone()) as Arc<dyn Evict>);
        scheduler.register(Arc::new(init.clone()) as Arc<dyn Evict>);
        let tracker = OperationTracker::new(scheduler.clone());
        let dedup = DedupWindow::new(config.dedup_window());

        tracing::debug!(
            roster_table = %config.roster_table(),
            table_ttl_ms = config.table_ttl_ms,
            invalidation_delay_ms = config.invalidation_delay_ms,
            "Cache store ready"
        );

        Self {
            config,
            remote,
            retry,
            tables,
            roster,
            init,
            scheduler,
            tracker,
            dedup,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn tables(&self) -> &TableCache<R> {
        &self.tables
    }

    pub fn roster(&self) -> &RosterCache<E> {
        &self.roster
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    pub fn scheduler(&self) -> &InvalidationScheduler {
        &self.scheduler
    }

    pub fn initializer(&self) -> &InitializationCoordinator {
        &self.init
    }

    pub fn dedup(&self) -> &DedupWindow {
        &self.dedup
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Names of every table in the remote store. Not cached.
    pub async fn list_tables(&self) -> StoreResult<Vec<TableName>> {
        let remote = &*self.remote;
        self.retry
            .execute(RemoteOp::ListTables.as_str(), move || remote.list_tables())
            .await
    }

    /// All rows of `table`.
    ///
    /// Like every entry point, this first makes sure the table exists with a
    /// header, creating it if needed. Fails with
    /// [`StoreError::InitializationDeferred`] when that cannot be verified.
    pub async fn get_rows(&self, table: &TableName) -> StoreResult<Vec<Row<R>>> {
        self.require_initialized::<R>(table).await?;
        self.tables.get_rows(table).await
    }

    pub async fn read_rows(
        &self,
        table: &TableName,
        freshness: Freshness,
    ) -> StoreResult<CacheRead<Vec<Row<R>>>> {
        self.require_initialized::<R>(table).await?;
        self.tables.read_rows(table, freshness).await
    }

    pub async fn get_indexed_row(&self, table: &TableName, key: &str) -> StoreResult<Option<Row<R>>> {
        self.require_initialized::<R>(table).await?;
        self.tables.get_indexed_row(table, key).await
    }

    // ========================================================================
    // INITIALIZATION
    // ========================================================================

    /// See [`InitializationCoordinator::ensure_initialized`].
    pub async fn ensure_initialized<F, Fut>(&self, table: &TableName, seed: F) -> StoreResult<bool>
    where
        F: FnOnce(TableSeeder) -> Fut + Send,
        Fut: Future<Output = StoreResult<()>> + Send,
    {
        self.init.ensure_initialized(table, seed).await
    }

    async fn require_initialized<T: Record>(&self, table: &TableName) -> StoreResult<()> {
        if self.init.ensure_initialized(table, header_only::<T>).await? {
            Ok(())
        } else {
            Err(StoreError::InitializationDeferred {
                table: table.clone(),
            })
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Apply `mutate` to the row keyed `key` in `table` and save it.
    ///
    /// The closure runs on a copy; the cached row only changes once the save
    /// succeeded. Changing the key is rejected with
    /// [`SchemaError::KeyChanged`].
    pub async fn mutate_row<F>(
        &self,
        table: &TableName,
        key: &str,
        mutate: F,
    ) -> StoreResult<MutateOutcome<R>>
    where
        F: FnOnce(&mut R) + Send,
    {
        self.mutate_in(&self.tables, table, key, mutate).await
    }

    /// [`mutate_row`](Self::mutate_row) behind the dedup window.
    ///
    /// A repeat of `event_key` within the window returns
    /// [`MutateOutcome::Duplicate`] without touching the table. The mark is
    /// released again unless the mutation was applied, so a retried action
    /// can proceed after a failure.
    pub async fn mutate_row_once<F>(
        &self,
        event_key: &str,
        table: &TableName,
        key: &str,
        mutate: F,
    ) -> StoreResult<MutateOutcome<R>>
    where
        F: FnOnce(&mut R) + Send,
    {
        if !self.dedup.check_and_mark(event_key) {
            tracing::info!(event_key, table = %table, key, "Duplicate event suppressed");
            return Ok(MutateOutcome::Duplicate);
        }

        let result = self.mutate_row(table, key, mutate).await;
        if !matches!(result, Ok(MutateOutcome::Applied(_))) {
            self.dedup.release(event_key);
        }
        result
    }

    /// Apply `mutate` to the roster entry `id` and save it.
    pub async fn mutate_roster_entry<F>(&self, id: &str, mutate: F) -> StoreResult<MutateOutcome<E>>
    where
        F: FnOnce(&mut E) + Send,
    {
        let table = self.roster.table().clone();
        self.mutate_in(self.roster.cache(), &table, id, mutate).await
    }

    /// Append `record` to `table` unless its key is already present.
    ///
    /// The new row joins the cached snapshot in place, so rows other writers
    /// are saving through stay cached.
    pub async fn append_row(&self, table: &TableName, record: R) -> StoreResult<AppendOutcome<R>> {
        self.require_initialized::<R>(table).await?;
        let _operation = self.tracker.begin(table);
        let op_id = Uuid::now_v7();

        if self.tables.get_indexed_row(table, record.key()).await?.is_some() {
            tracing::debug!(%op_id, table = %table, key = record.key(), "Key already present, not appending");
            return Ok(AppendOutcome::KeyExists);
        }

        let header = match self.tables.header(table).await? {
            Some(header) => header,
            None => Arc::new(HeaderMap::for_record::<R>(table.clone())),
        };
        let cells = header.encode_new(&record);

        let remote = &*self.remote;
        let appended = self
            .retry
            .execute(&RemoteOp::AppendRow.on(table), move || {
                remote.append_row(table, cells.clone())
            })
            .await?;

        let row_number = appended.row_number;
        self.tables.insert_appended(table, record.clone(), appended);
        tracing::info!(
            %op_id,
            table = %table,
            key = record.key(),
            row = row_number,
            "Row appended"
        );
        Ok(AppendOutcome::Appended(record, row_number))
    }

    async fn mutate_in<T, F>(
        &self,
        cache: &TableCache<T>,
        table: &TableName,
        key: &str,
        mutate: F,
    ) -> StoreResult<MutateOutcome<T>>
    where
        T: Record,
        F: FnOnce(&mut T) + Send,
    {
        self.require_initialized::<T>(table).await?;
        let _operation = self.tracker.begin(table);
        let op_id = Uuid::now_v7();

        let Some((row, header)) = cache.locate(table, key).await? else {
            tracing::debug!(%op_id, table = %table, key, "Row not found");
            return Ok(MutateOutcome::NotFound);
        };

        let _write = row.lock_for_write().await;
        let mut record = row.record();
        mutate(&mut record);

        if record.key() != key {
            return Err(SchemaError::KeyChanged {
                table: table.clone(),
                row: row.row_number(),
                from: key.to_string(),
                to: record.key().to_string(),
            }
            .into());
        }

        let updated = header.encode(&record, &row.raw());
        let remote = &*self.remote;
        let cells = &updated;
        self.retry
            .execute(&RemoteOp::SaveRow.on(table), move || remote.save_row(table, cells))
            .await?;

        row.replace(record.clone(), updated);
        tracing::info!(
            %op_id,
            table = %table,
            key,
            row = row.row_number(),
            "Row saved"
        );
        Ok(MutateOutcome::Applied(record))
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// `Some(table)` arms a delayed invalidation of that table; `None`
    /// clears everything now.
    pub fn invalidate(&self, table: Option<&TableName>) {
        self.scheduler.invalidate(table);
    }

    /// Clear every cache, every init record and every pending timer.
    pub fn invalidate_all(&self) {
        self.scheduler.invalidate_all();
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            tables: self.tables.stats(),
            roster: self.roster.stats(),
            busy_tables: self.tracker_busy_tables(),
            pending_invalidations: self.scheduler.pending_count(),
            invalidations_fired: self.scheduler.fired(),
            invalidations_dropped: self.scheduler.dropped(),
            init_verifications: self.init.verifications(),
            init_seed_runs: self.init.seed_runs(),
            init_deferred: self.init.deferred(),
            retries: self.retry.retries(),
            retries_exhausted: self.retry.exhausted(),
            dedup_entries: self.dedup.len(),
        }
    }

    fn tracker_busy_tables(&self) -> usize {
        self.scheduler.in_flight().busy_tables().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemoteStore;
    use rollcall_core::{AttendanceStatus, RemoteError};
    use std::time::Duration;

    const DAY_HEADERS: &[&str] = &["Employee ID", "Name", "Status", "Arrived", "Left", "Note"];

    fn day() -> TableName {
        TableName::new("2025-01-01")
    }

    fn store() -> (Arc<MemoryRemoteStore>, CacheStore) {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.seed_table(
            &day(),
            DAY_HEADERS,
            vec![
                vec!["emp1".into(), "Ada".into(), "absent".into()],
                vec!["emp2".into(), "Brian".into(), "present".into(), "08:55".into()],
            ],
        );
        let config = StoreConfig::default().with_retry(rollcall_core::RetryConfig {
            max_retries: 1,
            initial_delay_ms: 10,
            max_delay_ms: None,
        });
        let store: CacheStore = CacheStore::new(Arc::clone(&remote) as Arc<dyn RemoteStore>, config);
        (remote, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutate_row_saves_and_updates_cached_row() {
        let (remote, store) = store();

        let outcome = store
            .mutate_row(&day(), "emp1", |r| r.status = AttendanceStatus::Present)
            .await
            .unwrap();
        assert!(outcome.is_applied());

        let saved = remote.rows_of(&day()).unwrap();
        assert_eq!(saved[0][2], "present");
        assert_eq!(saved[0].len(), DAY_HEADERS.len());

        // The writer reads its own write without another load.
        let loads = remote.calls(RemoteOp::GetRows);
        let row = store.get_indexed_row(&day(), "emp1").await.unwrap().unwrap();
        assert_eq!(row.read(|r| r.status), AttendanceStatus::Present);
        assert_eq!(remote.calls(RemoteOp::GetRows), loads);
        assert!(store.scheduler().pending(&day()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutate_row_not_found() {
        let (remote, store) = store();
        let outcome = store
            .mutate_row(&day(), "emp404", |r| r.note = "x".into())
            .await
            .unwrap();
        assert_eq!(outcome, MutateOutcome::NotFound);
        assert_eq!(remote.calls(RemoteOp::SaveRow), 0);
        assert_eq!(store.tracker().in_flight(&day()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_change_rejected() {
        let (remote, store) = store();
        let err = store
            .mutate_row(&day(), "emp1", |r| r.employee_id = "emp9".into())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Schema(SchemaError::KeyChanged { .. })));
        assert_eq!(remote.calls(RemoteOp::SaveRow), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_leaves_cached_row_untouched() {
        let (remote, store) = store();
        remote.fail_next(RemoteOp::SaveRow, RemoteError::with_status(500, "backend down"), 1);

        let err = store
            .mutate_row(&day(), "emp1", |r| r.status = AttendanceStatus::Excused)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Remote { .. }));

        let row = store.get_indexed_row(&day(), "emp1").await.unwrap().unwrap();
        assert_eq!(row.read(|r| r.status), AttendanceStatus::Absent);
        assert_eq!(store.tracker().in_flight(&day()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutate_on_unverifiable_table_is_deferred() {
        let (remote, store) = store();
        let table = TableName::new("2025-01-09");
        remote.fail_always(RemoteOp::LoadHeader, RemoteError::quota("limit"));
        remote.fail_always(RemoteOp::HasData, RemoteError::quota("limit"));

        let err = store
            .mutate_row(&table, "emp1", |r| r.note = "late".into())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::InitializationDeferred { table: table.clone() });
        assert!(err.is_retryable_later());
        assert!(!remote.table_exists(&table));
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_row_then_visible() {
        let (remote, store) = store();
        let table = TableName::new("2025-01-10");

        let record = AttendanceRecord {
            employee_id: "emp7".into(),
            name: "Gus".into(),
            ..Default::default()
        };
        let outcome = store.append_row(&table, record.clone()).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Appended(record.clone(), 2));
        assert!(remote.table_exists(&table));

        let again = store.append_row(&table, record).await.unwrap();
        assert_eq!(again, AppendOutcome::KeyExists);

        let row = store.get_indexed_row(&table, "emp7").await.unwrap().unwrap();
        assert_eq!(row.read(|r| r.name.clone()), "Gus");
        assert!(store.tables().is_cached(&table));
        assert_eq!(remote.calls(RemoteOp::GetRows), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_of_unverifiable_table_is_deferred() {
        let (remote, store) = store();
        let table = TableName::new("2025-01-11");
        remote.fail_always(RemoteOp::LoadHeader, RemoteError::quota("limit"));
        remote.fail_always(RemoteOp::HasData, RemoteError::quota("limit"));

        let err = store.get_rows(&table).await.unwrap_err();
        assert_eq!(err, StoreError::InitializationDeferred { table: table.clone() });
        assert_eq!(remote.calls(RemoteOp::GetRows), 0);
        assert!(!remote.table_exists(&table));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutate_roster_entry() {
        let (remote, store) = store();
        let roster = TableName::new("Employees");
        remote.seed_table(
            &roster,
            EmployeeRecord::HEADERS,
            vec![vec!["emp1".into(), "Ada".into(), "@ada".into(), "Ops".into(), "TRUE".into()]],
        );

        let outcome = store
            .mutate_roster_entry("emp1", |e| e.active = false)
            .await
            .unwrap();
        assert!(outcome.is_applied());
        assert!(store.roster().active().await.unwrap().is_empty());
        assert_eq!(remote.rows_of(&roster).unwrap()[0][4], "FALSE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_arms_invalidation_that_clears_caches() {
        let (_remote, store) = store();
        store
            .mutate_row(&day(), "emp2", |r| r.status = AttendanceStatus::Left)
            .await
            .unwrap();
        assert!(store.tables().is_cached(&day()));

        tokio::time::sleep(store.config().invalidation_delay() + Duration::from_millis(10)).await;
        assert!(!store.tables().is_cached(&day()));
        assert!(!store.initializer().is_known(&day()));
        assert_eq!(store.stats().invalidations_fired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_tables() {
        let (_remote, store) = store();
        assert_eq!(store.list_tables().await.unwrap(), vec![day()]);
    }
}
