//! In-process remote store.
//!
//! Behaves like the spreadsheet backend (row numbers start below the header,
//! missing tables are errors, every call is a suspension point) and adds the
//! hooks tests need: per-operation call counts, scripted failures and
//! artificial latency.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rollcall_core::{RawRow, RemoteError, TableName, NOT_FOUND_STATUS};

use crate::remote::{RemoteOp, RemoteResult, RemoteStore, RowQuery};

/// First data row number; row 1 holds the header.
const FIRST_DATA_ROW: usize = 2;

#[derive(Debug, Clone, Default)]
struct MemTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    grid: (usize, usize),
}

#[derive(Debug)]
enum Failure {
    Times(RemoteError, usize),
    Always(RemoteError),
}

/// In-memory implementation of [`RemoteStore`].
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    tables: RwLock<HashMap<TableName, MemTable>>,
    calls: Mutex<HashMap<RemoteOp, usize>>,
    failures: Mutex<HashMap<RemoteOp, VecDeque<Failure>>>,
    latency: Mutex<Option<Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_found(table: &TableName) -> RemoteError {
    RemoteError::with_status(NOT_FOUND_STATUS, format!("table '{}' not found", table))
}

impl MemoryRemoteStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.latency) = Some(latency);
        self
    }

    /// Change the per-call latency.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    // ========================================================================
    // FIXTURES (not counted as calls)
    // ========================================================================

    /// Create or replace a table with a header and data rows.
    pub fn seed_table(&self, table: &TableName, header: &[&str], rows: Vec<Vec<String>>) {
        let header: Vec<String> = header.iter().map(|h| h.to_string()).collect();
        let grid = (rows.len() + 1, header.len());
        self.tables.write().unwrap_or_else(PoisonError::into_inner).insert(
            table.clone(),
            MemTable { header, rows, grid },
        );
    }

    /// Create or replace a table with no header and some raw cells.
    pub fn seed_headerless(&self, table: &TableName, rows: Vec<Vec<String>>) {
        let grid = (rows.len(), rows.iter().map(Vec::len).max().unwrap_or(0));
        self.tables.write().unwrap_or_else(PoisonError::into_inner).insert(
            table.clone(),
            MemTable {
                header: Vec::new(),
                rows,
                grid,
            },
        );
    }

    /// Current data rows of a table.
    pub fn rows_of(&self, table: &TableName) -> Option<Vec<Vec<String>>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .map(|t| t.rows.clone())
    }

    /// Current header of a table.
    pub fn header_of(&self, table: &TableName) -> Option<Vec<String>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .map(|t| t.header.clone())
    }

    /// Current grid size (rows, columns) of a table.
    pub fn grid_of(&self, table: &TableName) -> Option<(usize, usize)> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .map(|t| t.grid)
    }

    pub fn table_exists(&self, table: &TableName) -> bool {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(table)
    }

    // ========================================================================
    // CALL ACCOUNTING
    // ========================================================================

    /// Calls made for `op`, failed ones included.
    pub fn calls(&self, op: RemoteOp) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Calls made across all operations.
    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    // ========================================================================
    // FAILURE INJECTION
    // ========================================================================

    /// Fail the next `times` calls of `op` with `error`.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError, times: usize) {
        if times == 0 {
            return;
        }
        lock(&self.failures)
            .entry(op)
            .or_default()
            .push_back(Failure::Times(error, times));
    }

    /// Fail every call of `op` with `error` until cleared.
    pub fn fail_always(&self, op: RemoteOp, error: RemoteError) {
        lock(&self.failures)
            .entry(op)
            .or_default()
            .push_back(Failure::Always(error));
    }

    /// Drop every scripted failure.
    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    async fn enter(&self, op: RemoteOp) -> RemoteResult<()> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;

        let latency = *lock(&self.latency);
        match latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }

        let mut failures = lock(&self.failures);
        let Some(queue) = failures.get_mut(&op) else {
            return Ok(());
        };
        let (error, exhausted) = match queue.front_mut() {
            None => return Ok(()),
            Some(Failure::Always(error)) => return Err(error.clone()),
            Some(Failure::Times(error, remaining)) => {
                *remaining -= 1;
                (error.clone(), *remaining == 0)
            }
        };
        if exhausted {
            queue.pop_front();
        }
        Err(error)
    }

    fn with_table<T>(
        &self,
        table: &TableName,
        f: impl FnOnce(&mut MemTable) -> RemoteResult<T>,
    ) -> RemoteResult<T> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let entry = tables.get_mut(table).ok_or_else(|| not_found(table))?;
        f(entry)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn list_tables(&self) -> RemoteResult<Vec<TableName>> {
        self.enter(RemoteOp::ListTables).await?;
        let mut names: Vec<TableName> = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn create_table(&self, table: &TableName) -> RemoteResult<()> {
        self.enter(RemoteOp::CreateTable).await?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.contains_key(table) {
            return Err(RemoteError::with_status(
                400,
                format!("a table named '{}' already exists", table),
            ));
        }
        tables.insert(table.clone(), MemTable::default());
        Ok(())
    }

    async fn load_header(&self, table: &TableName) -> RemoteResult<Option<Vec<String>>> {
        self.enter(RemoteOp::LoadHeader).await?;
        Ok(self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .map(|t| t.header.clone()))
    }

    async fn set_header(&self, table: &TableName, columns: &[String]) -> RemoteResult<()> {
        self.enter(RemoteOp::SetHeader).await?;
        self.with_table(table, |t| {
            t.header = columns.to_vec();
            t.grid.0 = t.grid.0.max(1);
            t.grid.1 = t.grid.1.max(columns.len());
            Ok(())
        })
    }

    async fn get_rows(&self, table: &TableName, query: RowQuery) -> RemoteResult<Vec<RawRow>> {
        self.enter(RemoteOp::GetRows).await?;
        self.with_table(table, |t| {
            let rows = t
                .rows
                .iter()
                .enumerate()
                .map(|(idx, cells)| RawRow::new(idx + FIRST_DATA_ROW, cells.clone()));
            Ok(query.apply(rows))
        })
    }

    async fn append_row(&self, table: &TableName, cells: Vec<String>) -> RemoteResult<RawRow> {
        self.enter(RemoteOp::AppendRow).await?;
        self.with_table(table, |t| {
            let row_number = t.rows.len() + FIRST_DATA_ROW;
            t.grid.0 = t.grid.0.max(row_number);
            t.grid.1 = t.grid.1.max(cells.len());
            t.rows.push(cells.clone());
            Ok(RawRow::new(row_number, cells))
        })
    }

    async fn save_row(&self, table: &TableName, row: &RawRow) -> RemoteResult<()> {
        self.enter(RemoteOp::SaveRow).await?;
        self.with_table(table, |t| {
            let idx = row
                .row_number
                .checked_sub(FIRST_DATA_ROW)
                .filter(|idx| *idx < t.rows.len())
                .ok_or_else(|| {
                    RemoteError::with_status(
                        400,
                        format!("row {} is outside of table '{}'", row.row_number, table),
                    )
                })?;
            t.rows[idx] = row.cells.clone();
            Ok(())
        })
    }

    async fn has_data(&self, table: &TableName) -> RemoteResult<bool> {
        self.enter(RemoteOp::HasData).await?;
        Ok(self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .map(|t| {
                t.header.iter().any(|c| !c.trim().is_empty())
                    || t.rows.iter().flatten().any(|c| !c.trim().is_empty())
            })
            .unwrap_or(false))
    }

    async fn resize(&self, table: &TableName, rows: usize, columns: usize) -> RemoteResult<()> {
        self.enter(RemoteOp::Resize).await?;
        self.with_table(table, |t| {
            let data_rows = rows.saturating_sub(1);
            t.rows.truncate(data_rows);
            for row in &mut t.rows {
                row.truncate(columns);
            }
            t.header.truncate(columns);
            t.grid = (rows, columns);
            Ok(())
        })
    }
}
