//! The remote tabular backend, as consumed by the cache layer.
//!
//! Implementations wrap the actual spreadsheet API. Every method is a
//! network round trip counted against the backend's per-minute quota, so
//! nothing above this trait calls it without going through the
//! [`RetryExecutor`](crate::RetryExecutor) and, for reads, the caches.

use async_trait::async_trait;
use rollcall_core::{RawRow, RemoteError, TableName};

/// Result of a single remote call.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Paging window for row reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl RowQuery {
    /// Every data row.
    pub fn all() -> Self {
        Self::default()
    }

    /// A window of at most `limit` rows starting `offset` rows in.
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    /// Apply the window to an iterator of rows.
    pub fn apply<I, T>(&self, rows: I) -> Vec<T>
    where
        I: IntoIterator<Item = T>,
    {
        rows.into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Remote operation labels, used for logging, error context and call counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    ListTables,
    CreateTable,
    LoadHeader,
    SetHeader,
    GetRows,
    AppendRow,
    SaveRow,
    HasData,
    Resize,
}

impl RemoteOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteOp::ListTables => "list_tables",
            RemoteOp::CreateTable => "create_table",
            RemoteOp::LoadHeader => "load_header",
            RemoteOp::SetHeader => "set_header",
            RemoteOp::GetRows => "get_rows",
            RemoteOp::AppendRow => "append_row",
            RemoteOp::SaveRow => "save_row",
            RemoteOp::HasData => "has_data",
            RemoteOp::Resize => "resize",
        }
    }

    /// Label for one call against one table.
    pub fn on(&self, table: &TableName) -> String {
        format!("{} {}", self.as_str(), table)
    }
}

impl std::fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation set of the remote tabular backend.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Names of every table in the document.
    async fn list_tables(&self) -> RemoteResult<Vec<TableName>>;

    /// Create an empty table. Fails if the name is taken.
    async fn create_table(&self, table: &TableName) -> RemoteResult<()>;

    /// Header row of a table; `None` when the table does not exist, an
    /// empty vector when it exists without a header.
    async fn load_header(&self, table: &TableName) -> RemoteResult<Option<Vec<String>>>;

    /// Overwrite the header row.
    async fn set_header(&self, table: &TableName, columns: &[String]) -> RemoteResult<()>;

    /// Data rows (below the header) within the query window.
    async fn get_rows(&self, table: &TableName, query: RowQuery) -> RemoteResult<Vec<RawRow>>;

    /// Append a data row and return it with its assigned row number.
    async fn append_row(&self, table: &TableName, cells: Vec<String>) -> RemoteResult<RawRow>;

    /// Persist the cells of a previously fetched row in place.
    async fn save_row(&self, table: &TableName, row: &RawRow) -> RemoteResult<()>;

    /// Whether any cell of the table holds data. Reads raw cells, so it
    /// works even when the header row is missing or unreadable.
    async fn has_data(&self, table: &TableName) -> RemoteResult<bool>;

    /// Reshape the table grid.
    async fn resize(&self, table: &TableName, rows: usize, columns: usize) -> RemoteResult<()>;
}
