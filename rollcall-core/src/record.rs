//! Typed records and the raw row shape they are decoded from.
//!
//! The remote store only knows ordered string cells under a header row.
//! Everything above the remote boundary works with a [`Record`] type, decoded
//! once per load through a [`HeaderMap`] so schema drift is reported as a
//! [`SchemaError`] at load time instead of surfacing as a misread field later.

use crate::{SchemaError, TableName};
use std::collections::HashMap;
use std::str::FromStr;

/// A row as it crosses the remote boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based sheet row number. Row 1 is the header, so data starts at 2.
    pub row_number: usize,
    /// Cell values in header order. Trailing empty cells may be omitted.
    pub cells: Vec<String>,
}

impl RawRow {
    pub fn new(row_number: usize, cells: Vec<String>) -> Self {
        Self { row_number, cells }
    }

    /// Whether every cell is blank.
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|cell| cell.trim().is_empty())
    }
}

/// A strongly typed record for one table schema.
///
/// `encode` must return exactly one cell per entry of `HEADERS`, in order.
pub trait Record: Clone + Send + Sync + 'static {
    /// Column names this record reads and writes, in canonical order.
    const HEADERS: &'static [&'static str];

    /// The column holding the record key.
    const KEY_COLUMN: &'static str;

    /// The key used for point lookups.
    fn key(&self) -> &str;

    /// Decode a record from a raw row.
    fn decode(row: &RowView<'_>) -> Result<Self, SchemaError>;

    /// Encode the record into cells aligned with `HEADERS`.
    fn encode(&self) -> Vec<String>;
}

/// Roster-table records expose a display name and an active flag.
pub trait RosterEntry: Record {
    fn display_name(&self) -> &str;

    fn is_active(&self) -> bool;
}

/// Column positions of a remote table header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMap {
    table: TableName,
    columns: Vec<String>,
    positions: HashMap<String, usize>,
}

impl HeaderMap {
    /// Build a header map from the remote header row.
    pub fn new(table: TableName, columns: Vec<String>) -> Self {
        let positions = columns
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim().to_string(), idx))
            .collect();
        Self {
            table,
            columns,
            positions,
        }
    }

    /// Header map for a table whose header is exactly `R::HEADERS`.
    pub fn for_record<R: Record>(table: TableName) -> Self {
        Self::new(table, R::HEADERS.iter().map(|h| h.to_string()).collect())
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }

    /// Check that every column `R` needs is present.
    pub fn validate<R: Record>(&self) -> Result<(), SchemaError> {
        for column in R::HEADERS {
            if self.position(column).is_none() {
                return Err(SchemaError::MissingColumn {
                    table: self.table.clone(),
                    column: (*column).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Decode a raw row into `R`, rejecting rows with an empty key.
    pub fn decode<R: Record>(&self, row: &RawRow) -> Result<R, SchemaError> {
        let view = RowView { header: self, row };
        if view.get(R::KEY_COLUMN).trim().is_empty() {
            return Err(SchemaError::EmptyKey {
                table: self.table.clone(),
                row: row.row_number,
            });
        }
        R::decode(&view)
    }

    /// Encode `record` on top of `existing`, keeping cells of columns the
    /// record does not own.
    pub fn encode<R: Record>(&self, record: &R, existing: &RawRow) -> RawRow {
        let mut cells = existing.cells.clone();
        if cells.len() < self.columns.len() {
            cells.resize(self.columns.len(), String::new());
        }
        for (column, value) in R::HEADERS.iter().zip(record.encode()) {
            if let Some(idx) = self.position(column) {
                cells[idx] = value;
            }
        }
        RawRow::new(existing.row_number, cells)
    }

    /// Encode `record` as a brand new row (no existing cells to preserve).
    pub fn encode_new<R: Record>(&self, record: &R) -> Vec<String> {
        self.encode(record, &RawRow::new(0, Vec::new())).cells
    }
}

/// Read access to one raw row through its header.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    header: &'a HeaderMap,
    row: &'a RawRow,
}

impl<'a> RowView<'a> {
    pub fn row_number(&self) -> usize {
        self.row.row_number
    }

    /// Cell text for `column`; missing columns and short rows read as "".
    pub fn get(&self, column: &str) -> &'a str {
        self.header
            .position(column)
            .and_then(|idx| self.row.cells.get(idx))
            .map(|cell| cell.trim())
            .unwrap_or("")
    }

    /// Cell text for `column` as an owned string.
    pub fn text(&self, column: &str) -> String {
        self.get(column).to_string()
    }

    /// Parse a required cell.
    pub fn parse<T>(&self, column: &str) -> Result<T, SchemaError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.get(column);
        raw.parse::<T>()
            .map_err(|e| self.invalid(column, raw, e.to_string()))
    }

    /// Parse an optional cell; blank reads as `None`.
    pub fn parse_opt<T>(&self, column: &str) -> Result<Option<T>, SchemaError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if self.get(column).is_empty() {
            return Ok(None);
        }
        self.parse(column).map(Some)
    }

    /// Build an `InvalidCell` error for this row.
    pub fn invalid(&self, column: &str, value: &str, reason: impl Into<String>) -> SchemaError {
        SchemaError::InvalidCell {
            table: self.header.table.clone(),
            row: self.row.row_number,
            column: column.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
