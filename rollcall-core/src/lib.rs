//! ROLLCALL Core - Data Types
//!
//! Pure data structures shared by the store and its callers: table names,
//! the raw row shape of the remote store, typed records, configuration and
//! the error taxonomy. No I/O lives here.

pub mod config;
pub mod error;
pub mod record;
pub mod schema;

pub use config::{RetryConfig, StoreConfig};
pub use error::{
    ConfigError, RemoteError, SchemaError, StoreError, StoreResult, NOT_FOUND_STATUS, QUOTA_STATUS,
};
pub use record::{HeaderMap, RawRow, Record, RosterEntry, RowView};
pub use schema::{AttendanceRecord, AttendanceStatus, EmployeeRecord, TIME_FORMAT};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Date format used for day-table names.
pub const DAY_TABLE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// TABLE NAME
// ============================================================================

/// Name of a table in the remote store.
///
/// Day tables are named after their calendar date; the roster table has a
/// fixed configured name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The day table for `date`.
    pub fn for_day(date: NaiveDate) -> Self {
        Self(date.format(DAY_TABLE_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The date this table covers, if it is a day table.
    pub fn as_day(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0, DAY_TABLE_FORMAT).ok()
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TableName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TableName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_day_table_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let table = TableName::for_day(date);
        assert_eq!(table.as_str(), "2025-01-02");
        assert_eq!(table.as_day(), Some(date));
    }

    #[test]
    fn test_roster_name_is_not_a_day() {
        assert_eq!(TableName::new("Employees").as_day(), None);
    }

    #[test]
    fn test_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(TableName::from("2025-01-01"), 1);
        assert_eq!(map.get("2025-01-01"), Some(&1));
    }
}
