//! Error types for ROLLCALL operations

use crate::TableName;
use std::path::PathBuf;
use thiserror::Error;

/// HTTP status the backend uses for call-rate rejections.
pub const QUOTA_STATUS: u16 = 429;

/// HTTP status the backend uses for a missing table.
pub const NOT_FOUND_STATUS: u16 = 404;

/// Status codes the backend reports for quota rejections.
const QUOTA_CODES: &[&str] = &["RESOURCE_EXHAUSTED", "RATE_LIMIT_EXCEEDED"];

/// Message fragments that identify a quota rejection when no structured
/// status or code came back with the failure.
const QUOTA_MESSAGE_MARKERS: &[&str] = &["quota", "rate limit", "too many requests", "429"];

/// A failure reported by the remote tabular backend.
///
/// The backend gives no structured error type of its own. Whatever
/// status/code could be recovered from the transport is kept here alongside
/// the raw message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Remote call failed (status {status:?}, code {code:?}): {message}")]
pub struct RemoteError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl RemoteError {
    /// An error carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// An error carrying an HTTP-like status.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            message: message.into(),
        }
    }

    /// A quota rejection as the backend reports it.
    pub fn quota(message: impl Into<String>) -> Self {
        Self {
            status: Some(QUOTA_STATUS),
            code: Some(QUOTA_CODES[0].to_string()),
            message: message.into(),
        }
    }

    /// Attach a status code string.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Whether this failure is a call-rate/quota rejection.
    ///
    /// Structured signals win: when a status or code is present the message
    /// is not consulted at all. Message inspection is the fallback for
    /// transports that only surface text.
    pub fn is_quota(&self) -> bool {
        if self.status.is_some() || self.code.is_some() {
            let status_hit = self.status == Some(QUOTA_STATUS);
            let code_hit = self
                .code
                .as_deref()
                .map(|code| QUOTA_CODES.iter().any(|q| code.eq_ignore_ascii_case(q)))
                .unwrap_or(false);
            return status_hit || code_hit;
        }

        let message = self.message.to_ascii_lowercase();
        QUOTA_MESSAGE_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    }

    /// Whether the backend reported the addressed table as missing.
    pub fn is_not_found(&self) -> bool {
        self.status == Some(NOT_FOUND_STATUS)
            || self
                .code
                .as_deref()
                .is_some_and(|code| code.eq_ignore_ascii_case("NOT_FOUND"))
    }
}

/// Schema drift between a typed record and the remote table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Table {table} is missing column {column}")]
    MissingColumn { table: TableName, column: String },

    #[error("Invalid value {value:?} in {table} row {row}, column {column}: {reason}")]
    InvalidCell {
        table: TableName,
        row: usize,
        column: String,
        value: String,
        reason: String,
    },

    #[error("Row {row} of {table} has an empty key")]
    EmptyKey { table: TableName, row: usize },

    #[error("Mutation of {table} row {row} changed its key from {from:?} to {to:?}")]
    KeyChanged {
        table: TableName,
        row: usize,
        from: String,
        to: String,
    },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Quota exceeded for {operation} after {attempts} attempts: {source}")]
    QuotaExceeded {
        operation: String,
        attempts: u32,
        source: RemoteError,
    },

    #[error("Remote error during {operation}: {source}")]
    Remote {
        operation: String,
        source: RemoteError,
    },

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Initialization of {table} deferred: table state could not be verified")]
    InitializationDeferred { table: TableName },
}

impl StoreError {
    /// Whether the caller should treat this as "try again later".
    ///
    /// Both an exhausted quota budget and a deferred initialization mean the
    /// remote store is currently throttling us.
    pub fn is_retryable_later(&self) -> bool {
        matches!(
            self,
            StoreError::QuotaExceeded { .. } | StoreError::InitializationDeferred { .. }
        )
    }

    /// Whether the underlying remote failure was a quota rejection.
    pub fn is_quota(&self) -> bool {
        match self {
            StoreError::QuotaExceeded { .. } => true,
            StoreError::Remote { source, .. } => source.is_quota(),
            _ => false,
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_detected_from_status() {
        let err = RemoteError::with_status(429, "slow down");
        assert!(err.is_quota());
    }

    #[test]
    fn test_quota_detected_from_code() {
        let err = RemoteError::message("whatever").with_code("rate_limit_exceeded");
        assert!(err.is_quota());
    }

    #[test]
    fn test_structured_signal_overrides_message() {
        // A 500 whose body happens to mention quota is not a quota error.
        let err = RemoteError::with_status(500, "internal error while checking quota");
        assert!(!err.is_quota());
    }

    #[test]
    fn test_quota_detected_from_message_fallback() {
        for msg in [
            "Quota exceeded for quota metric 'Read requests'",
            "Rate Limit hit",
            "HTTP 429",
            "Too Many Requests",
        ] {
            assert!(RemoteError::message(msg).is_quota(), "{msg}");
        }
        assert!(!RemoteError::message("socket hang up").is_quota());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(RemoteError::with_status(404, "no such sheet").is_not_found());
        assert!(RemoteError::message("gone").with_code("not_found").is_not_found());
        assert!(!RemoteError::quota("limit").is_not_found());
    }

    #[test]
    fn test_quota_constructor_is_quota() {
        assert!(RemoteError::quota("limit").is_quota());
    }

    #[test]
    fn test_store_error_display_quota_exceeded() {
        let err = StoreError::QuotaExceeded {
            operation: "get_rows 2025-01-01".to_string(),
            attempts: 4,
            source: RemoteError::quota("limit"),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Quota exceeded"));
        assert!(msg.contains("2025-01-01"));
        assert!(msg.contains("4 attempts"));
    }

    #[test]
    fn test_store_error_classification() {
        let quota = StoreError::QuotaExceeded {
            operation: "save_row".to_string(),
            attempts: 4,
            source: RemoteError::quota("limit"),
        };
        assert!(quota.is_quota());
        assert!(quota.is_retryable_later());

        let deferred = StoreError::InitializationDeferred {
            table: TableName::new("2025-01-01"),
        };
        assert!(!deferred.is_quota());
        assert!(deferred.is_retryable_later());

        let remote = StoreError::Remote {
            operation: "load_header".to_string(),
            source: RemoteError::with_status(403, "forbidden"),
        };
        assert!(!remote.is_quota());
        assert!(!remote.is_retryable_later());
    }

    #[test]
    fn test_schema_error_from() {
        let err = StoreError::from(SchemaError::EmptyKey {
            table: TableName::new("Employees"),
            row: 7,
        });
        assert!(matches!(err, StoreError::Schema(_)));
        assert!(format!("{}", err).contains("Row 7"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "table_ttl_ms",
            reason: "must be > 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("table_ttl_ms"));
        assert!(msg.contains("must be > 0"));
    }
}
