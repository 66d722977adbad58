//! Configuration types
//!
//! Durations are stored as milliseconds so the TOML form stays flat; the
//! accessor methods hand out `std::time::Duration`.

use crate::{ConfigError, TableName};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Backoff policy for quota-limited remote calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub initial_delay_ms: u64,
    /// Upper bound on a single delay, if any.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }

    /// Delay before retry number `attempt` (0-based): `initial * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(self.initial_delay_ms.saturating_mul(factor));
        match self.max_delay() {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Store-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// How long a loaded day table is trusted.
    pub table_ttl_ms: u64,
    /// How long the roster table is trusted.
    pub roster_ttl_ms: u64,
    /// How long a "table already initialized" verdict is trusted.
    pub init_ttl_ms: u64,
    /// Settle time between the last write to a table and its invalidation.
    pub invalidation_delay_ms: u64,
    /// Window in which a repeated logical event is treated as a duplicate.
    pub dedup_window_ms: u64,
    /// Name of the roster table.
    pub roster_table: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_ttl_ms: 30 * 60 * 1000,
            roster_ttl_ms: 60 * 60 * 1000,
            init_ttl_ms: 10 * 60 * 1000,
            invalidation_delay_ms: 5_000,
            dedup_window_ms: 5_000,
            roster_table: "Employees".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_ttl(&self) -> Duration {
        Duration::from_millis(self.table_ttl_ms)
    }

    pub fn roster_ttl(&self) -> Duration {
        Duration::from_millis(self.roster_ttl_ms)
    }

    pub fn init_ttl(&self) -> Duration {
        Duration::from_millis(self.init_ttl_ms)
    }

    pub fn invalidation_delay(&self) -> Duration {
        Duration::from_millis(self.invalidation_delay_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn roster_table(&self) -> TableName {
        TableName::new(self.roster_table.clone())
    }

    /// Set the day-table TTL.
    pub fn with_table_ttl(mut self, ttl: Duration) -> Self {
        self.table_ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Set the roster TTL.
    pub fn with_roster_ttl(mut self, ttl: Duration) -> Self {
        self.roster_ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Set the initialization-state TTL.
    pub fn with_init_ttl(mut self, ttl: Duration) -> Self {
        self.init_ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Set the invalidation settle delay.
    pub fn with_invalidation_delay(mut self, delay: Duration) -> Self {
        self.invalidation_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the dedup window.
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window_ms = window.as_millis() as u64;
        self
    }

    /// Set the roster table name.
    pub fn with_roster_table(mut self, name: impl Into<String>) -> Self {
        self.roster_table = name.into();
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Load and validate a TOML config file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Defaults overridden by environment variables.
    ///
    /// Environment variables:
    /// - `ROLLCALL_TABLE_TTL_MS`
    /// - `ROLLCALL_ROSTER_TTL_MS`
    /// - `ROLLCALL_INIT_TTL_MS`
    /// - `ROLLCALL_INVALIDATION_DELAY_MS`
    /// - `ROLLCALL_DEDUP_WINDOW_MS`
    /// - `ROLLCALL_ROSTER_TABLE`
    /// - `ROLLCALL_RETRY_MAX_RETRIES`
    /// - `ROLLCALL_RETRY_INITIAL_DELAY_MS`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let num = |key: &str, fallback: u64| {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(fallback)
        };
        let count = |key: &str, fallback: u32| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(fallback)
        };

        Self {
            table_ttl_ms: num("ROLLCALL_TABLE_TTL_MS", defaults.table_ttl_ms),
            roster_ttl_ms: num("ROLLCALL_ROSTER_TTL_MS", defaults.roster_ttl_ms),
            init_ttl_ms: num("ROLLCALL_INIT_TTL_MS", defaults.init_ttl_ms),
            invalidation_delay_ms: num(
                "ROLLCALL_INVALIDATION_DELAY_MS",
                defaults.invalidation_delay_ms,
            ),
            dedup_window_ms: num("ROLLCALL_DEDUP_WINDOW_MS", defaults.dedup_window_ms),
            roster_table: lookup("ROLLCALL_ROSTER_TABLE").unwrap_or(defaults.roster_table),
            retry: RetryConfig {
                max_retries: count("ROLLCALL_RETRY_MAX_RETRIES", defaults.retry.max_retries),
                initial_delay_ms: num(
                    "ROLLCALL_RETRY_INITIAL_DELAY_MS",
                    defaults.retry.initial_delay_ms,
                ),
                max_delay_ms: defaults.retry.max_delay_ms,
            },
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("table_ttl_ms", self.table_ttl_ms),
            ("roster_ttl_ms", self.roster_ttl_ms),
            ("init_ttl_ms", self.init_ttl_ms),
            ("invalidation_delay_ms", self.invalidation_delay_ms),
            ("dedup_window_ms", self.dedup_window_ms),
            ("retry.initial_delay_ms", self.retry.initial_delay_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be > 0".to_string(),
                });
            }
        }

        if self.roster_table.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "roster_table",
                reason: "must not be empty".to_string(),
            });
        }

        if let Some(max) = self.retry.max_delay_ms {
            if max < self.retry.initial_delay_ms {
                return Err(ConfigError::InvalidValue {
                    field: "retry.max_delay_ms",
                    reason: "must be >= retry.initial_delay_ms".to_string(),
                });
            }
        }

        Ok(())
    }
}
