//! Freshness contracts for cache reads.
//!
//! Plain reads trust a table for its configured TTL. Callers that care can
//! tighten that window or demand a reload, and [`CacheRead`] tells them what
//! they actually got.

use std::time::Duration;

use tokio::time::Instant;

/// Freshness requirement for cache reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Accept cached rows up to the given age (never beyond the cache TTL).
    BestEffort {
        /// Maximum acceptable staleness for cached data.
        max_staleness: Duration,
    },

    /// Reload from the remote store regardless of what is cached.
    ///
    /// Costs quota; meant for scans that must see writes made by other
    /// processes or by hand in the spreadsheet.
    Consistent,
}

impl Freshness {
    /// Create a BestEffort freshness with the given max staleness.
    pub fn best_effort(max_staleness: Duration) -> Self {
        Self::BestEffort { max_staleness }
    }

    /// Create a Consistent freshness requirement.
    pub fn consistent() -> Self {
        Self::Consistent
    }

    /// Returns true if this is a Consistent freshness.
    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// The largest age a cached value may have, capped at `ttl`.
    /// `None` means the cache must not be used.
    pub fn window(&self, ttl: Duration) -> Option<Duration> {
        match self {
            Self::BestEffort { max_staleness } => Some((*max_staleness).min(ttl)),
            Self::Consistent => None,
        }
    }
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    loaded_at: Instant,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// A read served from the cache.
    pub fn from_cache(value: T, loaded_at: Instant) -> Self {
        Self {
            value,
            loaded_at,
            was_cache_hit: true,
        }
    }

    /// A read that went to the remote store.
    pub fn from_remote(value: T, loaded_at: Instant) -> Self {
        Self {
            value,
            loaded_at,
            was_cache_hit: false,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// When the data was loaded from the remote store.
    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    /// How long ago the data was loaded.
    pub fn staleness(&self) -> Duration {
        self.loaded_at.elapsed()
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            loaded_at: self.loaded_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
