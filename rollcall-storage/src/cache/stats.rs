//! Cache counters and the eviction hook shared by every cache.

use std::sync::atomic::{AtomicU64, Ordering};

use rollcall_core::TableName;

/// Something the invalidation scheduler can clear.
///
/// Implemented by each table cache and by the initialization state, so one
/// invalidation reaches every piece of per-table state.
pub trait Evict: Send + Sync {
    /// Drop everything held for `table`. Returns whether anything was held.
    fn evict(&self, table: &TableName) -> bool;

    /// Drop everything. Returns how many tables were held.
    fn evict_all(&self) -> usize;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served without a remote call.
    pub hits: u64,
    /// Reads that had to load from the remote store.
    pub misses: u64,
    /// Completed remote loads.
    pub loads: u64,
    /// Key indexes built.
    pub index_builds: u64,
    /// Entries dropped by invalidation.
    pub evictions: u64,
    /// Rows skipped during decode because they were malformed.
    pub skipped_rows: u64,
    /// Tables currently cached.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub loads: AtomicU64,
    pub index_builds: AtomicU64,
    pub evictions: AtomicU64,
    pub skipped_rows: AtomicU64,
}

impl CacheCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entry_count: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            index_builds: self.index_builds.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            skipped_rows: self.skipped_rows.load(Ordering::Relaxed),
            entry_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_counter_snapshot() {
        let counters = CacheCounters::default();
        CacheCounters::bump(&counters.hits);
        CacheCounters::bump(&counters.hits);
        CacheCounters::bump(&counters.loads);
        let stats = counters.snapshot(3);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.entry_count, 3);
    }
}
