//! Read-through caches over the remote store.
//!
//! Staleness is explicit here. Plain reads trust an entry for its TTL,
//! [`TableCache::read_rows`] takes a [`Freshness`] and returns a
//! [`CacheRead`] that says whether the remote store was consulted.
//!
//! # Example
//!
//! ```ignore
//! let read = cache
//!     .read_rows(&table, Freshness::best_effort(Duration::from_secs(60)))
//!     .await?;
//!
//! if read.staleness() > Duration::from_secs(30) {
//!     tracing::debug!("Roster is getting stale");
//! }
//! ```

pub mod freshness;
pub mod roster;
pub mod stats;
pub mod table;

pub use freshness::{CacheRead, Freshness};
pub use roster::RosterCache;
pub use stats::{CacheStats, Evict};
pub use table::{CachedRow, Row, TableCache};
