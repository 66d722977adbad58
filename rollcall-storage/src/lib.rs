//! ROLLCALL Storage - Caching and Coordination over the Remote Store
//!
//! The remote tabular backend is slow, quota-limited and has no
//! transactions, partial updates or indexes. This crate puts a consistency
//! layer in front of it:
//!
//! - [`TableCache`] / [`RosterCache`]: TTL-bounded row caches with a lazily
//!   built key index.
//! - [`RetryExecutor`]: exponential backoff for quota rejections only.
//! - [`OperationTracker`] / [`InvalidationScheduler`]: delayed invalidation
//!   that never fires while a table has writes in flight.
//! - [`InitializationCoordinator`]: one-time table setup that defers rather
//!   than risk seeding over live data.
//! - [`CacheStore`]: the facade owning all of the above.

pub mod cache;
pub mod coordination;
pub mod dedup;
pub mod memory;
pub mod remote;
pub mod retry;
pub mod store;

pub use cache::{CacheRead, CacheStats, CachedRow, Evict, Freshness, Row, RosterCache, TableCache};
pub use coordination::{
    header_only, InFlight, InitializationCoordinator, InvalidationScheduler, OperationGuard,
    OperationTracker, TableSeeder,
};
pub use dedup::DedupWindow;
pub use memory::MemoryRemoteStore;
pub use remote::{RemoteOp, RemoteResult, RemoteStore, RowQuery};
pub use retry::RetryExecutor;
pub use store::{AppendOutcome, CacheStore, MutateOutcome, StoreStats};
