//! Coordination primitives around the caches: in-flight write tracking,
//! delayed invalidation and one-time table initialization.

pub mod init;
pub mod invalidation;
pub mod tracker;

pub use init::{header_only, InitializationCoordinator, TableSeeder};
pub use invalidation::InvalidationScheduler;
pub use tracker::{InFlight, OperationGuard, OperationTracker};
