//! In-flight write accounting per table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rollcall_core::TableName;

use super::invalidation::InvalidationScheduler;

/// Per-table count of mutating operations in progress.
///
/// Cheap to clone; clones share the counts. Only [`OperationTracker`]
/// changes them.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    counts: Arc<Mutex<HashMap<TableName, u32>>>,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashMap<TableName, u32>> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count(&self, table: &TableName) -> u32 {
        self.lock().get(table).copied().unwrap_or(0)
    }

    pub fn is_busy(&self, table: &TableName) -> bool {
        self.count(table) > 0
    }

    /// Tables with at least one operation in flight.
    pub fn busy_tables(&self) -> Vec<TableName> {
        let mut tables: Vec<TableName> = self.lock().keys().cloned().collect();
        tables.sort();
        tables
    }

    fn increment(&self, table: &TableName) -> u32 {
        let mut counts = self.lock();
        let count = counts.entry(table.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement, returning the new count or `None` on underflow.
    fn decrement(&self, table: &TableName) -> Option<u32> {
        let mut counts = self.lock();
        let count = counts.get_mut(table)?;
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            counts.remove(table);
        }
        Some(remaining)
    }
}

/// Tracks mutating operations and arms invalidation once a table goes idle.
#[derive(Debug, Clone)]
pub struct OperationTracker {
    in_flight: InFlight,
    scheduler: InvalidationScheduler,
}

impl OperationTracker {
    /// A tracker feeding `scheduler`, sharing its in-flight counts.
    pub fn new(scheduler: InvalidationScheduler) -> Self {
        Self {
            in_flight: scheduler.in_flight().clone(),
            scheduler,
        }
    }

    /// Mark a mutating operation on `table` as started.
    pub fn start_operation(&self, table: &TableName) {
        let count = self.in_flight.increment(table);
        tracing::trace!(table = %table, in_flight = count, "Operation started");
    }

    /// Mark a mutating operation on `table` as finished.
    ///
    /// When the table goes idle a delayed invalidation is armed. An end
    /// without a matching start leaves the count at zero and arms nothing.
    pub fn end_operation(&self, table: &TableName) {
        match self.in_flight.decrement(table) {
            None => {
                tracing::error!(table = %table, "Operation ended on an idle table, ignoring");
            }
            Some(0) => {
                tracing::trace!(table = %table, "Table idle, arming invalidation");
                self.scheduler.schedule(table);
            }
            Some(count) => {
                tracing::trace!(table = %table, in_flight = count, "Operation ended");
            }
        }
    }

    /// Start an operation that ends when the returned guard drops.
    pub fn begin(&self, table: &TableName) -> OperationGuard {
        self.start_operation(table);
        OperationGuard {
            tracker: self.clone(),
            table: table.clone(),
        }
    }

    pub fn in_flight(&self, table: &TableName) -> u32 {
        self.in_flight.count(table)
    }

    pub fn is_busy(&self, table: &TableName) -> bool {
        self.in_flight.is_busy(table)
    }
}

/// Ends its operation on drop, whichever way the operation exits.
#[must_use = "the operation ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct OperationGuard {
    tracker: OperationTracker,
    table: TableName,
}

impl OperationGuard {
    pub fn table(&self) -> &TableName {
        &self.table
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.tracker.end_operation(&self.table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tracker() -> OperationTracker {
        OperationTracker::new(InvalidationScheduler::new(Duration::from_secs(5)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_and_arms_on_idle() {
        let tracker = tracker();
        let table = TableName::new("2025-01-01");

        tracker.start_operation(&table);
        tracker.start_operation(&table);
        assert_eq!(tracker.in_flight(&table), 2);

        tracker.end_operation(&table);
        assert!(tracker.is_busy(&table));
        assert!(!tracker.scheduler.pending(&table));

        tracker.end_operation(&table);
        assert!(!tracker.is_busy(&table));
        assert!(tracker.scheduler.pending(&table));
    }

    #[tokio::test(start_paused = true)]
    async fn test_underflow_floors_at_zero() {
        let tracker = tracker();
        let table = TableName::new("R");

        tracker.end_operation(&table);
        assert_eq!(tracker.in_flight(&table), 0);
        assert!(!tracker.scheduler.pending(&table));

        tracker.start_operation(&table);
        assert_eq!(tracker.in_flight(&table), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_ends_on_error_path() {
        let tracker = tracker();
        let table = TableName::new("2025-01-01");

        fn failing(tracker: &OperationTracker, table: &TableName) -> Result<(), &'static str> {
            let _guard = tracker.begin(table);
            Err("save failed")
        }

        assert!(failing(&tracker, &table).is_err());
        assert_eq!(tracker.in_flight(&table), 0);
        assert!(tracker.scheduler.pending(&table));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_ends_on_panic() {
        let tracker = tracker();
        let table = TableName::new("2025-01-01");

        let inner = tracker.clone();
        let task_table = table.clone();
        let result = tokio::spawn(async move {
            let _guard = inner.begin(&task_table);
            panic!("boom");
        })
        .await;

        assert!(result.is_err());
        assert_eq!(tracker.in_flight(&table), 0);
    }

    #[test]
    fn test_busy_tables_sorted() {
        let tracker = OperationTracker::new(InvalidationScheduler::new(Duration::from_secs(5)));
        tracker.start_operation(&TableName::new("b"));
        tracker.start_operation(&TableName::new("a"));
        assert_eq!(
            tracker.in_flight.busy_tables(),
            vec![TableName::new("a"), TableName::new("b")]
        );
    }
}
