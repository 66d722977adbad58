//! Delayed, cancellable invalidation per table.
//!
//! At most one timer is pending per table; arming a new one aborts the old.
//! A timer that fires while the table still has writers in flight drops its
//! invalidation. The writer that takes the table idle arms a fresh one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use rollcall_core::TableName;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::tracker::InFlight;
use crate::cache::Evict;

#[derive(Debug)]
struct PendingTimer {
    id: u64,
    handle: AbortHandle,
}

struct SchedulerInner {
    delay: Duration,
    in_flight: InFlight,
    targets: RwLock<Vec<Arc<dyn Evict>>>,
    pending: Mutex<HashMap<TableName, PendingTimer>>,
    next_id: AtomicU64,
    fired: AtomicU64,
    dropped: AtomicU64,
}

impl SchedulerInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<TableName, PendingTimer>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn targets(&self) -> Vec<Arc<dyn Evict>> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Timer `id` for `table` elapsed.
    fn fire(&self, table: &TableName, id: u64) {
        {
            let mut pending = self.pending();
            match pending.get(table) {
                Some(timer) if timer.id == id => {
                    pending.remove(table);
                }
                // Replaced or cancelled after the sleep finished.
                _ => return,
            }
        }

        if self.in_flight.is_busy(table) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                table = %table,
                in_flight = self.in_flight.count(table),
                "Table busy at invalidation time, dropping invalidation"
            );
            return;
        }

        self.evict(table);
        self.fired.fetch_add(1, Ordering::Relaxed);
        tracing::info!(table = %table, "Invalidated table caches");
    }

    fn evict(&self, table: &TableName) -> bool {
        let mut any = false;
        for target in self.targets() {
            any |= target.evict(table);
        }
        any
    }
}

/// Arms and fires per-table cache invalidations.
#[derive(Clone)]
pub struct InvalidationScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for InvalidationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationScheduler")
            .field("delay", &self.inner.delay)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl InvalidationScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                delay,
                in_flight: InFlight::default(),
                targets: RwLock::new(Vec::new()),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                fired: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// In-flight counts consulted at fire time.
    pub fn in_flight(&self) -> &InFlight {
        &self.inner.in_flight
    }

    /// Add a cache to clear on every invalidation.
    pub fn register(&self, target: Arc<dyn Evict>) {
        self.inner
            .targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target);
    }

    /// `Some(table)` arms a delayed invalidation of that table; `None`
    /// clears everything now and cancels every pending timer.
    pub fn invalidate(&self, table: Option<&TableName>) {
        match table {
            Some(table) => self.schedule(table),
            None => self.invalidate_all(),
        }
    }

    /// Arm (or re-arm) the timer for `table`.
    pub fn schedule(&self, table: &TableName) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let Ok(runtime) = Handle::try_current() else {
            // No runtime to host a timer; invalidate on the spot.
            tracing::debug!(table = %table, "No runtime for invalidation timer, firing now");
            self.cancel(table);
            if !self.inner.in_flight.is_busy(table) {
                self.inner.evict(table);
                self.inner.fired.fetch_add(1, Ordering::Relaxed);
            }
            return;
        };

        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let delay = self.inner.delay;
        let timer_table = table.clone();

        let mut pending = self.inner.pending();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire(&timer_table, id);
            }
        });
        let previous = pending.insert(
            table.clone(),
            PendingTimer {
                id,
                handle: task.abort_handle(),
            },
        );
        drop(pending);

        if let Some(previous) = previous {
            previous.handle.abort();
            tracing::debug!(table = %table, "Replaced pending invalidation");
        } else {
            tracing::debug!(table = %table, delay_ms = delay.as_millis() as u64, "Armed invalidation");
        }
    }

    /// Clear `table` from every cache immediately, cancelling its timer.
    pub fn evict_now(&self, table: &TableName) -> bool {
        self.cancel(table);
        self.inner.evict(table)
    }

    /// Clear every cache and cancel every pending timer.
    pub fn invalidate_all(&self) {
        let timers: Vec<PendingTimer> = self.inner.pending().drain().map(|(_, t)| t).collect();
        for timer in &timers {
            timer.handle.abort();
        }
        let mut cleared = 0;
        for target in self.inner.targets() {
            cleared += target.evict_all();
        }
        tracing::info!(
            cancelled_timers = timers.len(),
            cleared_entries = cleared,
            "Invalidated all caches"
        );
    }

    /// Cancel the pending timer for `table`, if any.
    pub fn cancel(&self, table: &TableName) -> bool {
        match self.inner.pending().remove(table) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn pending(&self, table: &TableName) -> bool {
        self.inner.pending().contains_key(table)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    /// Invalidations that cleared caches.
    pub fn fired(&self) -> u64 {
        self.inner.fired.load(Ordering::Relaxed)
    }

    /// Invalidations dropped because the table was busy.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}
