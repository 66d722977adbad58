//! Short-lived idempotence guard for user-triggered writes.
//!
//! Chat front-ends redeliver button presses and users double-tap. An event
//! key seen within the window is reported as already applied instead of
//! being written twice.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn seen(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `key` and return `true`, or return `false` if it was already
    /// recorded within the window.
    pub fn check_and_mark(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen();
        seen.retain(|_, at| now.duration_since(*at) < self.window);
        if seen.contains_key(key) {
            tracing::debug!(key, "Duplicate event within dedup window");
            return false;
        }
        seen.insert(key.to_string(), now);
        true
    }

    /// Forget `key` so a retry of the same event can proceed.
    pub fn release(&self, key: &str) -> bool {
        self.seen().remove(key).is_some()
    }

    /// Whether `key` is recorded and unexpired.
    pub fn contains(&self, key: &str) -> bool {
        self.seen()
            .get(key)
            .is_some_and(|at| at.elapsed() < self.window)
    }

    /// Drop expired keys. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut seen = self.seen();
        let before = seen.len();
        seen.retain(|_, at| at.elapsed() < self.window);
        before - seen.len()
    }

    /// Keys currently held, expired ones included until the next purge.
    pub fn len(&self) -> usize {
        self.seen().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_within_window() {
        let dedup = DedupWindow::new(Duration::from_secs(5));
        assert!(dedup.check_and_mark("checkin:emp1:2025-01-01"));
        assert!(!dedup.check_and_mark("checkin:emp1:2025-01-01"));
        assert!(dedup.check_and_mark("checkin:emp2:2025-01-01"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_window() {
        let dedup = DedupWindow::new(Duration::from_secs(5));
        assert!(dedup.check_and_mark("k"));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!dedup.contains("k"));
        assert!(dedup.check_and_mark("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_allows_retry() {
        let dedup = DedupWindow::new(Duration::from_secs(5));
        assert!(dedup.check_and_mark("k"));
        assert!(dedup.release("k"));
        assert!(dedup.check_and_mark("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let dedup = DedupWindow::new(Duration::from_secs(5));
        dedup.check_and_mark("a");
        tokio::time::advance(Duration::from_secs(3)).await;
        dedup.check_and_mark("b");
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(dedup.purge_expired(), 1);
        assert_eq!(dedup.len(), 1);
        assert!(dedup.contains("b"));
    }
}
