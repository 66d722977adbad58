//! Bounded exponential backoff for quota-limited remote calls.
//!
//! Every remote call in the crate goes through [`RetryExecutor::execute`], so
//! backoff policy lives in exactly one place. Only quota rejections are
//! retried; anything else is returned on the spot.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rollcall_core::{RetryConfig, StoreError, StoreResult};

use crate::remote::RemoteResult;

#[derive(Debug, Default)]
struct RetryCounters {
    retries: AtomicU64,
    exhausted: AtomicU64,
}

/// Retries quota failures with `initial_delay * 2^attempt` backoff.
///
/// Clones share their counters.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryConfig,
    counters: Arc<RetryCounters>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryConfig) -> Self {
        Self {
            policy,
            counters: Arc::new(RetryCounters::default()),
        }
    }

    pub fn policy(&self) -> &RetryConfig {
        &self.policy
    }

    /// An executor with a different policy that still reports into the same
    /// counters.
    pub fn with_policy(&self, policy: RetryConfig) -> Self {
        Self {
            policy,
            counters: Arc::clone(&self.counters),
        }
    }

    /// Backoff sleeps taken so far.
    pub fn retries(&self) -> u64 {
        self.counters.retries.load(Ordering::Relaxed)
    }

    /// Calls that ran out of retries on quota errors.
    pub fn exhausted(&self) -> u64 {
        self.counters.exhausted.load(Ordering::Relaxed)
    }

    /// Run `op`, retrying quota rejections.
    ///
    /// `operation` labels the call in logs and errors. Exhausting the retry
    /// budget yields [`StoreError::QuotaExceeded`]; any other failure yields
    /// [`StoreError::Remote`] after a single attempt.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(operation, attempts = attempt + 1, "Remote call recovered after backoff");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_quota() => {
                    if attempt >= self.policy.max_retries {
                        self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            operation,
                            attempts = attempt + 1,
                            error = %err,
                            "Quota retries exhausted"
                        );
                        return Err(StoreError::QuotaExceeded {
                            operation: operation.to_string(),
                            attempts: attempt + 1,
                            source: err,
                        });
                    }

                    let delay = self.policy.delay_for(attempt);
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Quota exceeded, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(StoreError::Remote {
                        operation: operation.to_string(),
                        source: err,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::RemoteError;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    fn stamped_failures(
        stamps: &Arc<Mutex<Vec<Instant>>>,
        error: RemoteError,
    ) -> impl FnMut() -> std::future::Ready<RemoteResult<()>> + '_ {
        move || {
            stamps.lock().unwrap().push(Instant::now());
            std::future::ready(Err(error.clone()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_shape_then_propagates() {
        let exec = RetryExecutor::new(RetryConfig {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: None,
        });
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let result = exec
            .execute("get_rows t", stamped_failures(&stamps, RemoteError::quota("limit")))
            .await;

        match result {
            Err(StoreError::QuotaExceeded { attempts, operation, .. }) => {
                assert_eq!(attempts, 4);
                assert_eq!(operation, "get_rows t");
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 4);
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        let expected = [1000u64, 2000, 4000];
        for (gap, want) in gaps.iter().zip(expected) {
            let want = Duration::from_millis(want);
            assert!(*gap >= want && *gap < want + Duration::from_millis(50), "{gap:?} vs {want:?}");
        }
        assert_eq!(exec.retries(), 3);
        assert_eq!(exec.exhausted(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_quota_error_not_retried() {
        let exec = RetryExecutor::default();
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let result = exec
            .execute(
                "save_row t",
                stamped_failures(&stamps, RemoteError::with_status(403, "forbidden")),
            )
            .await;

        assert!(matches!(result, Err(StoreError::Remote { .. })));
        assert_eq!(stamps.lock().unwrap().len(), 1);
        assert_eq!(exec.retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_quota() {
        let exec = RetryExecutor::default();
        let calls = Arc::new(Mutex::new(0u32));
        let start = Instant::now();

        let value = exec
            .execute("list_tables", || {
                let calls = Arc::clone(&calls);
                async move {
                    let mut n = calls.lock().unwrap();
                    *n += 1;
                    if *n < 3 {
                        Err(RemoteError::message("Quota exceeded for quota metric"))
                    } else {
                        Ok(*n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        // 1s + 2s of backoff before the third attempt.
        assert!(start.elapsed() >= Duration::from_millis(3000));
        assert!(start.elapsed() < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_fails_fast() {
        let exec = RetryExecutor::default().with_policy(RetryConfig {
            max_retries: 0,
            initial_delay_ms: 1000,
            max_delay_ms: None,
        });
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let result = exec
            .execute("has_data t", stamped_failures(&stamps, RemoteError::quota("limit")))
            .await;
        assert!(matches!(result, Err(StoreError::QuotaExceeded { attempts: 1, .. })));
        assert_eq!(stamps.lock().unwrap().len(), 1);
    }
}
