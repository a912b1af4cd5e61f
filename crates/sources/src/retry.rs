//! Bounded retries for auxiliary lookups. Only failures that may clear up
//! by themselves are retried; anything else is returned on the first try.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Wait before retry number `retry` (1-based): doubles each time, capped.
    pub fn backoff(&self, retry: usize) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub async fn run<F, Fut, T, E>(&self, lookup: &str, mut attempt: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut retries = 0;
        loop {
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(lookup, error = %err, "Lookup failed permanently");
                return Err(err);
            }
            if retries == self.max_retries {
                warn!(lookup, attempts = retries + 1, error = %err, "Lookup retries exhausted");
                return Err(err);
            }

            retries += 1;
            let wait = self.backoff(retries);
            warn!(
                lookup,
                retry = retries,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "Lookup failed, retrying"
            );
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(if self.0 { "temporary" } else { "permanent" })
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::new(5, 500, 1500);
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(1500));
        assert_eq!(policy.backoff(40), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_temporary_failures_exhaust_retries() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(2, 100, 1000);

        let result: Result<(), Flaky> = policy
            .run("location", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(true)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, 100, 1000);

        let result: Result<(), Flaky> = policy
            .run("location", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(false)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_later_attempt() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, 100, 1000);

        let result = policy
            .run("location", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 1 { Err(Flaky(true)) } else { Ok(n) } }
            })
            .await;

        assert_eq!(result.ok(), Some(1));
    }
}
