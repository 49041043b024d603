//! Generic retry-with-backoff kernel.
//!
//! Parameterized over an async operation and a predicate that decides
//! whether a given failure is worth retrying.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total call budget: the function is invoked at most this many times
    /// in all (one initial call plus up to `max_attempts - 1` retries).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    /// One initial call plus up to 5 retries, so 6 total attempts.
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with no jitter: `base * 2^(attempt - 1)`, capped
    /// at `max_delay`. `attempt` is 1-based (the delay *before* attempt N+1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let scaled = self.base_delay.as_millis().saturating_mul(factor as u128);
        let capped = scaled.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

/// Retries `op` until it succeeds, `should_retry` rejects the error, or
/// `max_attempts` is exhausted. Returns the last error on exhaustion.
pub async fn retry_with_backoff<T, E, Op, Fut, ShouldRetry>(
    config: &RetryConfig,
    mut op: Op,
    should_retry: ShouldRetry,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    ShouldRetry: Fn(&E) -> bool,
{
    let mut attempt = 1u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= config.max_attempts || !should_retry(&err) {
                    return Err(err);
                }
                let delay = config.delay_for(attempt);
                warn!(attempt, ?delay, "retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps() {
        let cfg = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(cfg.delay_for(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(400));
        assert_eq!(cfg.delay_for(4), Duration::from_millis(800));
        assert_eq!(cfg.delay_for(5), Duration::from_secs(1));
        assert_eq!(cfg.delay_for(20), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn stops_retrying_once_should_retry_is_false() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };

        let result: Result<(), &str> = retry_with_backoff(
            &cfg,
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
            |_err| false,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };

        let result: Result<(), &str> = retry_with_backoff(
            &cfg,
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("transient") }
            },
            |_err| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };

        let result = retry_with_backoff(
            &cfg,
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                }
            },
            |_err| true,
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
