//! Capped exponential backoff
//!
//! Used for store reads in the monitor and for redelivering events to a
//! failing bus handler. Only errors that report `is_retryable()` are retried.

use crate::config::RetryConfig;
use sdk::errors::{EngineError, VigilErrorExt};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Largest exponent applied to the initial delay
const MAX_EXPONENT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay to wait after the given failed attempt (1-based)
    ///
    /// Doubles per attempt starting at `initial_backoff`, never exceeding
    /// `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
///
/// The last error is returned unchanged.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after error: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(500));

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(&fast_policy(3), "read", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(EngineError::Database("locked".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(&fast_policy(5), "read", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::InvalidTimestamp("garbage".to_string()))
        })
        .await;

        assert!(matches!(result, Err(EngineError::InvalidTimestamp(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(&fast_policy(4), "read", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Timeout(10))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
