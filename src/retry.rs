use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the given failed attempt: base, 2x base, 4x base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Calls `op` until it succeeds, fails with a non-retryable error, or the attempt budget is
/// spent. Never retries an open circuit.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if !e.is_retryable() || attempt >= policy.max_attempts => {
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt,
                }
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                warn!(attempt, max = policy.max_attempts, ?delay, error = %e, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn fast(max: u32) -> RetryPolicy {
        RetryPolicy::new(max, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let outcome = run_with_retry(&fast(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::channel("telegram", "503"))
            } else {
                Ok("ok")
            }
        })
        .await;
        assert!(outcome.succeeded());
        assert_eq!(assert_ok!(outcome.result), "ok");
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn circuit_open_is_attempted_once() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = run_with_retry(&fast(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::CircuitOpen {
                service: "make".into(),
            })
        })
        .await;
        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let outcome: RetryOutcome<()> =
            run_with_retry(&fast(2), || async { Err(AppError::channel("make", "timeout")) }).await;
        assert_eq!(outcome.attempts, 2);
        assert_err!(outcome.result);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }
}
