use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::errors::CapabilityError;

/// Bounded exponential backoff for transient capability errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_attempts: u32,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            backoff_coefficient: 2.0,
            max_attempts: 3,
            max_interval: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Each attempt is bounded by `limit`; an elapsed attempt is dropped
    /// (cancelling the call) and counts as a transient timeout.
    pub async fn run<T, F, Fut>(&self, operation: &str, limit: Duration, mut call: F) -> Result<T, CapabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(limit, call()).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::Timeout {
                    operation: operation.to_string(),
                    after: limit,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = attempts,
                        "Transient failure, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_secs(2),
            backoff_coefficient: 2.0,
            max_attempts: 10,
            max_interval: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
        assert_eq!(policy.delay_after(4), Duration::from_secs(10));
        assert_eq!(policy.delay_after(60), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();

        let counter = Arc::clone(&calls);
        let result = policy
            .run("execute", Duration::from_secs(5), || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CapabilityError::Network("reset".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = RetryPolicy::default()
            .run("snapshot", Duration::from_secs(5), || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CapabilityError::Workspace("gone".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(CapabilityError::Workspace(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = RetryPolicy::default()
            .run("validate", Duration::from_secs(5), || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CapabilityError::Process("exit 1".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(CapabilityError::Process(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_calls_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let result: Result<(), _> = policy
            .run("execute", Duration::from_secs(5), || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CapabilityError::Network("reset".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(CapabilityError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let result: Result<(), _> = policy
            .run("execute", Duration::from_secs(1), || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;

        match result {
            Err(CapabilityError::Timeout { operation, after }) => {
                assert_eq!(operation, "execute");
                assert_eq!(after, Duration::from_secs(1));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
