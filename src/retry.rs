//! Shared backoff strategy for every network-bound retry loop
//!
//! Submission, confirmation polling, reference fetches and the sponsor
//! round-trip all retry through the same [`BackoffPolicy`], which is selected
//! by the [`NetworkProfile`](crate::config::NetworkProfile) rather than
//! re-implemented per call site.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Errors that can tell a transient failure from a permanent one
pub trait Transient {
    /// `true` when retrying the same operation may succeed
    fn is_transient(&self) -> bool;
}

/// Exponential backoff with jitter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,

    /// Base delay in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    pub multiplier: f64,

    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Short delays for low-latency test networks
    pub fn test_network() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    /// Longer, gentler delays for a congested production network
    pub fn production() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    /// Delay before retry number `attempt` (0-indexed), or `None` once the
    /// attempt budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }
        Some(self.backoff(attempt))
    }

    /// Jittered exponential delay for `attempt`, ignoring the attempt budget.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms as f64 * self.multiplier.powi(attempt.min(30) as i32);
        let capped = exp.min(self.max_delay_ms as f64);

        // Add jitter to prevent thundering herd
        let jitter_range = capped * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be > 0".to_string());
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err("base_delay_ms must not exceed max_delay_ms".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("multiplier must be a finite value >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("jitter_factor must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

/// Retry an async operation according to `policy`.
///
/// Transient errors trigger a backoff and another attempt; permanent errors
/// are returned immediately. After the last attempt the final error is
/// returned unchanged.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    policy: &BackoffPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            debug!(
                operation = operation_name,
                attempt = attempt + 1,
                max_attempts = policy.max_attempts,
                "Retrying operation"
            );
        }

        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => {
                warn!(operation = operation_name, error = %err, "Permanent error, not retrying");
                return Err(err);
            }
            Err(err) => match policy.delay_for(attempt) {
                Some(backoff) => {
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient error, backing off before retry"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                None => {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "All retry attempts exhausted"
                    );
                    return Err(err);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("permanent")]
        Permanent,
    }

    impl Transient for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_errors() {
        let policy = BackoffPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = retry_with_backoff("test_op", &policy, || {
            let count = calls_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_permanent_error() {
        let policy = BackoffPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), TestError> = retry_with_backoff("test_op", &policy, || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Permanent) }
        })
        .await;

        assert!(matches!(result, Err(TestError::Permanent)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_all_attempts() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            ..BackoffPolicy::default()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), TestError> = retry_with_backoff("test_op", &policy, || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Transient) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            multiplier: 2.0,
            jitter_factor: 0.2,
        };

        let d0 = policy.backoff(0).as_millis();
        let d1 = policy.backoff(1).as_millis();
        let d2 = policy.backoff(2).as_millis();
        assert!((80..=120).contains(&d0));
        assert!((160..=240).contains(&d1));
        assert!((320..=480).contains(&d2));

        assert!(policy.backoff(20).as_millis() <= 2400);
        assert!(policy.delay_for(9).is_none());
    }

    #[test]
    fn test_policy_validation() {
        assert!(BackoffPolicy::production().validate().is_ok());
        assert!(BackoffPolicy::test_network().validate().is_ok());

        let bad = BackoffPolicy {
            base_delay_ms: 10_000,
            max_delay_ms: 100,
            ..BackoffPolicy::default()
        };
        assert!(bad.validate().is_err());
    }
}
