//! Bounded retries for transient failures
//!
//! A [`RetryPolicy`] allows `retries` additional attempts after the first,
//! and only for errors where [`RpcError::is_transient`] holds. Between
//! attempts it waits according to its [`Backoff`].

use rand::Rng;
use relay_core_future::RpcError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay schedule between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Retry immediately
    None,
    /// Wait the same amount before every retry
    Constant(Duration),
    /// Grow the delay geometrically up to `max`
    Exponential {
        /// Delay before the first retry
        initial: Duration,
        /// Upper bound on any single delay
        max: Duration,
        /// Growth factor per retry
        multiplier: f64,
        /// Add up to this fraction of the delay as random jitter (0.0 - 1.0)
        jitter: f64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl Backoff {
    /// Delay to wait before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Constant(delay) => *delay,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
                jitter,
            } => {
                let exp = retry.saturating_sub(1).min(63) as i32;
                let base = initial.as_secs_f64() * multiplier.powi(exp);
                let capped = base.min(max.as_secs_f64());
                let spread = if *jitter > 0.0 {
                    rand::rng().random_range(0.0..=jitter.min(1.0)) * capped
                } else {
                    0.0
                };
                Duration::from_secs_f64((capped + spread).min(max.as_secs_f64()))
            }
        }
    }
}

/// How many times, and how patiently, to retry one logical call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub retries: u32,
    /// Wait between attempts
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Backoff::None,
        }
    }

    /// Total attempts a call may make
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Whether a call that just failed `attempt` (0-based) with `err` may go again
    pub fn should_retry(&self, attempt: u32, err: &RpcError) -> bool {
        err.is_transient() && attempt < self.retries
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts
///
/// The closure receives the 0-based attempt number so callers can vary the
/// target between attempts.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, RpcError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt, &e) => {
                attempt += 1;
                let delay = policy.backoff.delay(attempt);
                warn!(
                    "attempt {} of {} failed: {}; retrying in {:?}",
                    attempt,
                    policy.max_attempts(),
                    e,
                    delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn connect_failure() -> RpcError {
        RpcError::Connect {
            endpoint: "localhost:1".to_string(),
            reason: "refused".to_string(),
        }
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
            multiplier: 2.0,
            jitter: 0.0,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(350));
        assert_eq!(backoff.delay(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 1.0,
            jitter: 0.5,
        };
        for _ in 0..50 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_only_transient_errors_are_retried() {
        let policy = RetryPolicy {
            retries: 2,
            backoff: Backoff::None,
        };
        assert!(policy.should_retry(0, &connect_failure()));
        assert!(policy.should_retry(1, &RpcError::Timeout(Duration::from_secs(1))));
        assert!(!policy.should_retry(2, &connect_failure()));
        assert!(!policy.should_retry(0, &RpcError::application("bad input")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_transient_makes_k_plus_one_attempts() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            retries: 3,
            backoff: Backoff::Constant(Duration::from_millis(50)),
        };

        let result: Result<(), _> = retry(&policy, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(connect_failure()) }
        })
        .await;

        assert!(matches!(result, Err(RpcError::Connect { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_application_error_is_delivered_once() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            retries: 5,
            backoff: Backoff::None,
        };

        let result: Result<(), _> = retry(&policy, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(RpcError::application("handler failed")) }
        })
        .await;

        assert!(matches!(result, Err(RpcError::Application { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let policy = RetryPolicy {
            retries: 2,
            backoff: Backoff::None,
        };

        let result = retry(&policy, |attempt| async move {
            if attempt == 0 {
                Err(RpcError::Timeout(Duration::from_millis(5)))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
    }
}
