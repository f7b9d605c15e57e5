//! Retry with exponential backoff.
//!
//! Every outbound request runs under a [`RetryPolicy`]; the outcome records
//! how many attempts it took so callers can report retried fetches.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Random jitter range as a fraction of the delay (0.1 = ±10%).
    pub jitter_percent: f64,
    /// Total attempts including the first. Never less than 1.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Same policy without jitter, for deterministic timing.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_percent = 0.0;
        self
    }

    /// Delay before retry number `attempt + 1` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        // 2^31 is already far past any max_delay
        let exp = attempt.min(31) as i32;
        let base_ms = (initial_ms as f64 * self.backoff_factor.powi(exp)).min(max_ms as f64);

        let jitter = if self.jitter_percent > 0.0 && base_ms > 0.0 {
            let range = base_ms * self.jitter_percent.min(1.0);
            rand::thread_rng().gen_range(-range..=range)
        } else {
            0.0
        };

        Duration::from_millis((base_ms + jitter).max(0.0) as u64)
    }
}

/// Result of an operation run under a retry policy.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Attempts made, including the first.
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Run `operation` until it succeeds or the policy's attempts are used up.
pub async fn with_retry_outcome<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempts = attempt, "Request succeeded after retries");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    elapsed: start.elapsed(),
                };
            }
            Err(e) if attempt >= max_attempts => {
                debug!(attempts = attempt, error = %e, "Request failed after all attempts");
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt,
                    elapsed: start.elapsed(),
                };
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt - 1);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying request after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1)).without_jitter()
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            jitter_percent: 0.0,
            max_attempts: 5,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_range() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: 3,
        };
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0).as_millis();
            assert!((900..=1100).contains(&delay), "delay {delay}ms out of range");
        }
    }

    #[test]
    fn zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let outcome = with_retry_outcome(&fast_policy(3), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("connection reset")
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(outcome.result, Ok(7));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.retries(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let outcome: RetryOutcome<(), &str> = with_retry_outcome(&fast_policy(3), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("503")
        })
        .await;

        assert_eq!(outcome.result, Err("503"));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
