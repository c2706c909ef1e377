//! # Retry Policy
//!
//! Exponential backoff with jitter, shared by the action executor (transient
//! execution-layer failures) and the persistence paths (delegation store,
//! ledger sinks).
//!
//! ## Usage
//! ```ignore
//! let policy = RetryPolicy::default();
//! let hash = retry_async(&policy, "store_chain", || store.store(&hash, &chain), |_| true).await?;
//! ```

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff policy for bounded retries.
///
/// Delay for attempt `n` (0-based) is `initial_delay_ms * backoff_multiplier^n`,
/// capped at `max_delay_ms`, then spread by `±jitter_fraction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: u32,
    /// Delay before the second attempt (milliseconds)
    pub initial_delay_ms: u64,
    /// Maximum delay cap (milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff (e.g., 2.0 = doubling)
    pub backoff_multiplier: f64,
    /// Random jitter as fraction of delay (e.g., 0.1 = ±10%)
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy for storage round-trips: quick, few attempts.
    pub fn persistence() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 50,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }

    /// No waiting at all. Used by tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            jitter_fraction: 0.0,
        }
    }

    /// Attempts actually performed (never zero).
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Calculate backoff delay with jitter after the given failed attempt (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base_delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let jitter_range = capped_delay * self.jitter_fraction;
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_delay = (capped_delay + jitter).max(0.0) as u64;

        Duration::from_millis(final_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. Returns the last error on exhaustion.
pub async fn retry_async<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && is_retryable(&e) => {
                let delay = policy.calculate_delay(attempt - 1);
                warn!(
                    operation = operation,
                    attempt = attempt,
                    max_attempts = attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after failure"
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

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 500);
        assert_eq!(policy.max_delay_ms, 10_000);
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_backoff_calculation_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_fraction: 0.0,
        };

        assert_eq!(policy.calculate_delay(0).as_millis(), 1000);
        assert_eq!(policy.calculate_delay(1).as_millis(), 2000);
        assert_eq!(policy.calculate_delay(2).as_millis(), 4000);
        // 8000ms capped at 5000ms
        assert_eq!(policy.calculate_delay(3).as_millis(), 5000);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter_fraction: 0.1,
            initial_delay_ms: 1000,
            ..Default::default()
        };
        for _ in 0..50 {
            let ms = policy.calculate_delay(0).as_millis();
            assert!((900..=1100).contains(&ms), "delay {} outside jitter band", ms);
        }
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        assert_eq!(RetryPolicy::immediate(0).attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_async_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_async(
            &RetryPolicy::immediate(3),
            "test",
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("fail {}", n))
                    } else {
                        Ok(n)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_async_stops_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_async(
            &RetryPolicy::immediate(5),
            "test",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
            |e: &String| e != "fatal",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
