//! Retry with exponential backoff.
//!
//! Sits above the circuit breaker: transient kinds (RATELIMIT, TIMEOUT,
//! EXTERNAL) back off and retry; contract violations fail immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based): base * 2^attempt plus
    /// up to 10% jitter so a burst of tickers does not retry in lockstep.
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.0..base * 0.1);
        Duration::from_secs_f64(base + jitter)
    }
}

/// DBERROR policy: retried once, then propagated. Only plain `Db` errors
/// qualify; a replicated-store `Conflict` must surface so the caller
/// re-reads and re-applies instead of blindly re-running the same write.
pub fn retry_db_once<T, F>(label: &str, mut op: F) -> AppResult<T>
where
    F: FnMut() -> AppResult<T>,
{
    match op() {
        Err(AppError::Db(first)) => {
            warn!(label, error = %first, "db error, retrying once");
            op()
        }
        other => other,
    }
}

pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let attempts = config.max_retries + 1;
    let mut last_err = None;

    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    debug!(label, error = %err, "permanent error, not retrying");
                    return Err(err);
                }
                if attempt + 1 >= attempts {
                    warn!(label, attempts, error = %err, "exhausted retries");
                    return Err(err);
                }
                let delay = config.delay_for(attempt);
                debug!(
                    label,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient error, backing off"
                );
                last_err = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| AppError::External(format!("{label}: retries exhausted"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_try_without_delay() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&config(), "quote", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, AppError>(1) }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&config(), "chain", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::Timeout("deadline".into()))
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
    async fn permanent_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: AppResult<i32> = retry_with_backoff(&config(), "history", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::NoData("no earnings".into())) }
        })
        .await;
        assert!(matches!(result, Err(AppError::NoData(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: AppResult<i32> = retry_with_backoff(&config(), "sentiment", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::RateLimit("429".into())) }
        })
        .await;
        assert!(matches!(result, Err(AppError::RateLimit(_))));
        // 1 initial + 3 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn db_error_retried_exactly_once() {
        let calls = AtomicU32::new(0);
        let result = retry_db_once("job_status", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(AppError::Db("locked".into()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn db_error_propagates_after_second_failure() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = retry_db_once("budget", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Db("still locked".into()))
        });
        assert!(matches!(result, Err(AppError::Db(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn conflict_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = retry_db_once("replica", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Conflict("generation moved".into()))
        });
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_db_errors_pass_through_untouched() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = retry_db_once("history", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::NoData("no rows".into()))
        });
        assert!(matches!(result, Err(AppError::NoData(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles() {
        let cfg = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        };
        // Jitter adds at most 10%.
        for (attempt, floor_secs) in [(0u32, 2.0f64), (1, 4.0), (2, 8.0)] {
            let d = cfg.delay_for(attempt).as_secs_f64();
            assert!(d >= floor_secs && d < floor_secs * 1.1, "attempt {attempt}: {d}");
        }
    }
}
