//! Circuit breaker for provider resilience.
//!
//! CLOSED passes calls through and counts consecutive failures. OPEN rejects
//! everything until the recovery timeout, then HALF_OPEN admits one probe:
//! success closes the circuit, failure re-opens it. State is shared across
//! every ticker task hitting the same provider.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Admission check. OPEN circuits reject until the recovery timeout, at
    /// which point one probe passes in HALF_OPEN.
    fn admit(&self) -> AppResult<()> {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            let recovered = match inner.last_failure {
                Some(at) => at.elapsed() >= self.config.recovery_timeout,
                None => true,
            };
            if recovered {
                inner.state = CircuitState::HalfOpen;
                info!(circuit = %self.name, "entering half-open");
            } else {
                return Err(AppError::External(format!(
                    "circuit {} is open",
                    self.name
                )));
            }
        }
        Ok(())
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            info!(circuit = %self.name, "recovered");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        if inner.state == CircuitState::HalfOpen
            || inner.failure_count >= self.config.failure_threshold
        {
            if inner.state != CircuitState::Open {
                error!(
                    circuit = %self.name,
                    failures = inner.failure_count,
                    "opening circuit"
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    /// Run `op` under breaker protection. Contract-violation errors (NODATA,
    /// INVALID) are the remote answering correctly, so they do not count as
    /// breaker failures.
    pub async fn call<T, F, Fut>(&self, op: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.admit()?;
        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_retryable() {
                    self.on_failure();
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: recovery,
            },
        )
    }

    async fn failing(b: &CircuitBreaker) -> AppResult<()> {
        b.call(|| async { Err::<(), _>(AppError::External("boom".into())) })
            .await
            .map(|_| ())
    }

    async fn succeeding(b: &CircuitBreaker) -> AppResult<i32> {
        b.call(|| async { Ok(42) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_failures() {
        let b = breaker(3, Duration::from_secs(60));
        for _ in 0..3 {
            let _ = failing(&b).await;
        }
        assert_eq!(b.state(), CircuitState::Open);

        // Further calls are rejected without invoking the operation.
        let mut invoked = false;
        let result = b
            .call(|| {
                invoked = true;
                async { Ok(1) }
            })
            .await;
        assert!(result.is_err());
        assert!(!invoked);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_success_closes() {
        let b = breaker(2, Duration::from_secs(60));
        let _ = failing(&b).await;
        let _ = failing(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(succeeding(&b).await.unwrap(), 42);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_failure_reopens() {
        let b = breaker(2, Duration::from_secs(60));
        let _ = failing(&b).await;
        let _ = failing(&b).await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        let _ = failing(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_before_recovery_timeout() {
        let b = breaker(1, Duration::from_secs(60));
        let _ = failing(&b).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(succeeding(&b).await.is_err());
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(succeeding(&b).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_count() {
        let b = breaker(3, Duration::from_secs(60));
        let _ = failing(&b).await;
        let _ = failing(&b).await;
        let _ = succeeding(&b).await;
        let _ = failing(&b).await;
        let _ = failing(&b).await;
        // Never three consecutive: still closed.
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn nodata_does_not_trip_the_breaker() {
        let b = breaker(1, Duration::from_secs(60));
        let result: AppResult<()> = b
            .call(|| async { Err(AppError::NoData("no chain".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(b.state(), CircuitState::Closed);
    }
}
