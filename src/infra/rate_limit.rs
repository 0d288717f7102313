//! Token-bucket rate limiter.
//!
//! One bucket per provider smooths the outbound call rate to the refill
//! rate. `acquire` suspends until a token is available and observes
//! cancellation while waiting.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity (burst allowance).
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 5.0,
            refill_per_sec: 2.0,
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = config.capacity.max(1.0);
        Self {
            capacity,
            refill_per_sec: config.refill_per_sec.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available, else report how long until one exists.
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    /// Block until a token is available.
    pub async fn acquire(&self) {
        loop {
            match self.try_take() {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Block until a token is available or the scan is cancelled.
    pub async fn acquire_or_cancel(&self, cancel: &CancellationToken) -> AppResult<()> {
        loop {
            match self.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => {
                            return Err(AppError::Timeout("scan cancelled while rate limited".into()));
                        }
                    }
                }
            }
        }
    }

    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(capacity: f64, refill: f64) -> TokenBucket {
        TokenBucket::new(&RateLimitConfig {
            capacity,
            refill_per_sec: refill,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity_is_immediate() {
        let b = bucket(5.0, 1.0);
        let start = Instant::now();
        for _ in 0..5 {
            b.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_load_converges_to_refill_rate() {
        let b = bucket(5.0, 10.0);
        let start = Instant::now();
        // 105 acquisitions: 5 burst + 100 refilled at 10/s -> ~10s.
        for _ in 0..105 {
            b.acquire().await;
        }
        let elapsed = start.elapsed().as_secs_f64();
        let observed_rate = 100.0 / elapsed;
        assert!(
            (observed_rate - 10.0).abs() / 10.0 < 0.05,
            "observed {observed_rate:.2}/s"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_observes_cancellation() {
        let b = bucket(1.0, 0.1);
        b.acquire().await; // drain the bucket

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let waiter = tokio::spawn(async move {
            let b = bucket(1.0, 0.001);
            b.acquire().await; // drain
            b.acquire_or_cancel(&child).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(AppError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_over_time() {
        let b = bucket(2.0, 1.0);
        b.acquire().await;
        b.acquire().await;
        assert!(b.available() < 1.0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(b.available() >= 1.9);
    }
}
