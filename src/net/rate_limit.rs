//! Token bucket rate limiting for outbound backend calls

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::{CapBenchError, Result};

/// Default sustained request rate for remote backends
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 2.0;
/// Default burst capacity for remote backends
pub const DEFAULT_BURST_SIZE: f64 = 1.0;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_request: Option<Instant>,
}

/// Token bucket limiter shared by every call made through one backend.
///
/// Tokens refill lazily at `requests_per_second` up to `burst_size`. The
/// internal lock only covers bookkeeping and is never held while waiting.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_second: f64,
    burst_size: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a limiter with the given sustained rate and burst capacity
    pub fn new(requests_per_second: f64, burst_size: f64) -> Result<Self> {
        if !(requests_per_second > 0.0) || !requests_per_second.is_finite() {
            return Err(CapBenchError::ConfigError(format!(
                "Rate limit must be a positive number of requests per second, got {}",
                requests_per_second
            )));
        }
        if !(burst_size >= 1.0) || !burst_size.is_finite() {
            return Err(CapBenchError::ConfigError(format!(
                "Burst size must be at least 1, got {}",
                burst_size
            )));
        }

        Ok(Self {
            requests_per_second,
            burst_size,
            state: Mutex::new(BucketState {
                tokens: burst_size,
                last_request: None,
            }),
        })
    }

    pub fn requests_per_second(&self) -> f64 {
        self.requests_per_second
    }

    pub fn burst_size(&self) -> f64 {
        self.burst_size
    }

    /// Wait until a token is available and consume it.
    ///
    /// Returns how long the caller was suspended.
    pub async fn acquire(&self) -> Duration {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some(last) = state.last_request {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            state.tokens = (state.tokens + elapsed * self.requests_per_second).min(self.burst_size);
        }

        let mut waited = Duration::ZERO;
        if state.tokens < 1.0 {
            waited = Duration::from_secs_f64((1.0 - state.tokens) / self.requests_per_second);
            drop(state);

            debug!(wait_ms = waited.as_millis() as u64, "rate limit reached, waiting for token");
            sleep(waited).await;

            state = self.state.lock().await;
            state.tokens = 1.0;
        }

        state.tokens -= 1.0;
        state.last_request = Some(Instant::now());
        waited
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            burst_size: DEFAULT_BURST_SIZE,
            state: Mutex::new(BucketState {
                tokens: DEFAULT_BURST_SIZE,
                last_request: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(RateLimiter::new(0.0, 1.0).is_err());
        assert!(RateLimiter::new(-1.0, 1.0).is_err());
        assert!(RateLimiter::new(f64::NAN, 1.0).is_err());
        assert!(RateLimiter::new(1.0, 0.5).is_err());
        assert!(RateLimiter::new(1.0, 1.0).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_immediate_acquire_waits_one_interval() {
        let limiter = RateLimiter::new(1.0, 1.0).unwrap();
        let start = Instant::now();

        assert_eq!(limiter.acquire().await, Duration::ZERO);
        let waited = limiter.acquire().await;

        assert!(waited >= Duration::from_millis(999));
        assert!(start.elapsed() >= Duration::from_millis(999));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_caller_does_not_wait() {
        let limiter = RateLimiter::new(1.0, 1.0).unwrap();

        limiter.acquire().await;
        sleep(Duration::from_secs(2)).await;

        assert_eq!(limiter.acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_allows_immediate_calls() {
        let limiter = RateLimiter::new(2.0, 3.0).unwrap();

        for _ in 0..3 {
            assert_eq!(limiter.acquire().await, Duration::ZERO);
        }

        let waited = limiter.acquire().await;
        assert!(waited >= Duration::from_millis(499));
        assert!(waited <= Duration::from_millis(501));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_rate_is_enforced() {
        let limiter = RateLimiter::new(4.0, 1.0).unwrap();
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        // first call is free, the remaining four are spaced by 250ms
        assert!(start.elapsed() >= Duration::from_millis(990));
    }
}
