//! Bounded exponential backoff for transient network failures

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Classified failure of a single outbound attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptError {
    /// HTTP 429, optionally with a server supplied `Retry-After`
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    /// HTTP 5xx
    Server { status: u16, message: String },
    /// The request timed out
    Timeout(String),
    /// Anything else; never retried
    Fatal(String),
}

impl AttemptError {
    /// Classify an HTTP status code that was not a success
    pub fn from_status(status: u16, retry_after: Option<Duration>, message: String) -> Self {
        match status {
            429 => AttemptError::RateLimited {
                retry_after,
                message,
            },
            500..=599 => AttemptError::Server { status, message },
            _ => AttemptError::Fatal(format!("HTTP {}: {}", status, message)),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::Fatal(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            AttemptError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::RateLimited { message, .. } => write!(f, "rate limited: {}", message),
            AttemptError::Server { status, message } => {
                write!(f, "server error {}: {}", status, message)
            }
            AttemptError::Timeout(msg) => write!(f, "timeout: {}", msg),
            AttemptError::Fatal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AttemptError {}

/// Result of running an operation through a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final attempt result; on failure this is the last error seen
    pub result: std::result::Result<T, AttemptError>,
    /// Number of retries performed after the first attempt
    pub retry_count: u32,
}

/// Retry configuration for outbound calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Backoff before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single wait
    pub max_backoff: Duration,
    /// Fraction of the backoff added as random jitter
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Backoff for the given retry index with `unit` in `[0, 1)` scaling the jitter
    pub fn backoff_with_unit(&self, retry_count: u32, unit: f64) -> Duration {
        let base_ms = self.initial_backoff.as_secs_f64() * 1000.0 * 2f64.powi(retry_count as i32);
        let jitter_ms = base_ms * self.jitter_factor * unit;
        let max_ms = self.max_backoff.as_secs_f64() * 1000.0;
        let wait_ms = (base_ms + jitter_ms).min(max_ms);
        Duration::from_secs_f64(wait_ms / 1000.0)
    }

    /// Backoff for the given retry index with random jitter
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let unit: f64 = rand::thread_rng().gen();
        self.backoff_with_unit(retry_count, unit)
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptError>>,
    {
        let mut retry_count = 0u32;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        retry_count,
                    }
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                return RetryOutcome {
                    result: Err(error),
                    retry_count,
                };
            }

            if retry_count >= self.max_retries {
                warn!(retries = retry_count, error = %error, "retry budget exhausted");
                return RetryOutcome {
                    result: Err(error),
                    retry_count,
                };
            }

            let wait = error
                .retry_after()
                .unwrap_or_else(|| self.backoff(retry_count));
            debug!(
                attempt = retry_count + 1,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "transient failure, retrying"
            );
            sleep(wait).await;
            retry_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_backoff_ladder() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff_with_unit(0, 0.0), Duration::from_millis(500));
        assert_eq!(policy.backoff_with_unit(1, 0.0), Duration::from_millis(1000));
        assert_eq!(policy.backoff_with_unit(2, 0.0), Duration::from_millis(2000));
        // 500ms * 2^10 is far above the 30s ceiling
        assert_eq!(policy.backoff_with_unit(10, 0.5), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let policy = RetryPolicy::default();

        for _ in 0..100 {
            let wait = policy.backoff(1);
            assert!(wait >= Duration::from_millis(1000));
            assert!(wait < Duration::from_millis(1100));
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            AttemptError::from_status(429, None, String::new()),
            AttemptError::RateLimited { .. }
        ));
        assert!(matches!(
            AttemptError::from_status(503, None, String::new()),
            AttemptError::Server { status: 503, .. }
        ));
        let fatal = AttemptError::from_status(401, None, "unauthorized".into());
        assert!(!fatal.is_retryable());
        assert!(fatal.to_string().contains("401"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let outcome = RetryPolicy::default()
            .execute(|| async { Ok::<_, AttemptError>(7) })
            .await;

        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honored() {
        let attempts = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = attempts.clone();
        let outcome = RetryPolicy::default()
            .execute(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AttemptError::RateLimited {
                            retry_after: Some(Duration::from_secs(2)),
                            message: "slow down".into(),
                        })
                    } else {
                        Ok("caption")
                    }
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), "caption");
        assert_eq!(outcome.retry_count, 1);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_exhaust_budget() {
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let outcome: RetryOutcome<()> = RetryPolicy::default()
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AttemptError::Server {
                        status: 502,
                        message: "bad gateway".into(),
                    })
                }
            })
            .await;

        assert_eq!(outcome.retry_count, DEFAULT_MAX_RETRIES);
        assert_eq!(attempts.load(Ordering::SeqCst), DEFAULT_MAX_RETRIES + 1);
        assert!(matches!(
            outcome.result,
            Err(AttemptError::Server { status: 502, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let outcome: RetryOutcome<()> = RetryPolicy::default()
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AttemptError::Fatal("bad request".into()))
                }
            })
            .await;

        assert_eq!(outcome.retry_count, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(outcome.result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried() {
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let outcome = RetryPolicy::default()
            .with_max_retries(1)
            .execute(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AttemptError::Timeout("read timed out".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.retry_count, 1);
    }
}
