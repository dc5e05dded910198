//! Outbound call policies shared by remote backends
//!
//! Token bucket throttling and bounded retry with backoff.

pub mod rate_limit;
pub mod retry;

pub use rate_limit::RateLimiter;
pub use retry::{AttemptError, RetryOutcome, RetryPolicy};
