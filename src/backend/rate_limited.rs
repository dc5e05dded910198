use async_trait::async_trait;
use std::sync::Arc;

use super::{CaptionBackend, CaptionOutcome, ImageInput};
use crate::net::RateLimiter;
use crate::Result;

/// Throttles any backend through a shared token bucket.
///
/// Every `invoke` acquires one token before reaching the wrapped backend.
pub struct RateLimitedBackend<B> {
    inner: B,
    limiter: Arc<RateLimiter>,
}

impl<B: CaptionBackend> RateLimitedBackend<B> {
    pub fn new(inner: B, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }

    /// Wrap with the default remote limits
    pub fn with_default_limits(inner: B) -> Self {
        Self::new(inner, Arc::new(RateLimiter::default()))
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: CaptionBackend> CaptionBackend for RateLimitedBackend<B> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn invoke(&self, image: &ImageInput) -> Result<CaptionOutcome> {
        self.limiter.acquire().await;
        self.inner.invoke(image).await
    }

    fn cleanup(&self) {
        self.inner.cleanup()
    }
}
