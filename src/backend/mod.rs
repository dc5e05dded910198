//! Captioning backend abstraction
//!
//! A backend is any implementation that turns one image into a caption plus
//! free-form timing and usage metadata. Local inference engines and remote
//! APIs are injected through [`BackendRegistry`]; the benchmark engine only
//! ever talks to the [`CaptionBackend`] trait.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::net::RateLimiter;
use crate::{CapBenchError, Result};

pub mod credentials;
pub mod http;
pub mod pricing;
pub mod rate_limited;

pub use credentials::{CredentialProvider, EnvCredentialProvider, StaticCredentialProvider};
pub use http::HttpCaptionBackend;
pub use pricing::{PricingRule, PricingTable};
pub use rate_limited::RateLimitedBackend;

/// Free-form metadata reported by a backend alongside its caption
pub type Metadata = BTreeMap<String, Value>;

/// Recognized metadata keys
pub mod keys {
    pub const PRE_MS: &str = "pre_ms";
    pub const ENC_MS: &str = "enc_ms";
    pub const VISION_ENC_MS: &str = "vision_enc_ms";
    pub const TEXT_ENC_MS: &str = "text_enc_ms";
    pub const DEC_MS: &str = "dec_ms";
    pub const INFERENCE_MS: &str = "inference_ms";
    pub const HTTP_MS: &str = "http_ms";
    pub const POST_MS: &str = "post_ms";
    pub const E2E_MS: &str = "e2e_ms";
    pub const MODEL: &str = "model";
    pub const PROMPT_TOKENS: &str = "prompt_tokens";
    pub const COMPLETION_TOKENS: &str = "completion_tokens";
    pub const TOTAL_TOKENS: &str = "total_tokens";
    pub const TOKENS_GENERATED: &str = "tokens_generated";
    pub const COST_USD: &str = "cost_usd";
    pub const HTTP_STATUS: &str = "http_status";
    pub const RETRY_COUNT: &str = "retry_count";
}

/// Read a numeric metadata value
pub fn metadata_f64(metadata: &Metadata, key: &str) -> Option<f64> {
    metadata.get(key).and_then(Value::as_f64)
}

/// Read a non-negative integer metadata value
pub fn metadata_u64(metadata: &Metadata, key: &str) -> Option<u64> {
    metadata.get(key).and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
    })
}

/// Read a string metadata value
pub fn metadata_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(Value::as_str)
}

/// One benchmark input: opaque encoded image bytes plus an optional identifier
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub id: Option<String>,
    pub data: Arc<[u8]>,
}

impl ImageInput {
    pub fn new(id: Option<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Read an image file as raw bytes, using the file name as its id
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let id = path.file_name().map(|n| n.to_string_lossy().into_owned());
        Ok(Self::new(id, data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Caption text plus backend-reported metadata
#[derive(Debug, Clone, Default)]
pub struct CaptionOutcome {
    pub text: String,
    pub metadata: Metadata,
}

impl CaptionOutcome {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata value
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// The single capability the benchmark engine consumes
#[async_trait]
pub trait CaptionBackend: Send + Sync {
    /// Stable identifier used in configs and results
    fn id(&self) -> &str;

    /// Produce a caption for one image
    async fn invoke(&self, image: &ImageInput) -> Result<CaptionOutcome>;

    /// Release resources between runs; no-op unless a backend needs it
    fn cleanup(&self) {}
}

#[async_trait]
impl<T: CaptionBackend + ?Sized> CaptionBackend for Arc<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    async fn invoke(&self, image: &ImageInput) -> Result<CaptionOutcome> {
        (**self).invoke(image).await
    }

    fn cleanup(&self) {
        (**self).cleanup()
    }
}

/// Where a backend executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendCategory {
    Local,
    Remote,
}

impl BackendCategory {
    pub fn label(&self) -> &'static str {
        match self {
            BackendCategory::Local => "local",
            BackendCategory::Remote => "remote",
        }
    }
}

/// A registered backend and its descriptive information
#[derive(Clone)]
pub struct RegisteredBackend {
    pub backend: Arc<dyn CaptionBackend>,
    pub category: BackendCategory,
    pub display_name: String,
}

/// Backends available to a benchmark, keyed by id
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, RegisteredBackend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend; an existing backend with the same id is replaced
    pub fn register(
        &mut self,
        backend: Arc<dyn CaptionBackend>,
        category: BackendCategory,
        display_name: impl Into<String>,
    ) {
        let id = backend.id().to_string();
        self.backends.insert(
            id,
            RegisteredBackend {
                backend,
                category,
                display_name: display_name.into(),
            },
        );
    }

    pub fn register_local(&mut self, backend: Arc<dyn CaptionBackend>) {
        let name = backend.id().to_string();
        self.register(backend, BackendCategory::Local, name);
    }

    pub fn register_remote(&mut self, backend: Arc<dyn CaptionBackend>) {
        let name = backend.id().to_string();
        self.register(backend, BackendCategory::Remote, name);
    }

    /// Route every call of a registered backend through `limiter`
    pub fn throttle(&mut self, id: &str, limiter: Arc<RateLimiter>) -> Result<()> {
        let entry = self.backends.get_mut(id).ok_or_else(|| {
            CapBenchError::BackendError(format!("Cannot throttle unregistered backend {}", id))
        })?;
        let inner = Arc::clone(&entry.backend);
        entry.backend = Arc::new(RateLimitedBackend::new(inner, limiter));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredBackend> {
        self.backends.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    pub fn is_remote(&self, id: &str) -> bool {
        self.backends
            .get(id)
            .map(|b| b.category == BackendCategory::Remote)
            .unwrap_or(false)
    }

    pub fn display_name(&self, id: &str) -> String {
        self.backends
            .get(id)
            .map(|b| b.display_name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Registered ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.backends.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
