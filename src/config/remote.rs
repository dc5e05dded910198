//! Remote backend definitions and the on-disk config file layout
//!
//! ```toml
//! [benchmark]
//! backend_ids = ["openai_cloud"]
//! runs_per_input = 5
//!
//! [[remote]]
//! id = "openai_cloud"
//! endpoint = "https://api.openai.com/v1/chat/completions"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [[throttle]]
//! id = "openai_cloud"
//! requests_per_second = 0.5
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{write_toml, BenchmarkConfig};
use crate::backend::{
    BackendCategory, BackendRegistry, EnvCredentialProvider, HttpCaptionBackend, PricingRule,
    PricingTable,
};
use crate::net::rate_limit::{DEFAULT_BURST_SIZE, DEFAULT_REQUESTS_PER_SECOND};
use crate::net::retry::DEFAULT_MAX_RETRIES;
use crate::net::{RateLimiter, RetryPolicy};
use crate::{CapBenchError, Result};

/// One OpenAI-compatible remote backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteBackendConfig {
    pub id: String,
    pub display_name: Option<String>,
    /// Full chat-completions URL
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub prompt: Option<String>,
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst_size: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Overrides the built-in pricing for this id
    pub pricing: Option<PricingRule>,
}

fn default_rps() -> f64 {
    DEFAULT_REQUESTS_PER_SECOND
}

fn default_burst() -> f64 {
    DEFAULT_BURST_SIZE
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl RemoteBackendConfig {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key_env: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key_env: api_key_env.into(),
            prompt: None,
            requests_per_second: default_rps(),
            burst_size: default_burst(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pricing: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(CapBenchError::ConfigError(
                "Remote backend id must not be blank".to_string(),
            ));
        }

        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(CapBenchError::ConfigError(format!(
                "Remote backend {} needs an http(s) endpoint, got {:?}",
                self.id, self.endpoint
            )));
        }

        if self.api_key_env.trim().is_empty() {
            return Err(CapBenchError::ConfigError(format!(
                "Remote backend {} needs an API key environment variable",
                self.id
            )));
        }

        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(CapBenchError::ConfigError(format!(
                "Remote backend {}: max backoff must not be below initial backoff",
                self.id
            )));
        }

        // Limiter parameters are validated by the limiter itself
        RateLimiter::new(self.requests_per_second, self.burst_size)?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_initial_backoff(Duration::from_millis(self.initial_backoff_ms))
            .with_max_backoff(Duration::from_millis(self.max_backoff_ms))
    }

    /// Build the backend with its own limiter and an environment credential
    pub fn build(&self) -> Result<HttpCaptionBackend> {
        self.validate()?;
        let limiter = RateLimiter::new(self.requests_per_second, self.burst_size)?;
        let credentials = Arc::new(EnvCredentialProvider::new(self.api_key_env.clone()));

        let mut backend =
            HttpCaptionBackend::new(&self.id, &self.endpoint, &self.model, credentials)?
                .with_rate_limiter(Arc::new(limiter))
                .with_retry_policy(self.retry_policy())
                .with_request_timeout(Duration::from_millis(self.request_timeout_ms));
        if let Some(prompt) = &self.prompt {
            backend = backend.with_prompt(prompt.clone());
        }
        Ok(backend)
    }
}

/// Whole-call rate limit applied to a registered backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub id: String,
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst_size: f64,
}

impl ThrottleConfig {
    pub fn limiter(&self) -> Result<RateLimiter> {
        RateLimiter::new(self.requests_per_second, self.burst_size)
    }
}

/// Everything stored in a capbench config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    #[serde(default)]
    pub remote: Vec<RemoteBackendConfig>,
    #[serde(default)]
    pub throttle: Vec<ThrottleConfig>,
}

impl ConfigFile {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CapBenchError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: Self = toml::from_str(&content).map_err(|e| {
            CapBenchError::ConfigError(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        file.validate()?;
        Ok(file)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;
        write_toml(path, self)
    }

    /// Load from the standard location; a missing file yields the default
    pub fn load() -> Result<Self> {
        let path = BenchmarkConfig::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn validate(&self) -> Result<()> {
        self.benchmark.validate()?;
        for (i, remote) in self.remote.iter().enumerate() {
            remote.validate()?;
            if self.remote[..i].iter().any(|r| r.id == remote.id) {
                return Err(CapBenchError::ConfigError(format!(
                    "Remote backend {} is defined twice",
                    remote.id
                )));
            }
        }
        for (i, throttle) in self.throttle.iter().enumerate() {
            throttle.limiter()?;
            if self.throttle[..i].iter().any(|t| t.id == throttle.id) {
                return Err(CapBenchError::ConfigError(format!(
                    "Backend {} is throttled twice",
                    throttle.id
                )));
            }
        }
        Ok(())
    }

    /// Register every remote backend and its pricing override
    pub fn register_remotes(
        &self,
        registry: &mut BackendRegistry,
        pricing: &mut PricingTable,
    ) -> Result<()> {
        for remote in &self.remote {
            let backend = remote.build()?;
            let name = remote
                .display_name
                .clone()
                .unwrap_or_else(|| format!("{} ({})", remote.id, remote.model));
            registry.register(Arc::new(backend), BackendCategory::Remote, name);

            if let Some(rule) = remote.pricing {
                pricing.insert(remote.id.clone(), rule);
            }
        }
        Ok(())
    }

    /// Wrap each throttled backend in its own limiter; the backend must
    /// already be registered
    pub fn apply_throttles(&self, registry: &mut BackendRegistry) -> Result<()> {
        for throttle in &self.throttle {
            registry
                .throttle(&throttle.id, Arc::new(throttle.limiter()?))
                .map_err(|e| CapBenchError::ConfigError(e.to_string()))?;
        }
        Ok(())
    }
}
