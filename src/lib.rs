//! capbench - captioning backend benchmark harness
//!
//! Runs repeatable measurement sessions against interchangeable captioning
//! backends (local inference engines and remote HTTP APIs), samples process
//! resources while each call runs, and reduces the raw runs into statistics.

use thiserror::Error;

pub mod backend;
pub mod bench;
pub mod config;
pub mod metrics;
pub mod models;
pub mod net;
pub mod simple;
pub mod util;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum CapBenchError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    /// Configuration validation or parsing error
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Benchmark execution error
    #[error("Benchmark error: {0}")]
    BenchmarkError(String),
    /// A backend could not be resolved or failed outside of a measured run
    #[error("Backend error: {0}")]
    BackendError(String),
    /// Outbound request failed after the retry ladder was exhausted
    #[error("Network error: {0}")]
    NetworkError(String),
    /// No API key available for a remote backend
    #[error("Credential error: {0}")]
    CredentialError(String),
    /// Statistics could not be computed
    #[error("Aggregation error: {0}")]
    AggregationError(String),
    /// Serialization of results failed
    #[error("Persistence error: {0}")]
    PersistenceError(String),
}

impl From<serde_json::Error> for CapBenchError {
    fn from(err: serde_json::Error) -> Self {
        CapBenchError::PersistenceError(format!("JSON serialization error: {}", err))
    }
}

impl From<toml::de::Error> for CapBenchError {
    fn from(err: toml::de::Error) -> Self {
        CapBenchError::ConfigError(format!("TOML parsing error: {}", err))
    }
}

impl From<toml::ser::Error> for CapBenchError {
    fn from(err: toml::ser::Error) -> Self {
        CapBenchError::ConfigError(format!("TOML serialization error: {}", err))
    }
}

impl From<reqwest::Error> for CapBenchError {
    fn from(err: reqwest::Error) -> Self {
        CapBenchError::NetworkError(err.to_string())
    }
}

/// Result type alias for capbench operations
pub type Result<T> = std::result::Result<T, CapBenchError>;

pub const APP_NAME: &str = "capbench";
pub const CONFIG_FILE: &str = "capbench.toml";
