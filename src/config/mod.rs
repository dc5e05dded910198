//! Configuration management module
//!
//! Handles loading, saving, and validation of the benchmark run
//! configuration and the remote backend definitions stored beside it.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{CapBenchError, Result, APP_NAME, CONFIG_FILE};

pub mod remote;

pub use remote::{ConfigFile, RemoteBackendConfig, ThrottleConfig};

/// Smallest accepted per-call timeout
pub const MIN_TIMEOUT_MS: u64 = 1000;

/// Parameters of one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Label used in logs and summaries
    pub name: String,
    pub description: Option<String>,
    /// Backends to benchmark, in execution order
    pub backend_ids: Vec<String>,
    /// Measured repetitions per input
    pub runs_per_input: u32,
    /// Unrecorded repetitions before the first input of each backend
    pub warmup_runs: u32,
    /// Upper bound for a single invocation, in milliseconds
    pub timeout_ms: u64,
    /// Pause between repetitions, in milliseconds
    pub cooldown_ms: u64,
    /// Inputs beyond this count are ignored
    pub max_inputs: usize,
    /// Failures in a row that end a backend
    pub max_consecutive_errors: u32,
    /// Move on to the next backend instead of failing the whole run
    pub continue_on_error: bool,
    /// Sample peak memory during each invocation
    pub monitor_memory: bool,
    /// Sample energy during each invocation
    pub monitor_energy: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            name: APP_NAME.to_string(),
            description: None,
            backend_ids: Vec::new(),
            runs_per_input: 5,
            warmup_runs: 3,
            timeout_ms: 30_000,
            cooldown_ms: 100,
            max_inputs: 100,
            max_consecutive_errors: 3,
            continue_on_error: true,
            monitor_memory: true,
            monitor_energy: true,
        }
    }
}

impl BenchmarkConfig {
    /// Create a configuration for the given backends with default values
    pub fn new<I, S>(backend_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            backend_ids: backend_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Short run for development: little warmup, few inputs
    pub fn quick<I, S>(backend_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "quick".to_string(),
            warmup_runs: 1,
            runs_per_input: 2,
            max_inputs: 10,
            ..Self::new(backend_ids)
        }
    }

    /// Long run for publishable numbers
    pub fn thorough<I, S>(backend_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "thorough".to_string(),
            warmup_runs: 5,
            runs_per_input: 10,
            max_inputs: 100,
            ..Self::new(backend_ids)
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.backend_ids.is_empty() {
            return Err(CapBenchError::ConfigError(
                "At least one backend must be specified".to_string(),
            ));
        }

        if let Some(blank) = self.backend_ids.iter().find(|id| id.trim().is_empty()) {
            return Err(CapBenchError::ConfigError(format!(
                "Backend id must not be blank, got {:?}",
                blank
            )));
        }

        for (i, id) in self.backend_ids.iter().enumerate() {
            if self.backend_ids[..i].contains(id) {
                return Err(CapBenchError::ConfigError(format!(
                    "Backend {} is listed more than once",
                    id
                )));
            }
        }

        if self.runs_per_input < 1 {
            return Err(CapBenchError::ConfigError(
                "Runs per input must be at least 1".to_string(),
            ));
        }

        if self.timeout_ms < MIN_TIMEOUT_MS {
            return Err(CapBenchError::ConfigError(format!(
                "Timeout must be at least {} ms, got {} ms",
                MIN_TIMEOUT_MS, self.timeout_ms
            )));
        }

        if self.max_inputs < 1 {
            return Err(CapBenchError::ConfigError(
                "Maximum input count must be at least 1".to_string(),
            ));
        }

        if self.max_consecutive_errors < 1 {
            return Err(CapBenchError::ConfigError(
                "Maximum consecutive errors must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_runs_per_input(mut self, runs: u32) -> Self {
        self.runs_per_input = runs;
        self
    }

    pub fn with_warmup_runs(mut self, runs: u32) -> Self {
        self.warmup_runs = runs;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    pub fn with_max_inputs(mut self, max: usize) -> Self {
        self.max_inputs = max;
        self
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_monitoring(mut self, memory: bool, energy: bool) -> Self {
        self.monitor_memory = memory;
        self.monitor_energy = energy;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Load and validate a configuration from a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CapBenchError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            CapBenchError::ConfigError(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate and write the configuration as TOML
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;
        write_toml(path, self)
    }

    /// Get the standard configuration file path
    pub fn config_file_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            CapBenchError::ConfigError("Unable to determine config directory".to_string())
        })?;

        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}

pub(crate) fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                CapBenchError::ConfigError(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let content = toml::to_string_pretty(value)?;

    fs::write(path, content).map_err(|e| {
        CapBenchError::ConfigError(format!(
            "Failed to write config file {}: {}",
            path.display(),
            e
        ))
    })
}
