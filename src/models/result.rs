//! Benchmark result data models
//!
//! Per-backend reports, the assembled outcome of a whole run and the
//! environment it ran in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::{System, SystemExt};

use super::aggregate::AggregateStatistics;
use crate::config::BenchmarkConfig;
use crate::util::units::{bytes_to_mb, format_duration, format_percent};

/// Lifecycle of a benchmark run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BenchmarkStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BenchmarkStatus::Completed | BenchmarkStatus::Failed | BenchmarkStatus::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            BenchmarkStatus::NotStarted => "not started",
            BenchmarkStatus::Running => "running",
            BenchmarkStatus::Completed => "completed",
            BenchmarkStatus::Failed => "failed",
            BenchmarkStatus::Cancelled => "cancelled",
        }
    }
}

/// Everything measured for one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendReport {
    pub backend_id: String,
    pub display_name: String,
    /// Aggregate over every measured run; absent when nothing ran
    pub overall: Option<AggregateStatistics>,
    /// One aggregate per completed input, in input order
    pub per_input: Vec<AggregateStatistics>,
    pub inputs_attempted: usize,
    /// Inputs with at least one successful run
    pub inputs_succeeded: usize,
    pub errors: Vec<String>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// The consecutive error budget ended this backend early
    pub abandoned: bool,
}

impl BackendReport {
    pub fn new(backend_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            display_name: display_name.into(),
            overall: None,
            per_input: Vec::new(),
            inputs_attempted: 0,
            inputs_succeeded: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
            abandoned: false,
        }
    }

    pub fn inputs_failed(&self) -> usize {
        self.inputs_attempted - self.inputs_succeeded
    }

    /// Fraction of attempted inputs with at least one success
    pub fn success_rate(&self) -> f64 {
        if self.inputs_attempted == 0 {
            0.0
        } else {
            self.inputs_succeeded as f64 / self.inputs_attempted as f64
        }
    }

    pub fn total_runs(&self) -> usize {
        self.per_input.iter().map(|a| a.count).sum()
    }

    pub fn successful_runs(&self) -> usize {
        self.per_input.iter().map(|a| a.success_count).sum()
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} [{}]: {}/{} inputs ({}) in {}",
            self.display_name,
            self.backend_id,
            self.inputs_succeeded,
            self.inputs_attempted,
            format_percent(self.success_rate()),
            format_duration(self.duration)
        );
        if self.abandoned {
            out.push_str(" (abandoned)");
        }
        out.push('\n');
        if let Some(overall) = &self.overall {
            out.push_str(&overall.summary());
        }
        for error in &self.errors {
            out.push_str(&format!("  error: {}\n", error));
        }
        out
    }
}

/// Host description captured when the run starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub host_name: String,
    pub os_version: String,
    pub cpu_arch: String,
    pub cpu_count: usize,
    pub memory_total_mb: f64,
    pub memory_available_mb: f64,
}

impl EnvironmentInfo {
    /// Detect the current machine
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();

        Self {
            host_name: sys.host_name().unwrap_or_else(|| "unknown".to_string()),
            os_version: sys
                .long_os_version()
                .or_else(|| sys.os_version())
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            cpu_arch: std::env::consts::ARCH.to_string(),
            cpu_count: sys.cpus().len(),
            memory_total_mb: bytes_to_mb(sys.total_memory()),
            memory_available_mb: bytes_to_mb(sys.available_memory()),
        }
    }
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            host_name: "unknown".to_string(),
            os_version: std::env::consts::OS.to_string(),
            cpu_arch: std::env::consts::ARCH.to_string(),
            cpu_count: 0,
            memory_total_mb: 0.0,
            memory_available_mb: 0.0,
        }
    }
}

/// Complete result of one orchestrated run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkOutcome {
    pub config: BenchmarkConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Reports in execution order
    pub backends: Vec<BackendReport>,
    pub total_inputs: usize,
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub environment: EnvironmentInfo,
    pub status: BenchmarkStatus,
    pub error: Option<String>,
}

impl BenchmarkOutcome {
    /// Assemble an outcome, deriving the run totals from the reports
    pub fn new(
        config: BenchmarkConfig,
        started_at: DateTime<Utc>,
        backends: Vec<BackendReport>,
        total_inputs: usize,
        environment: EnvironmentInfo,
        status: BenchmarkStatus,
        error: Option<String>,
    ) -> Self {
        let total_runs: usize = backends.iter().map(BackendReport::total_runs).sum();
        let successful_runs: usize = backends.iter().map(BackendReport::successful_runs).sum();

        Self {
            config,
            started_at,
            finished_at: Utc::now(),
            backends,
            total_inputs,
            total_runs,
            successful_runs,
            failed_runs: total_runs - successful_runs,
            environment,
            status,
            error,
        }
    }

    pub fn backend(&self, backend_id: &str) -> Option<&BackendReport> {
        self.backends.iter().find(|b| b.backend_id == backend_id)
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} - {} - {} backends, {} inputs, {} runs ({} ok, {} failed) in {}\n",
            self.config.name,
            self.status.label(),
            self.backends.len(),
            self.total_inputs,
            self.total_runs,
            self.successful_runs,
            self.failed_runs,
            format_duration(self.duration())
        );
        out.push_str(&format!(
            "Host: {} ({}, {})\n",
            self.environment.host_name, self.environment.os_version, self.environment.cpu_arch
        ));
        if let Some(error) = &self.error {
            out.push_str(&format!("Error: {}\n", error));
        }
        for report in &self.backends {
            out.push('\n');
            out.push_str(&report.summary());
        }
        out
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
