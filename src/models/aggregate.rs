//! Summary statistics over invocation records

use serde::{Deserialize, Serialize};

use super::record::InvocationRecord;
use crate::util::units::{
    format_cost, format_energy, format_megabytes, format_ms, format_percent, format_throughput,
};
use crate::{CapBenchError, Result};

/// Minimum successful runs before p95 is reported
pub const P95_MIN_SAMPLES: usize = 20;
/// Minimum successful runs before p99 is reported
pub const P99_MIN_SAMPLES: usize = 100;

/// Mean, median, spread and range of one optional field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    pub samples: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub total: f64,
}

impl FieldStats {
    /// `None` when no run reported the field
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));

        Some(Self {
            samples: values.len(),
            mean: mean(&values),
            median: percentile(&values, 50.0),
            std_dev: std_dev(&values),
            min: values[0],
            max: values[values.len() - 1],
            total: values.iter().sum(),
        })
    }
}

/// Statistics for one backend, optionally scoped to one input.
///
/// Distributional statistics only use successful runs; `count` includes
/// failures. End-to-end fields are zero when nothing succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStatistics {
    pub backend_id: String,
    pub input_id: Option<String>,
    /// Number of attempted runs
    pub count: usize,
    pub success_count: usize,
    pub failure_count: usize,

    pub e2e_mean_ms: f64,
    pub e2e_median_ms: f64,
    pub e2e_std_ms: f64,
    pub e2e_min_ms: f64,
    pub e2e_max_ms: f64,
    pub e2e_p90_ms: f64,
    pub e2e_p95_ms: Option<f64>,
    pub e2e_p99_ms: Option<f64>,

    /// Images per second derived from mean e2e
    pub throughput_mean: f64,
    /// Images per second derived from median e2e
    pub throughput_median: f64,

    pub inference_ms: Option<FieldStats>,
    pub peak_memory_mb: Option<FieldStats>,
    pub energy_mwh: Option<FieldStats>,
    pub cost_usd: Option<FieldStats>,
    pub tokens: Option<FieldStats>,
    pub text_length: Option<FieldStats>,

    /// Underlying records in submission order
    pub runs: Vec<InvocationRecord>,
}

/// Aggregate `runs` for `backend_id`.
///
/// Fails on an empty run list.
pub fn aggregate(
    backend_id: &str,
    runs: &[InvocationRecord],
    input_id: Option<&str>,
) -> Result<AggregateStatistics> {
    if runs.is_empty() {
        return Err(CapBenchError::AggregationError(format!(
            "Cannot aggregate an empty run list for {}",
            backend_id
        )));
    }

    let successful: Vec<&InvocationRecord> = runs.iter().filter(|r| r.success).collect();

    let mut e2e: Vec<f64> = successful.iter().map(|r| r.e2e_ms).collect();
    e2e.sort_by(|a, b| a.total_cmp(b));

    let (e2e_mean_ms, e2e_median_ms) = (mean(&e2e), percentile(&e2e, 50.0));
    let n = e2e.len();

    let field_stats = |f: fn(&InvocationRecord) -> Option<f64>| -> Option<FieldStats> {
        FieldStats::from_values(successful.iter().filter_map(|r| f(r)).collect())
    };

    Ok(AggregateStatistics {
        backend_id: backend_id.to_string(),
        input_id: input_id.map(str::to_string),
        count: runs.len(),
        success_count: n,
        failure_count: runs.len() - n,

        e2e_mean_ms,
        e2e_median_ms,
        e2e_std_ms: std_dev(&e2e),
        e2e_min_ms: e2e.first().copied().unwrap_or(0.0),
        e2e_max_ms: e2e.last().copied().unwrap_or(0.0),
        e2e_p90_ms: percentile(&e2e, 90.0),
        e2e_p95_ms: (n >= P95_MIN_SAMPLES).then(|| percentile(&e2e, 95.0)),
        e2e_p99_ms: (n >= P99_MIN_SAMPLES).then(|| percentile(&e2e, 99.0)),

        throughput_mean: per_second(e2e_mean_ms),
        throughput_median: per_second(e2e_median_ms),

        inference_ms: field_stats(|r| r.inference_ms),
        peak_memory_mb: field_stats(|r| r.peak_memory_mb),
        energy_mwh: field_stats(|r| r.energy_mwh),
        cost_usd: field_stats(|r| r.cost_usd),
        tokens: field_stats(|r| r.tokens.map(|t| t as f64)),
        text_length: field_stats(|r| Some(r.text_length() as f64)),

        runs: runs.to_vec(),
    })
}

impl AggregateStatistics {
    /// Fraction of attempted runs that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.count as f64
        }
    }

    /// Human-readable multi-line summary
    pub fn summary(&self) -> String {
        let mut out = format!("Backend: {}\n", self.backend_id);
        if let Some(input) = &self.input_id {
            out.push_str(&format!("Input: {}\n", input));
        }
        out.push_str(&format!(
            "Runs: {} (success {}, failure {}, {})\n",
            self.count,
            self.success_count,
            self.failure_count,
            format_percent(self.success_rate())
        ));
        out.push_str(&format!(
            "E2E: median {}, mean {} (±{}), p90 {}, range [{}, {}]\n",
            format_ms(self.e2e_median_ms),
            format_ms(self.e2e_mean_ms),
            format_ms(self.e2e_std_ms),
            format_ms(self.e2e_p90_ms),
            format_ms(self.e2e_min_ms),
            format_ms(self.e2e_max_ms)
        ));
        if let Some(p95) = self.e2e_p95_ms {
            out.push_str(&format!("E2E p95: {}\n", format_ms(p95)));
        }
        if let Some(p99) = self.e2e_p99_ms {
            out.push_str(&format!("E2E p99: {}\n", format_ms(p99)));
        }
        if let Some(inf) = &self.inference_ms {
            out.push_str(&format!(
                "Inference: median {}, mean {}\n",
                format_ms(inf.median),
                format_ms(inf.mean)
            ));
        }
        out.push_str(&format!(
            "Throughput: median {}, mean {}\n",
            format_throughput(self.throughput_median),
            format_throughput(self.throughput_mean)
        ));
        if let Some(mem) = &self.peak_memory_mb {
            out.push_str(&format!(
                "Memory: mean {}, peak {}\n",
                format_megabytes(mem.mean),
                format_megabytes(mem.max)
            ));
        }
        if let Some(energy) = &self.energy_mwh {
            out.push_str(&format!(
                "Energy: {} per run, {} total\n",
                format_energy(energy.mean),
                format_energy(energy.total)
            ));
        }
        if let Some(cost) = &self.cost_usd {
            out.push_str(&format!(
                "Cost: {} per run, {} total\n",
                format_cost(cost.mean),
                format_cost(cost.total)
            ));
        }
        if let Some(tokens) = &self.tokens {
            out.push_str(&format!(
                "Tokens: {:.1} mean, {:.0} total\n",
                tokens.mean, tokens.total
            ));
        }
        out
    }
}

/// Percentile of an ascending slice by linear interpolation between ranks.
///
/// Returns 0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = (lower + 1).min(n - 1);
            let fraction = rank - lower as f64;
            sorted[lower] + fraction * (sorted[upper] - sorted[lower])
        }
    }
}

/// Arithmetic mean; 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation; 0 for fewer than two values
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn per_second(ms: f64) -> f64 {
    if ms > 0.0 {
        1000.0 / ms
    } else {
        0.0
    }
}
