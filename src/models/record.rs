//! Per-invocation measurement record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Measurements from one invocation of one backend on one input.
///
/// A record with `success == false` always carries an error message and
/// reports zero end-to-end duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// Backend that produced this record
    pub backend_id: String,
    /// Input identifier, when the caller supplied one
    pub input_id: Option<String>,
    /// Zero-based repetition index within the input
    pub repetition: u32,
    /// Wall-clock time the invocation started
    pub timestamp: DateTime<Utc>,
    /// End-to-end duration in milliseconds
    pub e2e_ms: f64,
    /// Normalized inference duration in milliseconds
    pub inference_ms: Option<f64>,
    /// Peak resident memory increase in megabytes
    pub peak_memory_mb: Option<f64>,
    /// Energy consumed in milliwatt-hours; absent when unmeasured
    pub energy_mwh: Option<f64>,
    /// Estimated monetary cost in USD
    pub cost_usd: Option<f64>,
    /// Total tokens used or generated
    pub tokens: Option<u64>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    /// Produced caption
    pub text: String,
    /// Model reported by the backend
    pub model: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl InvocationRecord {
    /// A failed invocation carrying only its error message
    pub fn failure(
        backend_id: impl Into<String>,
        input_id: Option<String>,
        repetition: u32,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            input_id,
            repetition,
            timestamp,
            e2e_ms: 0.0,
            inference_ms: None,
            peak_memory_mb: None,
            energy_mwh: None,
            cost_usd: None,
            tokens: None,
            prompt_tokens: None,
            completion_tokens: None,
            text: String::new(),
            model: None,
            success: false,
            error: Some(message.into()),
        }
    }

    /// A successful invocation with only the required fields set
    pub fn success(
        backend_id: impl Into<String>,
        input_id: Option<String>,
        repetition: u32,
        timestamp: DateTime<Utc>,
        e2e_ms: f64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            input_id,
            repetition,
            timestamp,
            e2e_ms,
            inference_ms: None,
            peak_memory_mb: None,
            energy_mwh: None,
            cost_usd: None,
            tokens: None,
            prompt_tokens: None,
            completion_tokens: None,
            text: text.into(),
            model: None,
            success: true,
            error: None,
        }
    }

    /// Caption length in characters
    pub fn text_length(&self) -> usize {
        self.text.chars().count()
    }
}
