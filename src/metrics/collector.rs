//! Measurement of a single backend invocation

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::warn;

use super::memory::MemorySampler;
use super::power::PowerSampler;
use crate::backend::{
    keys, metadata_f64, metadata_str, metadata_u64, CaptionBackend, ImageInput, Metadata,
    PricingTable,
};
use crate::models::InvocationRecord;

/// Explicit inference totals, in order of preference
const TOTAL_KEYS: [&str; 2] = [keys::INFERENCE_MS, keys::HTTP_MS];
/// Sub-timings summed when no explicit total is reported
const PART_KEYS: [&str; 4] = [
    keys::VISION_ENC_MS,
    keys::TEXT_ENC_MS,
    keys::ENC_MS,
    keys::DEC_MS,
];

/// Normalize backend-reported timings into one inference duration
pub fn inference_ms(metadata: &Metadata) -> Option<f64> {
    if let Some(total) = TOTAL_KEYS.iter().find_map(|k| metadata_f64(metadata, k)) {
        return Some(total);
    }

    let parts: Vec<f64> = PART_KEYS
        .iter()
        .filter_map(|k| metadata_f64(metadata, k))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.iter().sum())
    }
}

/// Text carried by a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs one invocation under resource sampling and turns it into a record
pub struct RunCollector {
    pricing: PricingTable,
    memory: Option<MemorySampler>,
    power: Option<PowerSampler>,
}

impl RunCollector {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            memory: None,
            power: None,
        }
    }

    pub fn with_memory_sampler(mut self, sampler: MemorySampler) -> Self {
        self.memory = Some(sampler);
        self
    }

    pub fn with_power_sampler(mut self, sampler: PowerSampler) -> Self {
        self.power = Some(sampler);
        self
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Invoke `backend` once and build its record.
    ///
    /// Failures, panics and timeouts become failed records; nothing is
    /// propagated.
    pub async fn collect(
        &mut self,
        backend: &dyn CaptionBackend,
        image: &ImageInput,
        repetition: u32,
        limit: Duration,
    ) -> InvocationRecord {
        let backend_id = backend.id().to_string();
        let timestamp = Utc::now();

        self.start_samplers();
        let started = Instant::now();
        let invocation = AssertUnwindSafe(backend.invoke(image)).catch_unwind();
        let result = timeout(limit, invocation).await;
        let measured_ms = started.elapsed().as_secs_f64() * 1000.0;
        let (memory_mb, energy_mwh) = self.stop_samplers();

        let outcome = match result {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(e))) => {
                warn!(backend = %backend_id, repetition, error = %e, "invocation failed");
                return InvocationRecord::failure(
                    backend_id,
                    image.id.clone(),
                    repetition,
                    timestamp,
                    e.to_string(),
                );
            }
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                warn!(backend = %backend_id, repetition, error = %message, "backend panicked");
                return InvocationRecord::failure(
                    backend_id,
                    image.id.clone(),
                    repetition,
                    timestamp,
                    format!("Backend panicked: {}", message),
                );
            }
            Err(_) => {
                warn!(
                    backend = %backend_id,
                    repetition,
                    timeout_ms = limit.as_millis() as u64,
                    "invocation timed out"
                );
                return InvocationRecord::failure(
                    backend_id,
                    image.id.clone(),
                    repetition,
                    timestamp,
                    format!("Timed out after {} ms", limit.as_millis()),
                );
            }
        };

        let metadata = &outcome.metadata;
        let mut record = InvocationRecord::success(
            backend_id.clone(),
            image.id.clone(),
            repetition,
            timestamp,
            metadata_f64(metadata, keys::E2E_MS).unwrap_or(measured_ms),
            outcome.text.clone(),
        );
        record.inference_ms = inference_ms(metadata);
        record.peak_memory_mb = memory_mb;
        record.energy_mwh = energy_mwh;
        record.cost_usd = self.pricing.estimate(&backend_id, metadata);
        record.tokens = metadata_u64(metadata, keys::TOTAL_TOKENS)
            .or_else(|| metadata_u64(metadata, keys::TOKENS_GENERATED));
        record.prompt_tokens = metadata_u64(metadata, keys::PROMPT_TOKENS);
        record.completion_tokens = metadata_u64(metadata, keys::COMPLETION_TOKENS);
        record.model = metadata_str(metadata, keys::MODEL).map(str::to_string);
        record
    }

    fn start_samplers(&mut self) {
        if let Some(memory) = self.memory.as_mut() {
            if let Err(e) = memory.start() {
                warn!(error = %e, "could not start memory sampler");
            }
        }
        if let Some(power) = self.power.as_mut() {
            if let Err(e) = power.start() {
                warn!(error = %e, "could not start power sampler");
            }
        }
    }

    fn stop_samplers(&mut self) -> (Option<f64>, Option<f64>) {
        let memory = self.memory.as_mut().map(|m| m.stop());
        let energy = self.power.as_mut().and_then(|p| p.stop());
        (memory, energy)
    }
}
