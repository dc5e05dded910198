//! Resource sampling and per-run measurement
//!
//! Memory and power samplers run on their own threads while a backend call
//! is in flight; the collector combines their readings with timing and
//! backend metadata into an [`InvocationRecord`](crate::models::InvocationRecord).

pub mod collector;
pub mod memory;
pub mod power;

pub use collector::{inference_ms, RunCollector};
pub use memory::{MemoryProbe, MemorySampler, ProcessMemoryProbe};
pub use power::{
    estimate_energy_mwh, NoTelemetry, PowerReading, PowerSampler, PowerTelemetry,
    SysfsBatteryTelemetry,
};
