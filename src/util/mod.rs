//! Utility functions module
//!
//! Contains helpers for formatting benchmark quantities.

pub mod units;

// Re-export commonly used functions
pub use units::{
    bytes_to_mb, format_cost, format_duration, format_energy, format_megabytes, format_ms,
    format_percent, format_throughput,
};
