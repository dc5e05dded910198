//! Benchmark engine module
//!
//! Contains the orchestrator that drives backends over inputs and the
//! listener hooks it reports progress through.

pub mod progress;
pub mod runner;

// Re-export commonly used types
pub use progress::{BenchmarkEvent, ChannelListener, NoopListener, ProgressListener, ProgressUpdate};
pub use runner::BenchmarkRunner;
