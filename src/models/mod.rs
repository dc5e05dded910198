//! Data models module
//!
//! Per-invocation records, aggregate statistics, and the reports
//! assembled at the end of a benchmark run.

pub mod aggregate;
pub mod record;
pub mod result;

// Re-export commonly used types
pub use aggregate::{aggregate, AggregateStatistics, FieldStats};
pub use record::InvocationRecord;
pub use result::{BackendReport, BenchmarkOutcome, BenchmarkStatus, EnvironmentInfo};
