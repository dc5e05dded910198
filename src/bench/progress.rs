//! Progress reporting hooks for benchmark runs

use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::BenchmarkConfig;
use crate::models::{
    AggregateStatistics, BackendReport, BenchmarkOutcome, BenchmarkStatus, InvocationRecord,
};

/// Position of a run within the backends x inputs grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub backends_done: usize,
    pub backends_total: usize,
    pub inputs_done: usize,
    pub inputs_total: usize,
}

impl ProgressUpdate {
    /// Get completion percentage (0.0 to 100.0)
    pub fn completion_percentage(&self) -> f64 {
        let total = self.backends_total * self.inputs_total;
        if total == 0 {
            return 0.0;
        }
        let done = self.backends_done * self.inputs_total + self.inputs_done;
        (done as f64 / total as f64 * 100.0).min(100.0)
    }
}

/// Observer of a benchmark run. Every hook defaults to a no-op.
pub trait ProgressListener: Send + Sync {
    fn on_benchmark_start(&self, _config: &BenchmarkConfig, _inputs: usize) {}
    fn on_backend_start(&self, _backend_id: &str, _index: usize, _total: usize) {}
    fn on_input_start(&self, _backend_id: &str, _input_index: usize, _input_id: Option<&str>) {}
    fn on_run_complete(&self, _record: &InvocationRecord) {}
    fn on_input_complete(
        &self,
        _backend_id: &str,
        _input_index: usize,
        _aggregate: &AggregateStatistics,
    ) {
    }
    fn on_backend_complete(&self, _report: &BackendReport) {}
    fn on_progress(&self, _progress: &ProgressUpdate) {}
    fn on_error(&self, _backend_id: Option<&str>, _message: &str) {}
    fn on_benchmark_complete(&self, _outcome: &BenchmarkOutcome) {}
    fn on_benchmark_cancelled(&self, _outcome: &BenchmarkOutcome) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ProgressListener for NoopListener {}

/// Owned form of each listener hook
#[derive(Debug, Clone, PartialEq)]
pub enum BenchmarkEvent {
    BenchmarkStarted {
        name: String,
        backends: usize,
        inputs: usize,
    },
    BackendStarted {
        backend_id: String,
        index: usize,
        total: usize,
    },
    InputStarted {
        backend_id: String,
        input_index: usize,
        input_id: Option<String>,
    },
    RunCompleted {
        backend_id: String,
        repetition: u32,
        success: bool,
        e2e_ms: f64,
    },
    InputCompleted {
        backend_id: String,
        input_index: usize,
        success_count: usize,
        count: usize,
    },
    BackendCompleted {
        backend_id: String,
        inputs_attempted: usize,
        inputs_succeeded: usize,
        abandoned: bool,
    },
    Progress(ProgressUpdate),
    Error {
        backend_id: Option<String>,
        message: String,
    },
    Finished {
        status: BenchmarkStatus,
    },
}

/// Forwards every hook into an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<BenchmarkEvent>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::UnboundedSender<BenchmarkEvent>) -> Self {
        Self { tx }
    }

    /// Listener plus the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BenchmarkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn emit(&self, event: BenchmarkEvent) {
        // A dropped receiver only means nobody is watching
        let _ = self.tx.send(event);
    }
}

impl ProgressListener for ChannelListener {
    fn on_benchmark_start(&self, config: &BenchmarkConfig, inputs: usize) {
        self.emit(BenchmarkEvent::BenchmarkStarted {
            name: config.name.clone(),
            backends: config.backend_ids.len(),
            inputs,
        });
    }

    fn on_backend_start(&self, backend_id: &str, index: usize, total: usize) {
        self.emit(BenchmarkEvent::BackendStarted {
            backend_id: backend_id.to_string(),
            index,
            total,
        });
    }

    fn on_input_start(&self, backend_id: &str, input_index: usize, input_id: Option<&str>) {
        self.emit(BenchmarkEvent::InputStarted {
            backend_id: backend_id.to_string(),
            input_index,
            input_id: input_id.map(str::to_string),
        });
    }

    fn on_run_complete(&self, record: &InvocationRecord) {
        self.emit(BenchmarkEvent::RunCompleted {
            backend_id: record.backend_id.clone(),
            repetition: record.repetition,
            success: record.success,
            e2e_ms: record.e2e_ms,
        });
    }

    fn on_input_complete(
        &self,
        backend_id: &str,
        input_index: usize,
        aggregate: &AggregateStatistics,
    ) {
        self.emit(BenchmarkEvent::InputCompleted {
            backend_id: backend_id.to_string(),
            input_index,
            success_count: aggregate.success_count,
            count: aggregate.count,
        });
    }

    fn on_backend_complete(&self, report: &BackendReport) {
        self.emit(BenchmarkEvent::BackendCompleted {
            backend_id: report.backend_id.clone(),
            inputs_attempted: report.inputs_attempted,
            inputs_succeeded: report.inputs_succeeded,
            abandoned: report.abandoned,
        });
    }

    fn on_progress(&self, progress: &ProgressUpdate) {
        self.emit(BenchmarkEvent::Progress(*progress));
    }

    fn on_error(&self, backend_id: Option<&str>, message: &str) {
        self.emit(BenchmarkEvent::Error {
            backend_id: backend_id.map(str::to_string),
            message: message.to_string(),
        });
    }

    fn on_benchmark_complete(&self, outcome: &BenchmarkOutcome) {
        self.emit(BenchmarkEvent::Finished {
            status: outcome.status,
        });
    }

    fn on_benchmark_cancelled(&self, outcome: &BenchmarkOutcome) {
        self.emit(BenchmarkEvent::Finished {
            status: outcome.status,
        });
    }
}
