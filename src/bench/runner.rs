//! Benchmark orchestration
//!
//! Runs every configured backend over the supplied inputs, one repetition at
//! a time, applying warmup, cooldown, cancellation and the consecutive error
//! budget, and assembles the per-backend reports into a [`BenchmarkOutcome`].

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::progress::{ProgressListener, ProgressUpdate};
use crate::backend::{BackendRegistry, CaptionBackend, ImageInput, PricingTable, RegisteredBackend};
use crate::config::BenchmarkConfig;
use crate::metrics::collector::panic_message;
use crate::metrics::{
    MemoryProbe, MemorySampler, PowerSampler, PowerTelemetry, ProcessMemoryProbe, RunCollector,
    SysfsBatteryTelemetry,
};
use crate::models::{
    aggregate, BackendReport, BenchmarkOutcome, BenchmarkStatus, EnvironmentInfo,
};

/// Pause after warmup before measuring
pub const WARMUP_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Why a backend stopped before exhausting its inputs
#[derive(Debug)]
enum BackendStop {
    Cancelled,
    Failed(String),
}

/// Sequential benchmark orchestrator.
///
/// A runner can be queried for its status and cancelled from other tasks
/// while [`run`](Self::run) is in progress. Cancellation is permanent for
/// a runner; build a new one for another run.
pub struct BenchmarkRunner {
    registry: BackendRegistry,
    pricing: PricingTable,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
    power_telemetry: Option<Arc<dyn PowerTelemetry>>,
    environment: Option<EnvironmentInfo>,
    status: watch::Sender<BenchmarkStatus>,
    cancel: CancellationToken,
}

impl BenchmarkRunner {
    /// Runner measuring memory of this process and battery energy when present
    pub fn new(registry: BackendRegistry) -> Self {
        let power: Option<Arc<dyn PowerTelemetry>> = SysfsBatteryTelemetry::detect()
            .map(|battery| Arc::new(battery) as Arc<dyn PowerTelemetry>);
        let (status, _) = watch::channel(BenchmarkStatus::NotStarted);

        Self {
            registry,
            pricing: PricingTable::default(),
            memory_probe: Some(Arc::new(ProcessMemoryProbe::new())),
            power_telemetry: power,
            environment: None,
            status,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    pub fn with_power_telemetry(mut self, telemetry: Arc<dyn PowerTelemetry>) -> Self {
        self.power_telemetry = Some(telemetry);
        self
    }

    /// Disable both samplers regardless of the run configuration
    pub fn without_resource_sampling(mut self) -> Self {
        self.memory_probe = None;
        self.power_telemetry = None;
        self
    }

    /// Use a fixed environment description instead of detecting one
    pub fn with_environment(mut self, environment: EnvironmentInfo) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn status(&self) -> BenchmarkStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change
    pub fn subscribe(&self) -> watch::Receiver<BenchmarkStatus> {
        self.status.subscribe()
    }

    /// Request cancellation at the next backend or input boundary
    pub fn cancel(&self) {
        info!("benchmark cancellation requested");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_status(&self, status: BenchmarkStatus) {
        self.status.send_replace(status);
    }

    fn build_collector(&self, config: &BenchmarkConfig) -> RunCollector {
        let mut collector = RunCollector::new(self.pricing.clone());
        if config.monitor_memory {
            if let Some(probe) = &self.memory_probe {
                collector = collector.with_memory_sampler(MemorySampler::new(Arc::clone(probe)));
            }
        }
        if config.monitor_energy {
            if let Some(telemetry) = &self.power_telemetry {
                collector = collector.with_power_sampler(PowerSampler::new(Arc::clone(telemetry)));
            }
        }
        collector
    }

    /// Execute a full benchmark.
    ///
    /// Always returns an outcome; failures are reported through its status
    /// and error message, and completed reports are kept.
    pub async fn run(
        &self,
        config: &BenchmarkConfig,
        images: &[ImageInput],
        listener: &dyn ProgressListener,
    ) -> BenchmarkOutcome {
        let started_at = Utc::now();
        let environment = self
            .environment
            .clone()
            .unwrap_or_else(EnvironmentInfo::detect);

        if self.status() == BenchmarkStatus::Running {
            let message = "A benchmark is already running on this runner".to_string();
            warn!("{}", message);
            listener.on_error(None, &message);
            return BenchmarkOutcome::new(
                config.clone(),
                started_at,
                Vec::new(),
                0,
                environment,
                BenchmarkStatus::Failed,
                Some(message),
            );
        }

        let precondition = match config.validate() {
            Err(e) => Some(e.to_string()),
            Ok(()) if images.is_empty() => Some("No inputs supplied".to_string()),
            Ok(()) => None,
        };
        if let Some(message) = precondition {
            error!(error = %message, "benchmark not started");
            listener.on_error(None, &message);
            self.set_status(BenchmarkStatus::Failed);
            let outcome = BenchmarkOutcome::new(
                config.clone(),
                started_at,
                Vec::new(),
                0,
                environment,
                BenchmarkStatus::Failed,
                Some(message),
            );
            listener.on_benchmark_complete(&outcome);
            return outcome;
        }

        let inputs = &images[..images.len().min(config.max_inputs)];
        self.set_status(BenchmarkStatus::Running);
        info!(
            name = %config.name,
            backends = config.backend_ids.len(),
            inputs = inputs.len(),
            runs_per_input = config.runs_per_input,
            "benchmark started"
        );
        listener.on_benchmark_start(config, inputs.len());

        let mut collector = self.build_collector(config);
        let backends_total = config.backend_ids.len();
        let mut reports = Vec::with_capacity(backends_total);
        let mut stop = None;

        for (index, backend_id) in config.backend_ids.iter().enumerate() {
            if self.cancel.is_cancelled() {
                stop = Some(BackendStop::Cancelled);
                break;
            }

            listener.on_backend_start(backend_id, index, backends_total);

            let (report, backend_stop) = match self.registry.get(backend_id) {
                Some(entry) => {
                    self.run_backend(config, entry, inputs, index, &mut collector, listener)
                        .await
                }
                None => {
                    let message = format!("Backend not registered: {}", backend_id);
                    error!(backend = %backend_id, "{}", message);
                    listener.on_error(Some(backend_id), &message);

                    let mut report = BackendReport::new(backend_id.clone(), backend_id.clone());
                    report.errors.push(message.clone());
                    let backend_stop =
                        (!config.continue_on_error).then(|| BackendStop::Failed(message));
                    (report, backend_stop)
                }
            };

            listener.on_backend_complete(&report);
            listener.on_progress(&ProgressUpdate {
                backends_done: index + 1,
                backends_total,
                inputs_done: 0,
                inputs_total: inputs.len(),
            });
            reports.push(report);

            if backend_stop.is_some() {
                stop = backend_stop;
                break;
            }
        }

        let (status, message) = match stop {
            None => (BenchmarkStatus::Completed, None),
            Some(BackendStop::Cancelled) => (BenchmarkStatus::Cancelled, None),
            Some(BackendStop::Failed(message)) => (BenchmarkStatus::Failed, Some(message)),
        };

        let outcome = BenchmarkOutcome::new(
            config.clone(),
            started_at,
            reports,
            inputs.len(),
            environment,
            status,
            message,
        );
        self.set_status(status);

        info!(
            status = status.label(),
            runs = outcome.total_runs,
            successful = outcome.successful_runs,
            failed = outcome.failed_runs,
            "benchmark finished"
        );
        match status {
            BenchmarkStatus::Cancelled => listener.on_benchmark_cancelled(&outcome),
            _ => listener.on_benchmark_complete(&outcome),
        }
        outcome
    }

    async fn run_backend(
        &self,
        config: &BenchmarkConfig,
        entry: &RegisteredBackend,
        inputs: &[ImageInput],
        backend_index: usize,
        collector: &mut RunCollector,
        listener: &dyn ProgressListener,
    ) -> (BackendReport, Option<BackendStop>) {
        let started = Instant::now();
        let backend = entry.backend.as_ref();
        let backend_id = backend.id().to_string();
        let mut report = BackendReport::new(backend_id.clone(), entry.display_name.clone());
        let mut all_runs = Vec::new();
        let mut consecutive_failures = 0u32;
        let mut stop = None;

        info!(backend = %backend_id, category = entry.category.label(), "backend started");

        for (input_index, image) in inputs.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(backend = %backend_id, input = input_index, "benchmark cancelled");
                stop = Some(BackendStop::Cancelled);
                break;
            }

            if input_index == 0 && config.warmup_runs > 0 {
                warmup(backend, image, config).await;
            }

            listener.on_input_start(&backend_id, input_index, image.id.as_deref());
            report.inputs_attempted += 1;

            let mut runs = Vec::with_capacity(config.runs_per_input as usize);
            let mut budget_exhausted = false;
            for repetition in 0..config.runs_per_input {
                if repetition > 0 && config.cooldown_ms > 0 {
                    sleep(config.cooldown()).await;
                }

                let record = collector
                    .collect(backend, image, repetition, config.timeout())
                    .await;
                listener.on_run_complete(&record);

                if record.success {
                    consecutive_failures = 0;
                } else {
                    consecutive_failures += 1;
                    if let Some(message) = &record.error {
                        report.errors.push(format!(
                            "input {} run {}: {}",
                            image.id.as_deref().unwrap_or("?"),
                            repetition,
                            message
                        ));
                    }
                }
                runs.push(record);

                if consecutive_failures >= config.max_consecutive_errors {
                    budget_exhausted = true;
                    break;
                }
            }

            match aggregate(&backend_id, &runs, image.id.as_deref()) {
                Ok(stats) => {
                    if stats.success_count > 0 {
                        report.inputs_succeeded += 1;
                    }
                    listener.on_input_complete(&backend_id, input_index, &stats);
                    report.per_input.push(stats);
                }
                Err(e) => warn!(backend = %backend_id, error = %e, "input not aggregated"),
            }
            all_runs.extend(runs);

            listener.on_progress(&ProgressUpdate {
                backends_done: backend_index,
                backends_total: config.backend_ids.len(),
                inputs_done: input_index + 1,
                inputs_total: inputs.len(),
            });

            if budget_exhausted {
                let message = format!(
                    "{} failed {} times in a row",
                    backend_id, consecutive_failures
                );
                listener.on_error(Some(&backend_id), &message);
                report.errors.push(message.clone());

                if config.continue_on_error {
                    warn!(backend = %backend_id, "{}, abandoning backend", message);
                    report.abandoned = true;
                } else {
                    error!(backend = %backend_id, "{}, aborting benchmark", message);
                    stop = Some(BackendStop::Failed(message));
                }
                break;
            }
        }

        report.overall = aggregate(&backend_id, &all_runs, None).ok();
        report.duration = started.elapsed();
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| backend.cleanup())) {
            warn!(
                backend = %backend_id,
                error = %panic_message(payload.as_ref()),
                "backend cleanup panicked"
            );
        }

        info!(
            backend = %backend_id,
            inputs = report.inputs_attempted,
            succeeded = report.inputs_succeeded,
            abandoned = report.abandoned,
            "backend complete"
        );
        (report, stop)
    }
}

/// Unrecorded invocations that bring the backend to a steady state
async fn warmup(backend: &dyn CaptionBackend, image: &ImageInput, config: &BenchmarkConfig) {
    debug!(backend = backend.id(), runs = config.warmup_runs, "warming up");

    for run in 0..config.warmup_runs {
        let invocation = AssertUnwindSafe(backend.invoke(image)).catch_unwind();
        match timeout(config.timeout(), invocation).await {
            Ok(Ok(Ok(_))) => {}
            Ok(Ok(Err(e))) => warn!(backend = backend.id(), run, error = %e, "warmup run failed"),
            Ok(Err(payload)) => warn!(
                backend = backend.id(),
                run,
                error = %panic_message(payload.as_ref()),
                "warmup run panicked"
            ),
            Err(_) => warn!(backend = backend.id(), run, "warmup run timed out"),
        }
    }

    sleep(WARMUP_SETTLE_DELAY).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CaptionOutcome, Metadata};
    use crate::bench::progress::NoopListener;
    use crate::{CapBenchError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        id: &'static str,
        fail_every: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CaptionBackend for Flaky {
        fn id(&self) -> &str {
            self.id
        }

        async fn invoke(&self, _image: &ImageInput) -> Result<CaptionOutcome> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && n % self.fail_every == 0 {
                Err(CapBenchError::BackendError(format!("call {} failed", n)))
            } else {
                Ok(CaptionOutcome {
                    text: "a caption".into(),
                    metadata: Metadata::new(),
                })
            }
        }
    }

    fn runner_with(backends: Vec<Arc<dyn CaptionBackend>>) -> BenchmarkRunner {
        let mut registry = BackendRegistry::new();
        for backend in backends {
            registry.register_local(backend);
        }
        BenchmarkRunner::new(registry)
            .without_resource_sampling()
            .with_environment(EnvironmentInfo::default())
    }

    fn images(n: usize) -> Vec<ImageInput> {
        (0..n)
            .map(|i| ImageInput::new(Some(format!("img-{}", i)), vec![i as u8]))
            .collect()
    }

    fn config(ids: &[&str]) -> BenchmarkConfig {
        BenchmarkConfig::new(ids.iter().copied())
            .with_warmup_runs(0)
            .with_runs_per_input(2)
            .with_cooldown(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_completed_run_counts_every_repetition() {
        let backend = Arc::new(Flaky {
            id: "steady",
            fail_every: 0,
            calls: AtomicU32::new(0),
        });
        let runner = runner_with(vec![backend.clone() as Arc<dyn CaptionBackend>]);
        assert_eq!(runner.status(), BenchmarkStatus::NotStarted);

        let outcome = runner.run(&config(&["steady"]), &images(3), &NoopListener).await;

        assert_eq!(outcome.status, BenchmarkStatus::Completed);
        assert_eq!(runner.status(), BenchmarkStatus::Completed);
        assert_eq!(outcome.total_inputs, 3);
        assert_eq!(outcome.total_runs, 6);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 6);

        let report = outcome.backend("steady").unwrap();
        assert_eq!(report.per_input.len(), 3);
        assert_eq!(report.overall.as_ref().unwrap().count, 6);
        assert!(!report.abandoned);
    }

    #[tokio::test]
    async fn test_isolated_failures_do_not_exhaust_budget() {
        // Every third call fails; the streak never reaches three
        let backend = Arc::new(Flaky {
            id: "flaky",
            fail_every: 3,
            calls: AtomicU32::new(0),
        });
        let runner = runner_with(vec![backend as Arc<dyn CaptionBackend>]);

        let outcome = runner.run(&config(&["flaky"]), &images(4), &NoopListener).await;

        assert_eq!(outcome.status, BenchmarkStatus::Completed);
        assert_eq!(outcome.total_runs, 8);
        assert_eq!(outcome.failed_runs, 2);
        assert!(!outcome.backend("flaky").unwrap().abandoned);
    }

    #[tokio::test]
    async fn test_max_inputs_truncates() {
        let backend = Arc::new(Flaky {
            id: "steady",
            fail_every: 0,
            calls: AtomicU32::new(0),
        });
        let runner = runner_with(vec![backend as Arc<dyn CaptionBackend>]);

        let outcome = runner
            .run(&config(&["steady"]).with_max_inputs(2), &images(5), &NoopListener)
            .await;

        assert_eq!(outcome.total_inputs, 2);
        assert_eq!(outcome.backend("steady").unwrap().inputs_attempted, 2);
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let backend: Arc<dyn CaptionBackend> = Arc::new(Flaky {
            id: "steady",
            fail_every: 0,
            calls: AtomicU32::new(0),
        });
        let runner = runner_with(vec![backend]);
        runner.cancel();

        let outcome = runner.run(&config(&["steady"]), &images(1), &NoopListener).await;
        assert_eq!(outcome.status, BenchmarkStatus::Cancelled);
        assert!(outcome.backends.is_empty());
        assert!(outcome.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_warmup_is_not_recorded() {
        let backend = Arc::new(Flaky {
            id: "steady",
            fail_every: 0,
            calls: AtomicU32::new(0),
        });
        let runner = runner_with(vec![backend.clone() as Arc<dyn CaptionBackend>]);

        let outcome = runner
            .run(
                &config(&["steady"]).with_warmup_runs(3),
                &images(2),
                &NoopListener,
            )
            .await;

        // 3 warmup calls before the first input only, then 2 x 2 measured
        assert_eq!(backend.calls.load(Ordering::SeqCst), 7);
        assert_eq!(outcome.total_runs, 4);
    }
}
