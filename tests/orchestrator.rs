//! End-to-end orchestration tests driven by scripted backends

use async_trait::async_trait;
use capbench::backend::{keys, BackendRegistry, CaptionBackend, CaptionOutcome, ImageInput};
use capbench::bench::{
    BenchmarkEvent, BenchmarkRunner, ChannelListener, NoopListener, ProgressListener,
};
use capbench::config::BenchmarkConfig;
use capbench::models::{aggregate, AggregateStatistics, BenchmarkStatus, EnvironmentInfo};
use capbench::{CapBenchError, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backend that succeeds or fails on every call with a fixed latency
struct Scripted {
    id: &'static str,
    fail: bool,
    latency_ms: f64,
    calls: AtomicU32,
}

impl Scripted {
    fn ok(id: &'static str, latency_ms: f64) -> Arc<Self> {
        Arc::new(Self {
            id,
            fail: false,
            latency_ms,
            calls: AtomicU32::new(0),
        })
    }

    fn failing(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id,
            fail: true,
            latency_ms: 0.0,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptionBackend for Scripted {
    fn id(&self) -> &str {
        self.id
    }

    async fn invoke(&self, _image: &ImageInput) -> Result<CaptionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CapBenchError::BackendError("model not loaded".into()));
        }
        Ok(CaptionOutcome::new("a dog on a beach")
            .with(keys::E2E_MS, self.latency_ms)
            .with(keys::INFERENCE_MS, self.latency_ms / 2.0)
            .with(keys::TOTAL_TOKENS, 12u64))
    }
}

/// Backend whose inference engine blows up on every call
struct Exploding {
    calls: AtomicU32,
}

#[async_trait]
impl CaptionBackend for Exploding {
    fn id(&self) -> &str {
        "exploding"
    }

    async fn invoke(&self, _image: &ImageInput) -> Result<CaptionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("tensor shape mismatch");
    }
}

fn runner(backends: &[Arc<Scripted>]) -> BenchmarkRunner {
    let backends: Vec<Arc<dyn CaptionBackend>> = backends
        .iter()
        .map(|b| b.clone() as Arc<dyn CaptionBackend>)
        .collect();
    runner_with(backends)
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
        .map(|i| ImageInput::new(Some(format!("photo-{}.jpg", i)), vec![0xFF, 0xD8, i as u8]))
        .collect()
}

fn config(ids: &[&str], runs: u32) -> BenchmarkConfig {
    BenchmarkConfig::new(ids.iter().copied())
        .with_warmup_runs(0)
        .with_runs_per_input(runs)
        .with_cooldown(Duration::ZERO)
}

/// Cancels the run once a given backend finishes a given input
struct CancelAt {
    backend_id: &'static str,
    input_index: usize,
    token: CancellationToken,
}

impl ProgressListener for CancelAt {
    fn on_input_complete(
        &self,
        backend_id: &str,
        input_index: usize,
        _stats: &AggregateStatistics,
    ) {
        if backend_id == self.backend_id && input_index == self.input_index {
            self.token.cancel();
        }
    }
}

#[tokio::test]
async fn test_failing_backend_is_abandoned_and_next_backend_runs() {
    let broken = Scripted::failing("broken");
    let healthy = Scripted::ok("healthy", 120.0);
    let runner = runner(&[broken.clone(), healthy.clone()]);

    let cfg = config(&["broken", "healthy"], 5).with_max_consecutive_errors(3);
    let outcome = runner.run(&cfg, &images(2), &NoopListener).await;

    assert_eq!(outcome.status, BenchmarkStatus::Completed);
    assert_eq!(broken.calls(), 3);
    assert_eq!(healthy.calls(), 10);

    let report = outcome.backend("broken").unwrap();
    assert!(report.abandoned);
    assert_eq!(report.inputs_attempted, 1);
    assert_eq!(report.inputs_succeeded, 0);
    assert!(report.errors.iter().any(|e| e.contains("model not loaded")));

    let overall = report.overall.as_ref().unwrap();
    assert_eq!(overall.count, 3);
    assert_eq!(overall.success_count, 0);
    assert_eq!(overall.e2e_mean_ms, 0.0);

    let healthy_report = outcome.backend("healthy").unwrap();
    assert_eq!(healthy_report.inputs_succeeded, 2);
    assert!((healthy_report.overall.as_ref().unwrap().e2e_mean_ms - 120.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_failing_backend_aborts_when_errors_are_fatal() {
    let healthy = Scripted::ok("healthy", 80.0);
    let broken = Scripted::failing("broken");
    let later = Scripted::ok("later", 80.0);
    let runner = runner(&[healthy.clone(), broken.clone(), later.clone()]);

    let cfg = config(&["healthy", "broken", "later"], 3).with_continue_on_error(false);
    let outcome = runner.run(&cfg, &images(2), &NoopListener).await;

    assert_eq!(outcome.status, BenchmarkStatus::Failed);
    assert_eq!(runner.status(), BenchmarkStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("broken"));
    assert_eq!(later.calls(), 0);

    // Reports gathered before the failure are kept
    assert_eq!(outcome.backends.len(), 2);
    assert_eq!(outcome.backends[0].backend_id, "healthy");
    assert_eq!(outcome.backends[0].inputs_succeeded, 2);
    assert!(!outcome.backends[1].abandoned);
}

#[tokio::test]
async fn test_cancellation_stops_at_next_input_boundary() {
    let first = Scripted::ok("first", 50.0);
    let second = Scripted::ok("second", 70.0);
    let runner = runner(&[first.clone(), second.clone()]);

    let listener = CancelAt {
        backend_id: "second",
        input_index: 1,
        token: runner.cancellation_token(),
    };
    let cfg = config(&["first", "second"], 2);
    let outcome = runner.run(&cfg, &images(5), &listener).await;

    assert_eq!(outcome.status, BenchmarkStatus::Cancelled);
    assert_eq!(runner.status(), BenchmarkStatus::Cancelled);
    assert!(outcome.error.is_none());

    assert_eq!(outcome.backends.len(), 2);
    assert_eq!(outcome.backend("first").unwrap().per_input.len(), 5);
    assert_eq!(outcome.backend("second").unwrap().per_input.len(), 2);
    assert_eq!(second.calls(), 4);
    assert_eq!(outcome.total_runs, 14);
}

#[tokio::test]
async fn test_invalid_config_never_invokes_backend() {
    let backend = Scripted::ok("solo", 10.0);
    let runner = runner(&[backend.clone()]);
    let (listener, mut rx) = ChannelListener::channel();

    let cfg = config(&["solo"], 0);
    let outcome = runner.run(&cfg, &images(1), &listener).await;

    assert_eq!(outcome.status, BenchmarkStatus::Failed);
    assert!(outcome.error.is_some());
    assert!(outcome.backends.is_empty());
    assert_eq!(backend.calls(), 0);

    // The runner never entered Running
    let mut saw_start = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, BenchmarkEvent::BenchmarkStarted { .. }) {
            saw_start = true;
        }
    }
    assert!(!saw_start);
}

#[tokio::test]
async fn test_duplicate_backend_ids_fail_validation() {
    let backend = Scripted::ok("solo", 10.0);
    let runner = runner(&[backend.clone()]);

    let outcome = runner
        .run(&config(&["solo", "solo"], 1), &images(1), &NoopListener)
        .await;

    assert_eq!(outcome.status, BenchmarkStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("more than once"));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_empty_inputs_fail_the_benchmark() {
    let backend = Scripted::ok("solo", 10.0);
    let runner = runner(&[backend.clone()]);

    let outcome = runner.run(&config(&["solo"], 1), &[], &NoopListener).await;

    assert_eq!(outcome.status, BenchmarkStatus::Failed);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_unregistered_backend_is_reported_and_skipped() {
    let backend = Scripted::ok("real", 10.0);
    let runner = runner(&[backend.clone()]);

    let outcome = runner
        .run(&config(&["ghost", "real"], 1), &images(1), &NoopListener)
        .await;

    assert_eq!(outcome.status, BenchmarkStatus::Completed);
    let ghost = outcome.backend("ghost").unwrap();
    assert!(ghost.overall.is_none());
    assert!(ghost.errors[0].contains("not registered"));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_channel_listener_sees_the_whole_run() {
    let backend = Scripted::ok("solo", 10.0);
    let runner = runner(&[backend]);
    let (listener, mut rx) = ChannelListener::channel();

    let outcome = runner.run(&config(&["solo"], 2), &images(2), &listener).await;
    assert_eq!(outcome.status, BenchmarkStatus::Completed);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(BenchmarkEvent::BenchmarkStarted { inputs: 2, .. })));
    assert_eq!(
        events.last(),
        Some(&BenchmarkEvent::Finished {
            status: BenchmarkStatus::Completed
        })
    );
    let runs = events
        .iter()
        .filter(|e| matches!(e, BenchmarkEvent::RunCompleted { success: true, .. }))
        .count();
    assert_eq!(runs, 4);
    let inputs = events
        .iter()
        .filter(|e| matches!(e, BenchmarkEvent::InputCompleted { .. }))
        .count();
    assert_eq!(inputs, 2);
}

#[tokio::test]
async fn test_status_changes_are_observable() {
    let runner = runner(&[Scripted::ok("solo", 10.0)]);
    let mut rx = runner.subscribe();
    assert_eq!(*rx.borrow(), BenchmarkStatus::NotStarted);

    runner.run(&config(&["solo"], 1), &images(1), &NoopListener).await;

    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), BenchmarkStatus::Completed);
}

#[tokio::test]
async fn test_reported_statistics_reaggregate_identically() {
    let runner = runner(&[Scripted::ok("solo", 42.0)]);
    let outcome = runner.run(&config(&["solo"], 3), &images(1), &NoopListener).await;

    let stats = &outcome.backend("solo").unwrap().per_input[0];
    let again = aggregate("solo", &stats.runs, stats.input_id.as_deref()).unwrap();
    assert_eq!(again.count, stats.count);
    assert_eq!(again.e2e_mean_ms, stats.e2e_mean_ms);
    assert_eq!(again.e2e_p90_ms, stats.e2e_p90_ms);
    assert_eq!(again.tokens.as_ref().unwrap().total, 36.0);
    assert!(again.e2e_p95_ms.is_none());
}

#[tokio::test]
async fn test_panicking_backend_is_contained() {
    let good = Scripted::ok("good", 30.0);
    let exploding = Arc::new(Exploding {
        calls: AtomicU32::new(0),
    });
    let runner = runner_with(vec![
        good.clone() as Arc<dyn CaptionBackend>,
        exploding.clone() as Arc<dyn CaptionBackend>,
    ]);

    let cfg = config(&["good", "exploding"], 5);
    let outcome = runner.run(&cfg, &images(2), &NoopListener).await;

    assert_eq!(outcome.status, BenchmarkStatus::Completed);
    assert_eq!(outcome.backend("good").unwrap().inputs_succeeded, 2);
    assert_eq!(exploding.calls.load(Ordering::SeqCst), 3);

    let report = outcome.backend("exploding").unwrap();
    assert!(report.abandoned);
    assert!(report.errors.iter().any(|e| e.contains("tensor shape mismatch")));
    assert_eq!(report.overall.as_ref().unwrap().failure_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_warmup_is_contained() {
    let good = Scripted::ok("good", 30.0);
    let exploding = Arc::new(Exploding {
        calls: AtomicU32::new(0),
    });
    let runner = runner_with(vec![
        exploding.clone() as Arc<dyn CaptionBackend>,
        good.clone() as Arc<dyn CaptionBackend>,
    ]);

    let cfg = config(&["exploding", "good"], 1)
        .with_warmup_runs(2)
        .with_continue_on_error(false);
    let outcome = runner.run(&cfg, &images(1), &NoopListener).await;

    // Two warmup calls, then the single measured run
    assert_eq!(exploding.calls.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.status, BenchmarkStatus::Completed);
    assert_eq!(good.calls(), 3);
    let report = outcome.backend("exploding").unwrap();
    assert_eq!(report.inputs_succeeded, 0);
    assert!(!report.abandoned);
}

#[tokio::test]
async fn test_progress_follows_backends_and_inputs() {
    let runner = runner(&[Scripted::ok("first", 10.0), Scripted::ok("second", 10.0)]);
    let (listener, mut rx) = ChannelListener::channel();

    runner
        .run(&config(&["first", "second"], 1), &images(3), &listener)
        .await;

    let mut progress = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let BenchmarkEvent::Progress(update) = event {
            assert_eq!(update.backends_total, 2);
            assert_eq!(update.inputs_total, 3);
            progress.push((update.backends_done, update.inputs_done));
        }
    }

    assert_eq!(
        progress,
        vec![
            (0, 1),
            (0, 2),
            (0, 3),
            (1, 0),
            (1, 1),
            (1, 2),
            (1, 3),
            (2, 0),
        ]
    );
}

#[tokio::test]
async fn test_progress_percentage_reaches_completion() {
    let runner = runner(&[Scripted::ok("first", 10.0), Scripted::ok("second", 10.0)]);
    let (listener, mut rx) = ChannelListener::channel();

    runner
        .run(&config(&["first", "second"], 1), &images(2), &listener)
        .await;

    let mut percentages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let BenchmarkEvent::Progress(update) = event {
            percentages.push(update.completion_percentage());
        }
    }

    let expected = [25.0, 50.0, 50.0, 75.0, 100.0, 100.0];
    assert_eq!(percentages.len(), expected.len());
    for (actual, expected) in percentages.iter().zip(expected) {
        assert!((actual - expected).abs() < 1e-9);
    }
}
