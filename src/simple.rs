use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{BackendRegistry, ImageInput, PricingTable};
use crate::bench::{BenchmarkEvent, BenchmarkRunner, ChannelListener};
use crate::config::ConfigFile;
use crate::models::BenchmarkOutcome;
use crate::util::units::format_ms;
use crate::Result;

/// Read every image file as raw bytes, keeping the given order.
pub fn load_images(paths: &[PathBuf]) -> Result<Vec<ImageInput>> {
    paths.iter().map(|p| ImageInput::from_path(p)).collect()
}

/// Build the backend registry and pricing table described by a config file.
pub fn build_registry(file: &ConfigFile) -> Result<(BackendRegistry, PricingTable)> {
    let mut registry = BackendRegistry::new();
    let mut pricing = PricingTable::default();
    file.register_remotes(&mut registry, &mut pricing)?;
    file.apply_throttles(&mut registry)?;
    Ok((registry, pricing))
}

/// Run the configured benchmark and stream progress to a terminal bar.
///
/// Ctrl-C cancels at the next input boundary.
pub async fn run_benchmark(file: &ConfigFile, images: &[ImageInput]) -> Result<BenchmarkOutcome> {
    let (registry, pricing) = build_registry(file)?;
    let runner = BenchmarkRunner::new(registry).with_pricing(pricing);
    let config = &file.benchmark;

    let total = (config.backend_ids.len() * images.len().min(config.max_inputs)) as u64;
    let pb = indicatif::ProgressBar::new(total);
    if let Ok(style) =
        indicatif::ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} ({eta}) {msg}")
    {
        pb.set_style(style);
    }

    let (listener, mut rx) = ChannelListener::channel();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                BenchmarkEvent::BackendStarted { backend_id, .. } => pb.set_message(backend_id),
                BenchmarkEvent::RunCompleted {
                    backend_id,
                    success,
                    e2e_ms,
                    ..
                } => {
                    if success {
                        pb.set_message(format!("{} {}", backend_id, format_ms(e2e_ms)));
                    }
                }
                BenchmarkEvent::Progress(progress) => {
                    let done =
                        progress.backends_done * progress.inputs_total + progress.inputs_done;
                    pb.set_position(done as u64);
                }
                BenchmarkEvent::Error { message, .. } => pb.println(format!("error: {}", message)),
                BenchmarkEvent::Finished { status } => pb.finish_with_message(status.label()),
                _ => {}
            }
        }
    });

    let token = runner.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let outcome = runner.run(config, images, &listener).await;
    drop(listener);
    handle.await.ok();
    ctrl_c.abort();
    Ok(outcome)
}

/// Load a config file, falling back to the standard location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile> {
    match path {
        Some(path) => ConfigFile::load_from(path),
        None => ConfigFile::load(),
    }
}
