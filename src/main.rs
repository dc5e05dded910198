use capbench::models::BenchmarkStatus;
use capbench::simple::{load_config, load_images, run_benchmark};
use capbench::{CapBenchError, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: capbench <config.toml> <image>...";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("capbench=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args_os().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| CapBenchError::ConfigError(USAGE.to_string()))?;
    let image_paths: Vec<PathBuf> = args.map(PathBuf::from).collect();
    if image_paths.is_empty() {
        return Err(CapBenchError::ConfigError(USAGE.to_string()));
    }

    let file = load_config(Some(&config_path))?;
    let images = load_images(&image_paths)?;

    let outcome = run_benchmark(&file, &images).await?;
    println!("{}", outcome.summary());

    match outcome.status {
        BenchmarkStatus::Failed => Err(CapBenchError::BenchmarkError(
            outcome.error.unwrap_or_else(|| "benchmark failed".to_string()),
        )),
        _ => Ok(()),
    }
}
