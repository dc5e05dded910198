//! Energy sampling from battery telemetry
//!
//! Samples are collected on a dedicated thread. Energy is derived when the
//! sampler stops, trying instantaneous current first, then average current,
//! then the charge counter. A run without usable telemetry reports no
//! energy rather than zero.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::memory::STOP_TIMEOUT;
use crate::Result;

/// Default polling interval
pub const POWER_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);
/// Instantaneous samples needed for trapezoidal integration
pub const MIN_INSTANT_SAMPLES: usize = 3;

const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

/// One point-in-time telemetry read; any field may be missing
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerReading {
    /// Instantaneous current in microamperes
    pub current_now_ua: Option<i64>,
    /// Averaged current in microamperes
    pub current_avg_ua: Option<i64>,
    /// Remaining charge in microampere-hours
    pub charge_counter_uah: Option<i64>,
    /// Battery voltage in millivolts
    pub voltage_mv: Option<i64>,
}

/// Platform power telemetry
pub trait PowerTelemetry: Send + Sync {
    fn read(&self) -> PowerReading;
}

/// Telemetry source for machines without a battery
#[derive(Debug, Default)]
pub struct NoTelemetry;

impl PowerTelemetry for NoTelemetry {
    fn read(&self) -> PowerReading {
        PowerReading::default()
    }
}

/// Linux battery readings from `/sys/class/power_supply/BAT*`
#[derive(Debug, Clone)]
pub struct SysfsBatteryTelemetry {
    dir: PathBuf,
}

impl SysfsBatteryTelemetry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// First battery found under the power supply class, if any
    pub fn detect() -> Option<Self> {
        Self::detect_in(Path::new(POWER_SUPPLY_ROOT))
    }

    pub fn detect_in(root: &Path) -> Option<Self> {
        let mut batteries: Vec<PathBuf> = fs::read_dir(root)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("BAT"))
            .map(|entry| entry.path())
            .collect();
        batteries.sort();
        batteries.into_iter().next().map(Self::new)
    }

    fn read_value(&self, name: &str) -> Option<i64> {
        fs::read_to_string(self.dir.join(name))
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

impl PowerTelemetry for SysfsBatteryTelemetry {
    fn read(&self) -> PowerReading {
        PowerReading {
            current_now_ua: self.read_value("current_now").map(i64::abs),
            current_avg_ua: self.read_value("current_avg").map(i64::abs),
            charge_counter_uah: self.read_value("charge_now"),
            // sysfs reports microvolts
            voltage_mv: self.read_value("voltage_now").map(|uv| uv / 1000),
        }
    }
}

/// A reading tagged with seconds since sampling started
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSample {
    pub offset_secs: f64,
    pub reading: PowerReading,
}

struct ActiveSampling {
    stop_tx: mpsc::Sender<()>,
    samples_rx: mpsc::Receiver<Vec<PowerSample>>,
    handle: JoinHandle<()>,
    started: Instant,
}

/// Estimates energy consumed during one measured call
pub struct PowerSampler {
    telemetry: Arc<dyn PowerTelemetry>,
    interval: Duration,
    active: Option<ActiveSampling>,
}

impl PowerSampler {
    pub fn new(telemetry: Arc<dyn PowerTelemetry>) -> Self {
        Self {
            telemetry,
            interval: POWER_SAMPLE_INTERVAL,
            active: None,
        }
    }

    /// Sampler over the local battery, or a silent one without a battery
    pub fn detect() -> Self {
        match SysfsBatteryTelemetry::detect() {
            Some(battery) => Self::new(Arc::new(battery)),
            None => Self::new(Arc::new(NoTelemetry)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Begin sampling; a sampler that is already running is stopped first
    pub fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            warn!("power sampler restarted while running");
            self.stop();
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (samples_tx, samples_rx) = mpsc::channel::<Vec<PowerSample>>();
        let telemetry = Arc::clone(&self.telemetry);
        let interval = self.interval;
        let started = Instant::now();

        let handle = thread::Builder::new()
            .name("power-sampler".to_string())
            .spawn(move || {
                let mut samples = Vec::new();
                loop {
                    samples.push(PowerSample {
                        offset_secs: started.elapsed().as_secs_f64(),
                        reading: telemetry.read(),
                    });
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                let _ = samples_tx.send(samples);
            })?;

        self.active = Some(ActiveSampling {
            stop_tx,
            samples_rx,
            handle,
            started,
        });
        Ok(())
    }

    /// Stop sampling and return the energy in mWh, if it could be derived
    pub fn stop(&mut self) -> Option<f64> {
        let active = self.active.take()?;
        let elapsed_secs = active.started.elapsed().as_secs_f64();

        let _ = active.stop_tx.send(());
        let samples = match active.samples_rx.recv_timeout(STOP_TIMEOUT) {
            Ok(samples) => {
                let _ = active.handle.join();
                samples
            }
            Err(_) => {
                warn!("power sampler did not stop in time, energy unavailable");
                return None;
            }
        };

        let energy = estimate_energy_mwh(&samples, elapsed_secs);
        debug!(samples = samples.len(), energy_mwh = ?energy, "power sampling stopped");
        energy
    }
}

impl Drop for PowerSampler {
    fn drop(&mut self) {
        if self.active.is_some() {
            self.stop();
        }
    }
}

/// Derive energy from samples, trying each method in order of precision
pub fn estimate_energy_mwh(samples: &[PowerSample], elapsed_secs: f64) -> Option<f64> {
    from_instantaneous_current(samples)
        .or_else(|| from_average_current(samples, elapsed_secs))
        .or_else(|| from_charge_counter(samples))
}

fn positive(value: Option<i64>) -> Option<f64> {
    value.filter(|v| *v > 0).map(|v| v as f64)
}

fn from_instantaneous_current(samples: &[PowerSample]) -> Option<f64> {
    // (seconds, watts)
    let points: Vec<(f64, f64)> = samples
        .iter()
        .filter_map(|s| {
            let current_a = positive(s.reading.current_now_ua)? / 1_000_000.0;
            let voltage_v = positive(s.reading.voltage_mv)? / 1000.0;
            Some((s.offset_secs, current_a * voltage_v))
        })
        .collect();

    if points.len() < MIN_INSTANT_SAMPLES {
        return None;
    }

    let watt_seconds: f64 = points
        .windows(2)
        .map(|w| (w[0].1 + w[1].1) / 2.0 * (w[1].0 - w[0].0))
        .sum();
    let mwh = watt_seconds * 1000.0 / 3600.0;
    (mwh > 0.0).then_some(mwh)
}

fn from_average_current(samples: &[PowerSample], elapsed_secs: f64) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = samples
        .iter()
        .filter_map(|s| {
            Some((
                positive(s.reading.current_avg_ua)?,
                positive(s.reading.voltage_mv)?,
            ))
        })
        .collect();

    if pairs.is_empty() {
        return None;
    }

    let n = pairs.len() as f64;
    let current_a = pairs.iter().map(|p| p.0).sum::<f64>() / n / 1_000_000.0;
    let voltage_v = pairs.iter().map(|p| p.1).sum::<f64>() / n / 1000.0;
    let hours = elapsed_secs / 3600.0;

    let mwh = voltage_v * current_a * hours * 1000.0;
    (mwh > 0.0).then_some(mwh)
}

fn from_charge_counter(samples: &[PowerSample]) -> Option<f64> {
    let pairs: Vec<(i64, f64)> = samples
        .iter()
        .filter_map(|s| Some((s.reading.charge_counter_uah?, positive(s.reading.voltage_mv)?)))
        .collect();

    if pairs.len() < 2 {
        return None;
    }

    let first = pairs[0].0;
    let last = pairs[pairs.len() - 1].0;
    let delta_uah = (last - first).abs() as f64;
    let voltage_v = pairs.iter().map(|p| p.1).sum::<f64>() / pairs.len() as f64 / 1000.0;

    let mwh = delta_uah * voltage_v / 1000.0;
    (mwh > 0.0).then_some(mwh)
}
