//! Peak resident memory sampling
//!
//! A dedicated thread polls resident memory while a measured call runs and
//! reports the peak increase over the reading taken at start.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use sysinfo::{Pid, ProcessExt, System, SystemExt};
use tracing::{debug, warn};

use crate::util::units::bytes_to_mb;
use crate::Result;

/// Default polling interval
pub const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);
/// Longest `stop()` waits for the sampling thread
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Source of resident memory readings
pub trait MemoryProbe: Send + Sync {
    /// Current resident set size in bytes
    fn resident_bytes(&self) -> Option<u64>;
}

/// Resident memory of the current process via `sysinfo`
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|p| p.memory())
    }
}

struct ActiveSampling {
    stop_tx: mpsc::Sender<()>,
    peak_rx: mpsc::Receiver<u64>,
    handle: JoinHandle<()>,
    initial: u64,
}

/// Tracks the peak resident memory increase across one measured call
pub struct MemorySampler {
    probe: Arc<dyn MemoryProbe>,
    interval: Duration,
    active: Option<ActiveSampling>,
    last_increase_mb: f64,
}

impl MemorySampler {
    pub fn new(probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            probe,
            interval: MEMORY_SAMPLE_INTERVAL,
            active: None,
            last_increase_mb: 0.0,
        }
    }

    /// Sampler for the current process
    pub fn for_current_process() -> Self {
        Self::new(Arc::new(ProcessMemoryProbe::new()))
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
            warn!("memory sampler restarted while running");
            self.stop();
        }

        let initial = self.probe.resident_bytes().unwrap_or(0);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (peak_tx, peak_rx) = mpsc::channel::<u64>();
        let probe = Arc::clone(&self.probe);
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("memory-sampler".to_string())
            .spawn(move || {
                let mut peak = initial;
                loop {
                    if let Some(current) = probe.resident_bytes() {
                        peak = peak.max(current);
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                let _ = peak_tx.send(peak);
            })?;

        self.active = Some(ActiveSampling {
            stop_tx,
            peak_rx,
            handle,
            initial,
        });
        Ok(())
    }

    /// Stop sampling and return the peak increase in megabytes.
    ///
    /// Never negative. Without a running sampler this returns the last
    /// reported increase, which is 0 for a fresh sampler.
    pub fn stop(&mut self) -> f64 {
        let Some(active) = self.active.take() else {
            return self.last_increase_mb;
        };

        let _ = active.stop_tx.send(());
        let peak = match active.peak_rx.recv_timeout(STOP_TIMEOUT) {
            Ok(peak) => {
                let _ = active.handle.join();
                peak
            }
            Err(_) => {
                warn!("memory sampler did not stop in time, using a final reading");
                self.probe
                    .resident_bytes()
                    .unwrap_or(active.initial)
                    .max(active.initial)
            }
        };

        let increase = bytes_to_mb(peak.saturating_sub(active.initial));
        debug!(increase_mb = increase, "memory sampling stopped");
        self.last_increase_mb = increase;
        increase
    }
}

impl Drop for MemorySampler {
    fn drop(&mut self) {
        if self.active.is_some() {
            self.stop();
        }
    }
}
