//! Units formatting utilities
//!
//! Human-readable formatting for the quantities a captioning benchmark
//! reports: latencies, memory deltas, energy, monetary cost and throughput.

use std::time::Duration;

/// Format a latency given in milliseconds
///
/// # Examples
/// ```
/// use capbench::util::units::format_ms;
///
/// assert_eq!(format_ms(250.0), "250.00 ms");
/// assert_eq!(format_ms(1500.0), "1.50 s");
/// assert_eq!(format_ms(0.5), "500 μs");
/// ```
pub fn format_ms(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2} s", ms / 1000.0)
    } else if ms >= 1.0 {
        format!("{:.2} ms", ms)
    } else {
        format!("{:.0} μs", ms * 1000.0)
    }
}

/// Format a wall-clock duration
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use capbench::util::units::format_duration;
///
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 3600 {
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if total_secs >= 60 {
        let minutes = total_secs / 60;
        let seconds = total_secs % 60;
        format!("{}m {}s", minutes, seconds)
    } else if total_secs > 0 {
        if millis > 0 {
            format!("{}.{:02}s", total_secs, millis / 10)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        format!("{}ms", millis)
    }
}

/// Format a memory amount given in megabytes
///
/// # Examples
/// ```
/// use capbench::util::units::format_megabytes;
///
/// assert_eq!(format_megabytes(12.345), "12.3 MB");
/// assert_eq!(format_megabytes(2048.0), "2.00 GB");
/// ```
pub fn format_megabytes(mb: f64) -> String {
    if mb >= 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else {
        format!("{:.1} MB", mb)
    }
}

/// Format energy given in milliwatt-hours
pub fn format_energy(mwh: f64) -> String {
    if mwh >= 1000.0 {
        format!("{:.2} Wh", mwh / 1000.0)
    } else {
        format!("{:.3} mWh", mwh)
    }
}

/// Format a monetary cost in USD with enough precision for per-call prices
///
/// # Examples
/// ```
/// use capbench::util::units::format_cost;
///
/// assert_eq!(format_cost(0.0015), "$0.001500");
/// assert_eq!(format_cost(12.5), "$12.50");
/// ```
pub fn format_cost(usd: f64) -> String {
    if usd >= 1.0 {
        format!("${:.2}", usd)
    } else {
        format!("${:.6}", usd)
    }
}

/// Format throughput in images per second
pub fn format_throughput(images_per_sec: f64) -> String {
    format!("{:.2} img/s", images_per_sec)
}

/// Format a 0.0..=1.0 ratio as a percentage
///
/// # Examples
/// ```
/// use capbench::util::units::format_percent;
///
/// assert_eq!(format_percent(0.6667), "66.7%");
/// ```
pub fn format_percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Convert a byte count into megabytes (MiB)
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / 1_048_576.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(0.25), "250 μs");
        assert_eq!(format_ms(12.0), "12.00 ms");
        assert_eq!(format_ms(999.99), "999.99 ms");
        assert_eq!(format_ms(2500.0), "2.50 s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_format_megabytes() {
        assert_eq!(format_megabytes(0.0), "0.0 MB");
        assert_eq!(format_megabytes(512.3), "512.3 MB");
        assert_eq!(format_megabytes(1536.0), "1.50 GB");
    }

    #[test]
    fn test_format_energy() {
        assert_eq!(format_energy(0.125), "0.125 mWh");
        assert_eq!(format_energy(2500.0), "2.50 Wh");
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.0), "$0.000000");
        assert_eq!(format_cost(0.00015), "$0.000150");
        assert_eq!(format_cost(3.0), "$3.00");
    }

    #[test]
    fn test_format_throughput_and_percent() {
        assert_eq!(format_throughput(4.0), "4.00 img/s");
        assert_eq!(format_percent(1.0), "100.0%");
        assert_eq!(format_percent(0.0), "0.0%");
    }

    #[test]
    fn test_bytes_to_mb() {
        assert_eq!(bytes_to_mb(1_048_576), 1.0);
        assert_eq!(bytes_to_mb(0), 0.0);
    }
}
