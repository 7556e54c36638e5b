//! Host CPU and RAM readings via sysinfo.

use std::time::Duration;

use sysinfo::System;

const BYTES_PER_GB: f64 = (1024 * 1024 * 1024) as f64;

/// RAM usage snapshot, sizes in GB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RamUsage {
    pub total_gb: f64,
    pub available_gb: f64,
    pub used_gb: f64,

    /// Used fraction in percent.
    pub percent: f64,
}

/// Average CPU usage across all cores over `interval`, in percent.
///
/// CPU usage is a delta between two refreshes, so the first refresh primes
/// the counters and the second, after the measurement interval, yields the
/// actual reading. Intervals below sysinfo's minimum are widened to it.
pub async fn cpu_percent(interval: Duration) -> f32 {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    tokio::time::sleep(interval.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)).await;
    sys.refresh_cpu_usage();

    let cpus = sys.cpus();
    if cpus.is_empty() {
        return 0.0;
    }
    cpus.iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / cpus.len() as f32
}

/// Current memory usage.
pub fn ram_usage() -> RamUsage {
    let mut sys = System::new();
    sys.refresh_memory();

    let total = sys.total_memory() as f64;
    let used = sys.used_memory() as f64;
    let available = sys.available_memory() as f64;

    RamUsage {
        total_gb: total / BYTES_PER_GB,
        available_gb: available / BYTES_PER_GB,
        used_gb: used / BYTES_PER_GB,
        percent: if total > 0.0 { used / total * 100.0 } else { 0.0 },
    }
}
