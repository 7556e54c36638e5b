//! Metric-collection probes.
//!
//! Each probe yields a typed result or an explicit error; a missing or
//! unparsable measurement is always surfaced as [`ProbeError`], never turned
//! into a zero that could read as a healthy sample.
//!
//! The engine consumes probes through the [`ProbeRunner`] trait so tests can
//! substitute canned measurements for real subprocesses.

pub mod bandwidth;
pub mod ping;
pub mod system;

use std::fmt;

use async_trait::async_trait;

use crate::task::{BandwidthSpec, PingSpec};

pub use bandwidth::BandwidthStats;
pub use ping::PingStats;
pub use system::RamUsage;

/// Errors raised while collecting a metric.
#[derive(Debug)]
pub enum ProbeError {
    /// The probe subprocess exited unsuccessfully.
    CommandFailed { program: String, detail: String },

    /// The subprocess ran but its output did not contain the expected
    /// statistics.
    UnparseableOutput { program: String },

    /// The subprocess could not be spawned or awaited.
    Io(std::io::Error),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::CommandFailed { program, detail } => {
                write!(f, "{program} failed: {detail}")
            }
            ProbeError::UnparseableOutput { program } => {
                write!(f, "could not parse {program} output")
            }
            ProbeError::Io(err) => write!(f, "probe I/O error: {err}"),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProbeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        ProbeError::Io(err)
    }
}

/// The probe surface the task engine runs against.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn ping(&self, spec: &PingSpec) -> Result<PingStats, ProbeError>;

    async fn bandwidth(&self, spec: &BandwidthSpec) -> Result<BandwidthStats, ProbeError>;

    async fn cpu_percent(&self) -> Result<f32, ProbeError>;

    async fn ram_usage(&self) -> Result<RamUsage, ProbeError>;
}

/// CPU usage is measured as a delta over this window.
const CPU_SAMPLE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Probe runner backed by the host: ping/iperf3 subprocesses and sysinfo.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbes;

#[async_trait]
impl ProbeRunner for SystemProbes {
    async fn ping(&self, spec: &PingSpec) -> Result<PingStats, ProbeError> {
        ping::run(&spec.destination, spec.packet_count).await
    }

    async fn bandwidth(&self, spec: &BandwidthSpec) -> Result<BandwidthStats, ProbeError> {
        bandwidth::run(&spec.server, spec.port, spec.duration).await
    }

    async fn cpu_percent(&self) -> Result<f32, ProbeError> {
        Ok(system::cpu_percent(CPU_SAMPLE_INTERVAL).await)
    }

    async fn ram_usage(&self) -> Result<RamUsage, ProbeError> {
        Ok(system::ram_usage())
    }
}
