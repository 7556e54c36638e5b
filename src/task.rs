//! Task payload types shared by the wire codec, the configuration loader and
//! the task engine.
//!
//! A task tells an agent which probes to run and which thresholds turn a
//! measurement into an alert. The same structure travels as the JSON tail of
//! a TASK frame and lives in the manager's task-configuration file.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Seconds between execution rounds when the task does not specify one.
const DEFAULT_ROUND_INTERVAL_SECS: u64 = 5;

/// One monitoring task as dispatched to a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Host-local metrics the agent should sample.
    #[serde(default)]
    pub metrics: DeviceMetrics,

    /// Link probes the agent should run against remote endpoints.
    #[serde(default)]
    pub link_metrics: LinkMetrics,

    /// Metric name → threshold. A measurement breaching its threshold
    /// triggers an immediate alert for that metric.
    #[serde(default)]
    pub alert_conditions: BTreeMap<String, f64>,

    /// Seconds to wait between execution rounds.
    #[serde(default = "default_round_interval")]
    pub interval: u64,
}

impl TaskSpec {
    /// Pause between execution rounds, so repeated probing does not saturate
    /// the links it is measuring.
    pub fn round_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Threshold configured for a metric, if any.
    pub fn threshold(&self, metric: &str) -> Option<f64> {
        self.alert_conditions.get(metric).copied()
    }
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            metrics: DeviceMetrics::default(),
            link_metrics: LinkMetrics::default(),
            alert_conditions: BTreeMap::new(),
            interval: default_round_interval(),
        }
    }
}

fn default_round_interval() -> u64 {
    DEFAULT_ROUND_INTERVAL_SECS
}

/// Which host-local metrics to sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceMetrics {
    #[serde(default)]
    pub cpu_usage: bool,
    #[serde(default)]
    pub ram_usage: bool,
}

/// Which link probes to run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinkMetrics {
    /// Latency probe (ping).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<PingSpec>,

    /// Throughput probe (iperf3 client).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<BandwidthSpec>,
}

/// Parameters for the latency probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingSpec {
    /// Host or address to ping.
    pub destination: String,

    /// Number of echo requests per round.
    pub packet_count: u32,
}

/// Parameters for the throughput probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthSpec {
    /// iperf3 server to test against.
    pub server: String,

    /// iperf3 server port.
    pub port: u16,

    /// Test duration in seconds.
    pub duration: u64,
}

/// Metric names accepted in `alert_conditions`.
pub mod metric {
    pub const CPU_USAGE: &str = "cpu_usage";
    pub const RAM_USAGE: &str = "ram_usage";
    pub const LATENCY: &str = "latency";
    pub const PACKET_LOSS: &str = "packet_loss";
    pub const BANDWIDTH: &str = "bandwidth";
}
