//! Latency probe: runs the system `ping` utility and parses its summary.

use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;
use tracing::trace;

use super::ProbeError;

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d+(?:\.\d+)?) ms").unwrap());
static LOSS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)% packet loss").unwrap());
static STATS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"min/avg/max/mdev = ([\d.]+)/([\d.]+)/([\d.]+)/([\d.]+)").unwrap()
});

/// Parsed `ping` statistics for one round.
#[derive(Debug, Clone, PartialEq)]
pub struct PingStats {
    /// Individual round-trip times, in milliseconds.
    pub times: Vec<f64>,

    /// Packet loss in percent.
    pub packet_loss: f64,

    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub mdev_ms: f64,
}

/// Ping `destination` with `packet_count` echo requests.
pub async fn run(destination: &str, packet_count: u32) -> Result<PingStats, ProbeError> {
    let output = Command::new("ping")
        .arg(destination)
        .arg("-c")
        .arg(packet_count.to_string())
        .output()
        .await?;

    if !output.status.success() {
        return Err(ProbeError::CommandFailed {
            program: "ping".into(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    trace!("ping {destination}: {} bytes of output", stdout.len());

    parse_output(&stdout).ok_or(ProbeError::UnparseableOutput {
        program: "ping".into(),
    })
}

/// Extract the statistics block from ping's stdout. Returns `None` when the
/// summary line is missing (interrupted run, unknown ping flavour).
fn parse_output(output: &str) -> Option<PingStats> {
    let times = TIME_RE
        .captures_iter(output)
        .filter_map(|caps| caps[1].parse().ok())
        .collect();

    let packet_loss = LOSS_RE
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())?;

    let stats = STATS_RE.captures(output)?;

    Some(PingStats {
        times,
        packet_loss,
        min_ms: stats[1].parse().ok()?,
        avg_ms: stats[2].parse().ok()?,
        max_ms: stats[3].parse().ok()?,
        mdev_ms: stats[4].parse().ok()?,
    })
}
