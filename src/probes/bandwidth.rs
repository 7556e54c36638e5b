//! Throughput probe: runs `iperf3` as a client and parses the receiver
//! summary. Gbit and GByte figures are normalised to Mbit/MByte so the
//! threshold comparison always happens in one unit.

use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;
use tracing::trace;

use super::ProbeError;

static BANDWIDTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?) (Mbits/sec|Gbits/sec)").unwrap());
static TRANSFER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?) (MBytes|GBytes)").unwrap());

/// Parsed iperf3 results for one round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthStats {
    /// Measured rate in Mbit/s.
    pub bandwidth_mbps: f64,

    /// Transferred volume in MByte.
    pub transfer_mbytes: f64,
}

/// Run an iperf3 test against `server:port` for `duration` seconds.
pub async fn run(server: &str, port: u16, duration: u64) -> Result<BandwidthStats, ProbeError> {
    let output = Command::new("iperf3")
        .arg("-c")
        .arg(server)
        .arg("-p")
        .arg(port.to_string())
        .arg("-t")
        .arg(duration.to_string())
        .output()
        .await?;

    if !output.status.success() {
        return Err(ProbeError::CommandFailed {
            program: "iperf3".into(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    trace!("iperf3 {server}:{port}: {} bytes of output", stdout.len());

    parse_output(&stdout).ok_or(ProbeError::UnparseableOutput {
        program: "iperf3".into(),
    })
}

/// The last rate/transfer figures in the output belong to the closing
/// summary, which is the value of record for the whole test.
fn parse_output(output: &str) -> Option<BandwidthStats> {
    let bandwidth = BANDWIDTH_RE
        .captures_iter(output)
        .last()
        .and_then(|caps| {
            let value: f64 = caps[1].parse().ok()?;
            Some(match &caps[2] {
                "Gbits/sec" => value * 1000.0,
                _ => value,
            })
        })?;

    let transfer = TRANSFER_RE.captures_iter(output).last().and_then(|caps| {
        let value: f64 = caps[1].parse().ok()?;
        Some(match &caps[2] {
            "GBytes" => value * 1000.0,
            _ => value,
        })
    })?;

    Some(BandwidthStats {
        bandwidth_mbps: bandwidth,
        transfer_mbytes: transfer,
    })
}
