//! Helper functions for integration tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use fleetmon::manager;
use fleetmon::probes::{BandwidthStats, PingStats, ProbeError, ProbeRunner, RamUsage};
use fleetmon::reliable::RetryPolicy;
use fleetmon::task::{BandwidthSpec, DeviceMetrics, PingSpec, TaskSpec};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

/// Short windows so retry-exhaustion tests finish quickly.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        ack_timeout: Duration::from_millis(100),
        retry_delay: Duration::from_millis(10),
    }
}

pub fn cpu_task(threshold: Option<f64>) -> TaskSpec {
    TaskSpec {
        metrics: DeviceMetrics {
            cpu_usage: true,
            ram_usage: false,
        },
        alert_conditions: threshold
            .map(|limit| [("cpu_usage".to_string(), limit)].into())
            .unwrap_or_default(),
        interval: 0,
        ..TaskSpec::default()
    }
}

/// A running manager on localhost ephemeral ports.
pub struct TestManager {
    pub udp_addr: SocketAddr,
    pub tcp_addr: SocketAddr,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestManager {
    pub async fn spawn(tasks: HashMap<u16, TaskSpec>) -> Self {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let udp_addr = udp.local_addr().unwrap();
        let tcp_addr = tcp.local_addr().unwrap();

        let handle = tokio::spawn(manager::run(udp, tcp, tasks, fast_policy()));

        Self {
            udp_addr,
            tcp_addr,
            handle,
        }
    }
}

impl Drop for TestManager {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Probe runner with canned measurements, for driving agents end to end
/// without touching ping/iperf3 or the host counters.
pub struct FixedProbes {
    pub cpu: f32,
}

#[async_trait]
impl ProbeRunner for FixedProbes {
    async fn ping(&self, _spec: &PingSpec) -> Result<PingStats, ProbeError> {
        Ok(PingStats {
            times: vec![30.0],
            packet_loss: 0.0,
            min_ms: 30.0,
            avg_ms: 30.0,
            max_ms: 30.0,
            mdev_ms: 0.0,
        })
    }

    async fn bandwidth(&self, _spec: &BandwidthSpec) -> Result<BandwidthStats, ProbeError> {
        Ok(BandwidthStats {
            bandwidth_mbps: 900.0,
            transfer_mbytes: 100.0,
        })
    }

    async fn cpu_percent(&self) -> Result<f32, ProbeError> {
        Ok(self.cpu)
    }

    async fn ram_usage(&self) -> Result<RamUsage, ProbeError> {
        Ok(RamUsage {
            total_gb: 8.0,
            available_gb: 6.0,
            used_gb: 2.0,
            percent: 25.0,
        })
    }
}
