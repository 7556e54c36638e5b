//! Task-configuration loading for the manager.
//!
//! The task file is JSON: a list of task groups, each with a round frequency
//! and a list of devices naming their metrics, link probes and alert
//! thresholds. Loading flattens it to one [`TaskSpec`] per device id; agents
//! without an entry simply get no work dispatched.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::trace;

use crate::task::{DeviceMetrics, LinkMetrics, TaskSpec};

#[derive(Debug, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<TaskGroup>,
}

#[derive(Debug, Deserialize)]
struct TaskGroup {
    #[allow(dead_code)]
    task_id: Option<String>,

    /// Seconds between execution rounds for every device in the group.
    frequency: Option<u64>,

    #[serde(default)]
    devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    device_id: u16,

    #[serde(default)]
    device_metrics: DeviceMetricsEntry,

    #[serde(default)]
    link_metrics: LinkMetrics,

    #[serde(default)]
    alertflow_conditions: std::collections::BTreeMap<String, f64>,
}

/// Device metrics as they appear in the file. `interface_stats` is accepted
/// for compatibility with existing task files but no probe consumes it.
#[derive(Debug, Default, Deserialize)]
struct DeviceMetricsEntry {
    #[serde(default)]
    cpu_usage: bool,

    #[serde(default)]
    ram_usage: bool,

    #[allow(dead_code)]
    #[serde(default)]
    interface_stats: Vec<String>,
}

/// Load the task file and flatten it to a device-id-keyed map.
///
/// A device id appearing twice keeps the last occurrence.
pub fn load_task_config(path: &str) -> anyhow::Result<HashMap<u16, TaskSpec>> {
    let file_content = std::fs::read_to_string(path)?;
    let file: TaskFile = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("invalid task file {path}: {e}"))?;

    let mut tasks = HashMap::new();
    for group in file.tasks {
        for device in group.devices {
            let mut task = TaskSpec {
                metrics: DeviceMetrics {
                    cpu_usage: device.device_metrics.cpu_usage,
                    ram_usage: device.device_metrics.ram_usage,
                },
                link_metrics: device.link_metrics,
                alert_conditions: device.alertflow_conditions,
                ..TaskSpec::default()
            };
            if let Some(frequency) = group.frequency {
                task.interval = frequency;
            }
            tasks.insert(device.device_id, task);
        }
    }

    trace!("loaded {} task assignments from {path}", tasks.len());
    Ok(tasks)
}
