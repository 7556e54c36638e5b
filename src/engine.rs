//! Task engine - executes monitoring tasks on the agent.
//!
//! The engine runs as its own actor so probe rounds, which can block for
//! seconds, never keep the agent's listener from acknowledging a superseding
//! task.
//!
//! ## Execution model
//!
//! ```text
//! TASK accepted → round 1 → sleep → round 2 → sleep → round 3 → REPORT/ALERT
//!                    │                 │
//!                    │                 └─ superseding TASK replaces the state
//!                    │                    (future rounds only; a probe that is
//!                    │                    already running finishes first)
//!                    └─ threshold breach → ALERT immediately, mid-round
//! ```
//!
//! Every threshold breach is delivered out-of-band as a single-metric alert.
//! When the per-task alert count reaches the ceiling the engine retires the
//! agent: no further alert is ever emitted for that task, and the control
//! loop shuts down cleanly.
//!
//! A round that hits an unrecoverable probe error marks the whole cycle
//! failed; the closing summary then goes out as an alert instead of a
//! report.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::probes::ProbeRunner;
use crate::protocol::{AlertPayload, ReportStatus};
use crate::task::{TaskSpec, metric};

/// Execution rounds per task.
const MAX_ROUNDS: u32 = 3;

/// Alerts within one task's lifetime before the agent retires.
const ALERT_CEILING: u32 = 3;

/// Tunable bounds of the engine, fixed at spawn time.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub rounds: u32,
    pub alert_ceiling: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rounds: MAX_ROUNDS,
            alert_ceiling: ALERT_CEILING,
        }
    }
}

/// Messages the engine hands to the delivery side.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Closing summary of a finished cycle.
    Report {
        status: ReportStatus,
        summary: String,
    },

    /// Out-of-band alert: threshold breach or failed cycle.
    Alert(AlertPayload),
}

/// Why the engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    /// The alert ceiling was reached; the agent should shut down cleanly.
    Retired,

    /// The task channel closed.
    Disconnected,
}

/// Per-task execution state. Superseded wholesale when a new task arrives.
#[derive(Debug)]
struct TaskExecutionState {
    task: TaskSpec,
    attempt_count: u32,
    alert_count: u32,
    results: Vec<RoundOutcome>,
}

impl TaskExecutionState {
    fn new(task: TaskSpec) -> Self {
        Self {
            task,
            attempt_count: 0,
            alert_count: 0,
            results: Vec::new(),
        }
    }
}

/// What one round produced, for the closing summary.
#[derive(Debug)]
struct RoundOutcome {
    lines: Vec<String>,
    failed: bool,
}

/// Whether the current round (and task) should keep going.
enum RoundControl {
    Continue,
    Retire,
}

/// Whether `value` breaches the threshold for `metric`.
///
/// Bandwidth alerts when the measured rate drops *below* the threshold;
/// every other metric alerts when the value *exceeds* it.
pub fn breaches(metric_name: &str, value: f64, threshold: f64) -> bool {
    match metric_name {
        metric::BANDWIDTH => value < threshold,
        _ => value > threshold,
    }
}

/// Actor that executes the agent's current task.
pub struct TaskEngine {
    task_rx: mpsc::Receiver<TaskSpec>,
    outbound_tx: mpsc::Sender<Outbound>,
    probes: Arc<dyn ProbeRunner>,
    settings: EngineSettings,
}

impl TaskEngine {
    pub fn new(
        task_rx: mpsc::Receiver<TaskSpec>,
        outbound_tx: mpsc::Sender<Outbound>,
        probes: Arc<dyn ProbeRunner>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            task_rx,
            outbound_tx,
            probes,
            settings,
        }
    }

    /// Run until retirement or until the task channel closes.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> EngineExit {
        debug!("starting task engine");

        while let Some(task) = self.task_rx.recv().await {
            let mut state = TaskExecutionState::new(self.latest(task));
            debug!("accepted task, {} rounds ahead", self.settings.rounds);

            loop {
                state.attempt_count += 1;
                if let RoundControl::Retire = self.run_round(&mut state).await {
                    info!(
                        "alert ceiling of {} reached, retiring",
                        self.settings.alert_ceiling
                    );
                    return EngineExit::Retired;
                }

                if state.attempt_count >= self.settings.rounds {
                    self.finish_cycle(state).await;
                    break;
                }

                // Pause between rounds; a task arriving here supersedes the
                // current execution state before the next round starts.
                tokio::select! {
                    newer = self.task_rx.recv() => match newer {
                        Some(newer) => {
                            debug!("task superseded after round {}", state.attempt_count);
                            state = TaskExecutionState::new(self.latest(newer));
                        }
                        None => return EngineExit::Disconnected,
                    },
                    _ = sleep(state.task.round_interval()) => {}
                }
            }
        }

        debug!("task channel closed, stopping engine");
        EngineExit::Disconnected
    }

    /// Drain queued tasks down to the most recent one.
    fn latest(&mut self, first: TaskSpec) -> TaskSpec {
        let mut task = first;
        while let Ok(newer) = self.task_rx.try_recv() {
            task = newer;
        }
        task
    }

    /// Execute every configured probe once and evaluate its thresholds.
    async fn run_round(&self, state: &mut TaskExecutionState) -> RoundControl {
        let task = state.task.clone();
        let mut outcome = RoundOutcome {
            lines: Vec::new(),
            failed: false,
        };

        if task.metrics.cpu_usage {
            match self.probes.cpu_percent().await {
                Ok(cpu) => {
                    outcome.lines.push(format!("cpu usage: {cpu:.1}%"));
                    if let RoundControl::Retire = self
                        .evaluate(state, &task, metric::CPU_USAGE, cpu as f64)
                        .await
                    {
                        state.results.push(outcome);
                        return RoundControl::Retire;
                    }
                }
                Err(e) => {
                    outcome.lines.push(format!("cpu usage: probe failed: {e}"));
                    outcome.failed = true;
                }
            }
        }

        if task.metrics.ram_usage {
            match self.probes.ram_usage().await {
                Ok(ram) => {
                    outcome.lines.push(format!(
                        "ram usage: {:.1}% ({:.1}/{:.1} GB)",
                        ram.percent, ram.used_gb, ram.total_gb
                    ));
                    if let RoundControl::Retire = self
                        .evaluate(state, &task, metric::RAM_USAGE, ram.percent)
                        .await
                    {
                        state.results.push(outcome);
                        return RoundControl::Retire;
                    }
                }
                Err(e) => {
                    outcome.lines.push(format!("ram usage: probe failed: {e}"));
                    outcome.failed = true;
                }
            }
        }

        if let Some(ping) = &task.link_metrics.latency {
            match self.probes.ping(ping).await {
                Ok(stats) => {
                    outcome.lines.push(format!(
                        "ping {}: avg {:.1} ms (min {:.1}, max {:.1}, loss {}%)",
                        ping.destination, stats.avg_ms, stats.min_ms, stats.max_ms,
                        stats.packet_loss
                    ));
                    if let RoundControl::Retire = self
                        .evaluate(state, &task, metric::LATENCY, stats.avg_ms)
                        .await
                    {
                        state.results.push(outcome);
                        return RoundControl::Retire;
                    }
                    if let RoundControl::Retire = self
                        .evaluate(state, &task, metric::PACKET_LOSS, stats.packet_loss)
                        .await
                    {
                        state.results.push(outcome);
                        return RoundControl::Retire;
                    }
                }
                Err(e) => {
                    outcome
                        .lines
                        .push(format!("ping {}: probe failed: {e}", ping.destination));
                    outcome.failed = true;
                }
            }
        }

        if let Some(bandwidth) = &task.link_metrics.bandwidth {
            match self.probes.bandwidth(bandwidth).await {
                Ok(stats) => {
                    outcome.lines.push(format!(
                        "iperf3 {}:{}: {:.1} Mbit/s ({:.1} MB transferred)",
                        bandwidth.server, bandwidth.port, stats.bandwidth_mbps,
                        stats.transfer_mbytes
                    ));
                    if let RoundControl::Retire = self
                        .evaluate(state, &task, metric::BANDWIDTH, stats.bandwidth_mbps)
                        .await
                    {
                        state.results.push(outcome);
                        return RoundControl::Retire;
                    }
                }
                Err(e) => {
                    outcome.lines.push(format!(
                        "iperf3 {}:{}: probe failed: {e}",
                        bandwidth.server, bandwidth.port
                    ));
                    outcome.failed = true;
                }
            }
        }

        state.results.push(outcome);
        RoundControl::Continue
    }

    /// Compare one measurement against its configured threshold and alert on
    /// a breach, without waiting for the rest of the round.
    async fn evaluate(
        &self,
        state: &mut TaskExecutionState,
        task: &TaskSpec,
        metric_name: &str,
        value: f64,
    ) -> RoundControl {
        let Some(threshold) = task.threshold(metric_name) else {
            return RoundControl::Continue;
        };

        if !breaches(metric_name, value, threshold) {
            return RoundControl::Continue;
        }

        state.alert_count += 1;
        warn!(
            "{metric_name} breached threshold: {value:.1} (limit {threshold:.1}), \
             alert {}/{}",
            state.alert_count, self.settings.alert_ceiling
        );

        let alert = Outbound::Alert(AlertPayload::Breach {
            metric: metric_name.to_string(),
            value,
            threshold,
        });
        if self.outbound_tx.send(alert).await.is_err() {
            warn!("delivery channel closed, dropping alert");
        }

        if state.alert_count >= self.settings.alert_ceiling {
            RoundControl::Retire
        } else {
            RoundControl::Continue
        }
    }

    /// All rounds done: assemble the closing summary and pick its channel.
    async fn finish_cycle(&self, state: TaskExecutionState) {
        let failed = state.results.iter().any(|round| round.failed);
        let summary = render_summary(&state.results);

        let outbound = if failed {
            debug!("cycle failed, sending full report as alert");
            Outbound::Alert(AlertPayload::TaskFailure { summary })
        } else {
            debug!("cycle succeeded after {} rounds", state.attempt_count);
            Outbound::Report {
                status: ReportStatus::Success,
                summary,
            }
        };

        if self.outbound_tx.send(outbound).await.is_err() {
            warn!("delivery channel closed, dropping cycle summary");
        }
    }
}

fn render_summary(results: &[RoundOutcome]) -> String {
    let mut lines = vec![format!(
        "cycle completed at {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )];
    for (idx, round) in results.iter().enumerate() {
        for line in &round.lines {
            lines.push(format!("round {}: {line}", idx + 1));
        }
    }
    lines.join("\n")
}

/// Handle for feeding tasks to a spawned [`TaskEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    task_tx: mpsc::Sender<TaskSpec>,
}

impl EngineHandle {
    /// Spawn an engine as a tokio task. The returned join handle completes
    /// when the engine stops; the control loop selects on it to learn about
    /// retirement.
    pub fn spawn(
        probes: Arc<dyn ProbeRunner>,
        outbound_tx: mpsc::Sender<Outbound>,
        settings: EngineSettings,
    ) -> (Self, JoinHandle<EngineExit>) {
        let (task_tx, task_rx) = mpsc::channel(8);
        let engine = TaskEngine::new(task_rx, outbound_tx, probes, settings);
        let join = tokio::spawn(engine.run());

        (Self { task_tx }, join)
    }

    /// Hand a task to the engine. A task submitted while another is running
    /// supersedes it at the next round boundary.
    pub async fn submit(&self, task: TaskSpec) -> anyhow::Result<()> {
        self.task_tx
            .send(task)
            .await
            .map_err(|_| anyhow::anyhow!("task engine is no longer running"))
    }
}
