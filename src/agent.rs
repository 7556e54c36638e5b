//! Agent side: registration, task listening and outbound delivery.
//!
//! The control flow is sequential: register with acknowledged retries, then
//! turn the same UDP socket into the task listener. Tasks are acknowledged
//! on the listener and handed to the engine actor; reports and alerts flow
//! through a delivery worker that opens a fresh TCP connection per attempt.
//!
//! Exits:
//!
//! - registration exhausting its retries is an error (the process ends with
//!   a non-zero status),
//! - engine retirement after the alert ceiling is a clean shutdown: the
//!   listener stops, queued deliveries are flushed, the socket is released.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

use crate::engine::{EngineExit, EngineHandle, EngineSettings, Outbound};
use crate::probes::ProbeRunner;
use crate::protocol::{MAX_FRAME, Message};
use crate::reliable::{
    RetryPolicy, SendOutcome, SequenceCounter, TcpAckTransport, UdpAckTransport, send_with_ack,
};

/// Everything the agent needs to come up.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: u16,

    /// Manager's registration/task socket.
    pub manager_udp: SocketAddr,

    /// Manager's report/alert listener.
    pub manager_tcp: SocketAddr,

    pub policy: RetryPolicy,
    pub engine: EngineSettings,
}

/// Run the agent until retirement. An error means registration failed.
#[instrument(skip_all, fields(agent_id = config.agent_id))]
pub async fn run(config: AgentConfig, probes: Arc<dyn ProbeRunner>) -> anyhow::Result<()> {
    let bind_addr = if config.manager_udp.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    let mut sequences = SequenceCounter::new();

    let register = Message::Register {
        sequence: sequences.next(),
        agent_id: config.agent_id,
    };
    let mut transport = UdpAckTransport::new(&socket, config.manager_udp);
    match send_with_ack(&mut transport, &register, &config.policy).await {
        SendOutcome::Acked => {
            info!("registered with manager at {}", config.manager_udp);
        }
        SendOutcome::TimedOut => {
            drop(socket);
            anyhow::bail!(
                "registration with {} failed after {} attempts",
                config.manager_udp,
                config.policy.max_attempts
            );
        }
    }

    let (outbound_tx, outbound_rx) = mpsc::channel(32);
    let delivery = tokio::spawn(delivery_loop(
        config.manager_tcp,
        outbound_rx,
        config.policy,
    ));
    let (engine, mut engine_join) = EngineHandle::spawn(probes, outbound_tx, config.engine);

    let mut buf = [0u8; MAX_FRAME];
    let exit = loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    handle_datagram(&socket, &buf[..len], from, &engine).await;
                }
                Err(e) => {
                    warn!("error receiving datagram: {e}");
                }
            },

            exit = &mut engine_join => {
                break exit.unwrap_or(EngineExit::Disconnected);
            }
        }
    };

    // Release the task socket, then let the delivery worker flush whatever
    // the engine queued before it stopped.
    drop(socket);
    drop(engine);
    delivery.await?;

    match exit {
        EngineExit::Retired => {
            info!("agent retired after reaching the alert ceiling");
        }
        EngineExit::Disconnected => {
            debug!("engine stopped because its task channel closed");
        }
    }
    Ok(())
}

/// Handle one datagram on the task listener.
async fn handle_datagram(socket: &UdpSocket, frame: &[u8], from: SocketAddr, engine: &EngineHandle) {
    match Message::decode(frame) {
        Ok(Message::Task { sequence, task }) => {
            debug!("task received from {from} (seq {sequence})");
            let ack = Message::Ack { sequence };
            if let Err(e) = socket.send_to(&ack.encode(), from).await {
                warn!("failed to ack task from {from}: {e}");
            }
            if let Err(e) = engine.submit(task).await {
                warn!("could not hand task to engine: {e}");
            }
        }
        Ok(Message::Ack { sequence }) => {
            // A late duplicate for an exchange that already completed.
            trace!("ignoring stale ack (seq {sequence}) from {from}");
        }
        Ok(other) => {
            warn!("unexpected {} from {from}, dropping", other.kind_name());
        }
        Err(e) => {
            warn!("dropping malformed datagram from {from}: {e}");
        }
    }
}

/// Deliver reports and alerts to the manager, one connection per attempt.
#[instrument(skip_all)]
async fn delivery_loop(
    manager_tcp: SocketAddr,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    policy: RetryPolicy,
) {
    let mut sequences = SequenceCounter::new();

    while let Some(item) = outbound_rx.recv().await {
        let message = match item {
            Outbound::Report { status, summary } => Message::Report {
                sequence: sequences.next(),
                status,
                summary,
            },
            Outbound::Alert(alert) => Message::Alert {
                sequence: sequences.next(),
                alert,
            },
        };

        let mut transport = TcpAckTransport::new(manager_tcp);
        match send_with_ack(&mut transport, &message, &policy).await {
            SendOutcome::Acked => {
                debug!("{} delivered to {manager_tcp}", message.kind_name());
            }
            SendOutcome::TimedOut => {
                warn!(
                    "{} delivery to {manager_tcp} failed after {} attempts, dropping payload",
                    message.kind_name(),
                    policy.max_attempts
                );
            }
        }
    }

    debug!("delivery worker stopped");
}
