//! Manager side: registration/dispatch loop and report listener.
//!
//! Two listeners, one per bound socket:
//!
//! - The UDP socket takes registrations. A valid REGISTER is ACKed, recorded
//!   in the registry, and answered with the agent's configured task, if any.
//!   The task is pushed with acknowledged retries from an ephemeral socket,
//!   so waiting for the agent's ACK never blocks the receive loop and the
//!   registry stays confined to it.
//! - The TCP listener takes reports and alerts, one frame per connection:
//!   read to EOF, log, ACK back, close.
//!
//! Malformed or unexpected frames are logged and dropped on both sockets;
//! neither loop ever dies over a bad peer.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::protocol::{AlertPayload, MAX_FRAME, Message};
use crate::registry::{AgentRegistry, RegisterOutcome};
use crate::reliable::{RetryPolicy, SendOutcome, SequenceCounter, UdpAckTransport, send_with_ack};
use crate::task::TaskSpec;

/// Run the manager until the process is stopped.
pub async fn run(
    udp: UdpSocket,
    tcp: TcpListener,
    tasks: HashMap<u16, TaskSpec>,
    policy: RetryPolicy,
) -> anyhow::Result<()> {
    info!(
        "manager listening on udp {} / tcp {}",
        udp.local_addr()?,
        tcp.local_addr()?
    );

    let registry = AgentRegistry::new(tasks);
    let dispatch = tokio::spawn(dispatch_loop(udp, registry, policy));
    let reports = tokio::spawn(report_listener(tcp));

    let (dispatch, reports) = tokio::join!(dispatch, reports);
    dispatch?;
    reports?;
    Ok(())
}

/// Receive loop for the datagram socket. Owns the registry exclusively.
#[instrument(skip_all)]
async fn dispatch_loop(udp: UdpSocket, mut registry: AgentRegistry, policy: RetryPolicy) {
    let mut sequences = SequenceCounter::new();
    let mut buf = [0u8; MAX_FRAME];

    loop {
        let (len, from) = match udp.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("error receiving datagram: {e}");
                continue;
            }
        };

        match Message::decode(&buf[..len]) {
            Ok(Message::Register { sequence, agent_id }) => {
                let outcome = registry.register(agent_id, from);
                match outcome {
                    RegisterOutcome::Created => {
                        info!(
                            "agent {agent_id} registered from {from} ({} total)",
                            registry.len()
                        );
                    }
                    RegisterOutcome::AlreadyExists => {
                        debug!("duplicate registration from agent {agent_id}, ignoring");
                    }
                }

                let ack = Message::Ack { sequence };
                if let Err(e) = udp.send_to(&ack.encode(), from).await {
                    warn!("failed to ack registration from {from}: {e}");
                }

                // First registration gets its task; a duplicate is never
                // re-dispatched.
                if outcome == RegisterOutcome::Created {
                    match registry.lookup_task(agent_id) {
                        Some(task) => {
                            let message = Message::Task {
                                sequence: sequences.next(),
                                task: task.clone(),
                            };
                            tokio::spawn(dispatch_task(message, from, policy));
                        }
                        None => {
                            info!("no task configured for agent {agent_id}");
                        }
                    }
                }
            }
            Ok(other) => {
                warn!(
                    "unexpected {} over the datagram socket from {from}, dropping",
                    other.kind_name()
                );
            }
            Err(e) => {
                warn!("dropping malformed datagram from {from}: {e}");
            }
        }
    }
}

/// Push one task to an agent with acknowledged retries.
#[instrument(skip(message, policy))]
async fn dispatch_task(message: Message, agent: SocketAddr, policy: RetryPolicy) {
    let bind_addr = if agent.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = match UdpSocket::bind(bind_addr).await {
        Ok(socket) => socket,
        Err(e) => {
            error!("could not bind dispatch socket: {e}");
            return;
        }
    };

    let mut transport = UdpAckTransport::new(&socket, agent);
    match send_with_ack(&mut transport, &message, &policy).await {
        SendOutcome::Acked => info!("task dispatched to {agent}"),
        SendOutcome::TimedOut => {
            warn!(
                "agent at {agent} did not acknowledge its task after {} attempts",
                policy.max_attempts
            );
        }
    }
}

/// Accept loop for the stream socket carrying reports and alerts.
#[instrument(skip_all)]
async fn report_listener(tcp: TcpListener) {
    loop {
        match tcp.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(handle_report_connection(stream, peer));
            }
            Err(e) => {
                warn!("error accepting report connection: {e}");
            }
        }
    }
}

/// One frame per connection: read to EOF, log, ACK, close.
async fn handle_report_connection(mut stream: TcpStream, peer: SocketAddr) {
    let mut frame = Vec::new();
    if let Err(e) = (&mut stream)
        .take(MAX_FRAME as u64)
        .read_to_end(&mut frame)
        .await
    {
        warn!("error reading report frame from {peer}: {e}");
        return;
    }

    let sequence = match Message::decode(&frame) {
        Ok(Message::Report {
            sequence,
            status,
            summary,
        }) => {
            info!("report from {peer} ({status:?}):\n{summary}");
            sequence
        }
        Ok(Message::Alert { sequence, alert }) => {
            match alert {
                AlertPayload::Breach {
                    metric,
                    value,
                    threshold,
                } => {
                    warn!("alert from {peer}: {metric} = {value:.1} (threshold {threshold:.1})");
                }
                AlertPayload::TaskFailure { summary } => {
                    warn!("failed cycle reported by {peer}:\n{summary}");
                }
            }
            sequence
        }
        Ok(other) => {
            warn!(
                "unexpected {} over the stream socket from {peer}, closing without ack",
                other.kind_name()
            );
            return;
        }
        Err(e) => {
            warn!("dropping malformed frame from {peer}: {e}");
            return;
        }
    };

    let ack = Message::Ack { sequence };
    if let Err(e) = stream.write_all(&ack.encode()).await {
        warn!("failed to ack frame from {peer}: {e}");
    }
    trace!("acked frame seq={sequence} from {peer}");
}
