//! Acknowledged delivery with bounded retries.
//!
//! Registration, task dispatch and report/alert delivery all share the same
//! discipline: transmit a frame, wait a bounded time for an ACK carrying the
//! identical sequence number, and retransmit a fixed number of times before
//! giving up. [`send_with_ack`] implements that discipline once; the
//! [`AckTransport`] trait abstracts over the two transports it runs on:
//!
//! - [`UdpAckTransport`]: datagram exchange on an existing socket
//!   (registration, task dispatch).
//! - [`TcpAckTransport`]: a fresh connection per attempt, one frame per
//!   connection (report and alert delivery). The sender half-closes after
//!   writing, the receiver replies and closes.
//!
//! ACKs are correlated purely by `(kind, sequence)`. A reply that is not the
//! matching ACK burns the attempt; it is never a protocol error.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

use crate::protocol::{MAX_FRAME, Message};

/// Retry discipline for acknowledged sends.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Transmissions before giving up.
    pub max_attempts: u32,

    /// How long to wait for an ACK after each transmission.
    pub ack_timeout: Duration,

    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            ack_timeout: Duration::from_secs(2),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Result of an acknowledged send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The matching ACK arrived.
    Acked,

    /// All attempts elapsed without a matching ACK. For registration the
    /// caller must drop its socket and surface the failure; for delivery it
    /// is logged and the payload abandoned.
    TimedOut,
}

/// One request/reply exchange on some transport.
#[async_trait]
pub trait AckTransport {
    /// Transmit `frame` and wait up to `wait` for a single reply.
    ///
    /// `Ok(None)` means the window elapsed without a reply. Transport-level
    /// errors (unreachable peer, refused connection) are returned as `Err`
    /// and treated like a silent window by the caller.
    async fn exchange(&mut self, frame: &[u8], wait: Duration) -> io::Result<Option<Vec<u8>>>;
}

/// Datagram transport: send to a fixed peer, accept a reply from it.
pub struct UdpAckTransport<'a> {
    socket: &'a UdpSocket,
    peer: SocketAddr,
}

impl<'a> UdpAckTransport<'a> {
    pub fn new(socket: &'a UdpSocket, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }
}

#[async_trait]
impl AckTransport for UdpAckTransport<'_> {
    async fn exchange(&mut self, frame: &[u8], wait: Duration) -> io::Result<Option<Vec<u8>>> {
        self.socket.send_to(frame, self.peer).await?;

        let mut buf = [0u8; MAX_FRAME];
        match timeout(wait, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                if from != self.peer {
                    trace!("dropping datagram from unexpected peer {from}");
                    return Ok(None);
                }
                Ok(Some(buf[..len].to_vec()))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }
}

/// Stream transport: one connection per attempt, one frame per connection.
pub struct TcpAckTransport {
    peer: SocketAddr,
}

impl TcpAckTransport {
    pub fn new(peer: SocketAddr) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl AckTransport for TcpAckTransport {
    async fn exchange(&mut self, frame: &[u8], wait: Duration) -> io::Result<Option<Vec<u8>>> {
        let attempt = async {
            let mut stream = TcpStream::connect(self.peer).await?;
            stream.write_all(frame).await?;
            // Half-close marks the end of the frame; the peer reads to EOF,
            // replies, and closes its side.
            stream.shutdown().await?;

            let mut reply = Vec::new();
            stream.take(MAX_FRAME as u64).read_to_end(&mut reply).await?;
            io::Result::Ok(reply)
        };

        match timeout(wait, attempt).await {
            Ok(Ok(reply)) if reply.is_empty() => Ok(None),
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }
}

/// Send a message and wait for its ACK, retrying per `policy`.
///
/// Returns [`SendOutcome::Acked`] as soon as an ACK with the message's
/// sequence arrives; remaining attempts are not waited out. Issues at most
/// `policy.max_attempts` transmissions.
pub async fn send_with_ack<T>(
    transport: &mut T,
    message: &Message,
    policy: &RetryPolicy,
) -> SendOutcome
where
    T: AckTransport + ?Sized,
{
    let frame = message.encode();
    let wanted = message.sequence();

    for attempt in 1..=policy.max_attempts {
        trace!(
            "sending {} seq={wanted} (attempt {attempt}/{})",
            message.kind_name(),
            policy.max_attempts
        );

        match transport.exchange(&frame, policy.ack_timeout).await {
            Ok(Some(reply)) => match Message::decode(&reply) {
                Ok(Message::Ack { sequence }) if sequence == wanted => {
                    debug!("{} seq={wanted} acknowledged", message.kind_name());
                    return SendOutcome::Acked;
                }
                Ok(other) => {
                    trace!(
                        "expected ACK seq={wanted}, got {} seq={}",
                        other.kind_name(),
                        other.sequence()
                    );
                }
                Err(e) => {
                    trace!("undecodable reply while waiting for ACK: {e}");
                }
            },
            Ok(None) => {
                trace!("no reply within {:?}", policy.ack_timeout);
            }
            Err(e) => {
                warn!("transport error on attempt {attempt}: {e}");
            }
        }

        if attempt < policy.max_attempts {
            sleep(policy.retry_delay).await;
        }
    }

    debug!(
        "{} seq={wanted} unacknowledged after {} attempts",
        message.kind_name(),
        policy.max_attempts
    );
    SendOutcome::TimedOut
}

/// Wrapping sequence counter. Each sender owns one and stamps outgoing
/// REGISTER/TASK/REPORT/ALERT messages from it.
#[derive(Debug, Default)]
pub struct SequenceCounter(u8);

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number, wrapping at 256.
    pub fn next(&mut self) -> u8 {
        let current = self.0;
        self.0 = self.0.wrapping_add(1);
        current
    }
}
