//! Binary wire protocol between manager and agents.
//!
//! Every frame starts with a two-byte header:
//!
//! ```text
//! byte 0: kind      0x01 REGISTER | 0x02 ACK | 0x03 TASK | 0x04 REPORT | 0x05 ALERT
//! byte 1: sequence  0-255, wrapping, chosen by the sender
//! ```
//!
//! followed by a kind-specific payload:
//!
//! ```text
//! REGISTER: bytes 2-3  agent id (u16, big endian)
//! ACK:      nothing
//! TASK:     UTF-8 JSON task spec
//! REPORT:   byte 2 status (0x00 success, 0x01 failed), then UTF-8 summary
//! ALERT:    UTF-8 JSON (single-metric breach or full failure report)
//! ```
//!
//! The same encoding is used on datagrams and streams. Encoding and decoding
//! are strict inverses: `decode(encode(m)) == m` for every constructible
//! message.

pub mod error;

use serde::{Deserialize, Serialize};

use crate::task::TaskSpec;

pub use error::DecodeError;

const KIND_REGISTER: u8 = 0x01;
const KIND_ACK: u8 = 0x02;
const KIND_TASK: u8 = 0x03;
const KIND_REPORT: u8 = 0x04;
const KIND_ALERT: u8 = 0x05;

/// Largest frame either side will read off a socket. Matches the receive
/// buffer both listeners allocate.
pub const MAX_FRAME: usize = 8192;

/// One protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// An agent announces itself to the manager.
    Register { sequence: u8, agent_id: u16 },

    /// Confirms receipt of exactly one prior message, matched by sequence.
    Ack { sequence: u8 },

    /// The manager hands a monitoring task to an agent.
    Task { sequence: u8, task: TaskSpec },

    /// An agent summarises one finished execution cycle.
    Report {
        sequence: u8,
        status: ReportStatus,
        summary: String,
    },

    /// Out-of-band notification: a threshold breach or a failed cycle.
    Alert { sequence: u8, alert: AlertPayload },
}

/// Outcome of one execution cycle, carried in a REPORT frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Failed,
}

/// Payload of an ALERT frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertPayload {
    /// A single measurement crossed its configured threshold.
    Breach {
        metric: String,
        value: f64,
        threshold: f64,
    },

    /// A cycle hit an unrecoverable probe error; carries the full report
    /// that would otherwise have been sent as a REPORT.
    TaskFailure { summary: String },
}

impl Message {
    /// Sequence number carried in the header.
    pub fn sequence(&self) -> u8 {
        match self {
            Message::Register { sequence, .. }
            | Message::Ack { sequence }
            | Message::Task { sequence, .. }
            | Message::Report { sequence, .. }
            | Message::Alert { sequence, .. } => *sequence,
        }
    }

    /// Human-readable kind, for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::Register { .. } => "REGISTER",
            Message::Ack { .. } => "ACK",
            Message::Task { .. } => "TASK",
            Message::Report { .. } => "REPORT",
            Message::Alert { .. } => "ALERT",
        }
    }

    /// Serialize into a wire frame.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Register { sequence, agent_id } => {
                let id = agent_id.to_be_bytes();
                vec![KIND_REGISTER, *sequence, id[0], id[1]]
            }
            Message::Ack { sequence } => vec![KIND_ACK, *sequence],
            Message::Task { sequence, task } => {
                let mut frame = vec![KIND_TASK, *sequence];
                frame.extend(
                    serde_json::to_vec(task).expect("task spec serialization cannot fail"),
                );
                frame
            }
            Message::Report {
                sequence,
                status,
                summary,
            } => {
                let status = match status {
                    ReportStatus::Success => 0x00,
                    ReportStatus::Failed => 0x01,
                };
                let mut frame = vec![KIND_REPORT, *sequence, status];
                frame.extend(summary.as_bytes());
                frame
            }
            Message::Alert { sequence, alert } => {
                let mut frame = vec![KIND_ALERT, *sequence];
                frame.extend(
                    serde_json::to_vec(alert).expect("alert payload serialization cannot fail"),
                );
                frame
            }
        }
    }

    /// Parse a wire frame.
    pub fn decode(frame: &[u8]) -> Result<Message, DecodeError> {
        let [kind, sequence, rest @ ..] = frame else {
            return Err(DecodeError::Truncated);
        };
        let sequence = *sequence;

        match *kind {
            KIND_REGISTER => {
                let [hi, lo] = rest else {
                    return Err(DecodeError::Truncated);
                };
                Ok(Message::Register {
                    sequence,
                    agent_id: u16::from_be_bytes([*hi, *lo]),
                })
            }
            KIND_ACK => {
                if !rest.is_empty() {
                    return Err(DecodeError::PayloadCorrupt(format!(
                        "ack carries {} unexpected payload bytes",
                        rest.len()
                    )));
                }
                Ok(Message::Ack { sequence })
            }
            KIND_TASK => {
                let task = serde_json::from_slice(rest)?;
                Ok(Message::Task { sequence, task })
            }
            KIND_REPORT => {
                let [status, summary @ ..] = rest else {
                    return Err(DecodeError::Truncated);
                };
                let status = match status {
                    0x00 => ReportStatus::Success,
                    0x01 => ReportStatus::Failed,
                    other => {
                        return Err(DecodeError::PayloadCorrupt(format!(
                            "invalid report status byte: {other:#04x}"
                        )));
                    }
                };
                Ok(Message::Report {
                    sequence,
                    status,
                    summary: String::from_utf8(summary.to_vec())?,
                })
            }
            KIND_ALERT => {
                let alert = serde_json::from_slice(rest)?;
                Ok(Message::Alert { sequence, alert })
            }
            other => Err(DecodeError::UnknownKind(other)),
        }
    }
}
