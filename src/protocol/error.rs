//! Error types for frame decoding

use std::fmt;

/// Errors that can occur while decoding a frame.
///
/// `UnknownKind` and `Truncated` are expected on a shared port and must be
/// treated as "ignore and keep listening" by receive loops, never as fatal.
#[derive(Debug)]
pub enum DecodeError {
    /// The frame is too short to contain the expected fields.
    Truncated,

    /// The kind byte does not match any known message kind.
    UnknownKind(u8),

    /// The payload after the header failed to parse.
    PayloadCorrupt(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "frame truncated before expected fields"),
            DecodeError::UnknownKind(kind) => write!(f, "unknown message kind: {kind:#04x}"),
            DecodeError::PayloadCorrupt(msg) => write!(f, "frame payload corrupt: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::PayloadCorrupt(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for DecodeError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        DecodeError::PayloadCorrupt(err.to_string())
    }
}
