//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The message could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// The bytes could not be parsed into a message.
    #[error("decode error: {0}")]
    Decode(String),

    /// The message parsed but is structurally unusable.
    #[error("invalid message: {}", .0.join("; "))]
    InvalidMessage(Vec<String>),
}

impl ProtocolError {
    /// Returns the individual reasons for an invalid message, or the single
    /// codec error message otherwise.
    pub fn reasons(&self) -> Vec<String> {
        match self {
            ProtocolError::InvalidMessage(reasons) => reasons.clone(),
            ProtocolError::Encode(msg) | ProtocolError::Decode(msg) => vec![msg.clone()],
        }
    }
}
