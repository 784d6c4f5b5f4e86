//! Protocol error types

use thiserror::Error;

use crate::message::MessageType;

/// Errors that can occur during protocol operations.
///
/// Every variant is connection-fatal: once framing can't be trusted the
/// channel is torn down instead of resynchronised.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Unknown message type
    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Incomplete frame received
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Bytes left over after a complete frame
    #[error("Trailing bytes after frame: {0}")]
    TrailingBytes(usize),

    /// Header discriminant disagrees with the decoded payload
    #[error("Frame header says {header:?} but payload is {payload:?}")]
    TypeMismatch {
        header: MessageType,
        payload: MessageType,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
