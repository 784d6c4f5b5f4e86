//! Core error types for kiosk-bridge

use kb_protocol::{CallId, ProtocolError};
use std::path::PathBuf;
use thiserror::Error;

use crate::types::Identity;

/// Top-level error type for the kiosk-bridge ecosystem
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Call error
    #[error("Call error: {0}")]
    Call(#[from] CallError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal failures of a single call.
///
/// A caller of the dispatcher receives either a reply or exactly one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// No result before the deadline
    #[error("Call timed out")]
    Timeout,

    /// The channel carrying the call went away
    #[error("Channel disconnected before the call completed")]
    Disconnected,

    /// No live channel for this identity
    #[error("Remote {0} is not connected")]
    NotConnected(Identity),

    /// The identity is administratively disabled
    #[error("Remote {0} is disabled")]
    Disabled(Identity),

    /// Call ID already in flight
    #[error("Duplicate call ID: {0}")]
    DuplicateCallId(CallId),
}

/// Channel-level errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Credential rejected by the hub
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Connection refused
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Connection lost
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Peer did not complete the handshake in time
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// Malformed frame; the channel must be torn down
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
