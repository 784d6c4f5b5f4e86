//! Message types for the kiosk-bridge protocol
//!
//! This module defines the protocol messages exchanged between agents and
//! the hub. Messages are serialized into frames using the codec defined in
//! `codec.rs`.
//!
//! # Message Flow
//!
//! 1. Agent connects and sends `Hello` carrying its bearer credential
//! 2. Hub validates the credential and responds with `HelloAck`
//! 3. Hub sends `Heartbeat` periodically, agent responds with `HeartbeatAck`
//! 4. Hub sends `Call`; the agent answers each one with exactly one `Result`
//!    carrying the same call ID. Results for different calls may arrive in
//!    any order.

use serde::{Deserialize, Serialize};

use crate::call::{CallEnvelope, ResultEnvelope};

/// Current protocol version string.
///
/// Format: "MAJOR.MINOR" where MAJOR changes indicate breaking changes.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Message type identifier (the frame discriminant)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Handshake (agent → hub)
    Hello = 0x01,
    /// Handshake acknowledgment
    HelloAck = 0x02,
    /// Call envelope (hub → agent)
    Call = 0x10,
    /// Result envelope (agent → hub)
    Result = 0x11,
    /// Heartbeat ping
    Heartbeat = 0x20,
    /// Heartbeat acknowledgment
    HeartbeatAck = 0x21,
}

impl MessageType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::HelloAck),
            0x10 => Some(Self::Call),
            0x11 => Some(Self::Result),
            0x20 => Some(Self::Heartbeat),
            0x21 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// First frame on a new channel.
    Hello {
        /// Bearer credential issued to this kiosk
        credential: String,
        /// Protocol version, normally `PROTOCOL_VERSION`
        version: String,
        /// Hostname of the agent machine
        hostname: String,
        /// Operating system (e.g., "linux", "windows")
        os: String,
        /// CPU architecture (e.g., "x86_64", "aarch64")
        arch: String,
    },

    /// Handshake acknowledgment
    HelloAck {
        /// Whether the credential was accepted
        accepted: bool,
        /// Reason if not accepted
        reason: Option<String>,
    },

    /// A call to execute on the agent
    Call(CallEnvelope),

    /// The result of a call
    Result(ResultEnvelope),

    /// Heartbeat ping
    Heartbeat {
        /// Timestamp for latency measurement
        timestamp: u64,
    },

    /// Heartbeat acknowledgment
    HeartbeatAck {
        /// Echo of the original timestamp
        timestamp: u64,
    },
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Hello { .. } => MessageType::Hello,
            Message::HelloAck { .. } => MessageType::HelloAck,
            Message::Call(_) => MessageType::Call,
            Message::Result(_) => MessageType::Result,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
            Message::HeartbeatAck { .. } => MessageType::HeartbeatAck,
        }
    }
}

/// Check whether a peer's version string is compatible with ours.
///
/// Only the major component has to match.
pub fn is_compatible_version(version: &str) -> bool {
    fn major(v: &str) -> &str {
        v.split('.').next().unwrap_or(v)
    }
    major(version) == major(PROTOCOL_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        for msg_type in [
            MessageType::Hello,
            MessageType::HelloAck,
            MessageType::Call,
            MessageType::Result,
            MessageType::Heartbeat,
            MessageType::HeartbeatAck,
        ] {
            let byte = msg_type.as_u8();
            let recovered = MessageType::from_u8(byte).unwrap();
            assert_eq!(recovered, msg_type);
        }
    }

    #[test]
    fn test_unknown_discriminants() {
        assert!(MessageType::from_u8(0x00).is_none());
        assert!(MessageType::from_u8(0x12).is_none());
        assert!(MessageType::from_u8(0xFF).is_none());
    }

    #[test]
    fn test_version_compatibility() {
        assert!(is_compatible_version(PROTOCOL_VERSION));
        assert!(is_compatible_version("1.7"));
        assert!(!is_compatible_version("2.0"));
        assert!(!is_compatible_version(""));
    }
}
