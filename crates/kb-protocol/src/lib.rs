//! kb-protocol: Wire protocol for kiosk-bridge call tunnelling
//!
//! This crate defines the envelopes and the binary framing used between the
//! hub and remote agents over their single long-lived duplex channel.

pub mod call;
pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use call::{CallEnvelope, CallId, Headers, Method, Reply, ResultEnvelope, Status};
pub use codec::{decode, encode, FrameCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{is_compatible_version, Message, MessageType, PROTOCOL_VERSION};
