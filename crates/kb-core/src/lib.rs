//! kb-core: Core abstractions and configuration for kiosk-bridge
//!
//! This crate provides shared types, the call correlation registry, traits,
//! and configuration structures used by the hub and the agent.

pub mod config;
pub mod correlation;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use correlation::{CorrelationRegistry, Resolution, Waiter};
pub use error::{BridgeError, CallError};
pub use traits::LocalRouter;
pub use types::{ConnectionState, Identity};
