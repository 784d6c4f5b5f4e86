//! kb-hub: Cloud-side daemon accepting kiosk tunnels
//!
//! The hub accepts the outbound channels that kiosk agents open, keeps one
//! session per kiosk identity, and dispatches calls over those channels,
//! correlating every result back to the caller that issued it.

pub mod auth;
pub mod dispatcher;
pub mod health;
pub mod server;
pub mod session;
pub mod state;

pub use dispatcher::{DispatchCounters, Dispatcher};
pub use server::TunnelServer;
pub use session::{SessionDirectory, SessionHandle};
pub use state::HubState;
