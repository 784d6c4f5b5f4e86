//! kb-agent: kiosk-side agent for kiosk-bridge
//!
//! The agent runs on each kiosk and opens an outbound tunnel to the hub.
//! Calls arriving over the tunnel are routed to local HTTP services and
//! answered with exactly one result each, buffered while the tunnel is down.

pub mod health;
pub mod metrics;
pub mod queue;
pub mod router;
pub mod state;
pub mod tunnel;

pub use router::{HttpRouter, RoutingTable};
pub use state::AgentState;
pub use tunnel::{ConnectionManager, TcpConnector};
