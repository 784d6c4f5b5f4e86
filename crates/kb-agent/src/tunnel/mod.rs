//! Tunnel to the hub

mod connector;
mod manager;
mod reconnect;

pub use connector::{framed, Connector, TcpConnector, Transport, TunnelIo};
pub use manager::ConnectionManager;
pub use reconnect::ExponentialBackoff;
