//! Tunnel server implementation

mod handler;
mod listener;

pub use handler::ChannelHandler;
pub use listener::TunnelServer;
