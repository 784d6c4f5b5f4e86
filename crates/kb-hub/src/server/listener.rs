//! Tunnel listener
//!
//! Accepts incoming connections and spawns a handler for each agent.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::server::handler::ChannelHandler;
use crate::state::HubState;

/// TCP server that agents dial into
pub struct TunnelServer {
    /// Shared hub state
    state: Arc<HubState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl TunnelServer {
    /// Create a new tunnel server
    pub fn new(state: Arc<HubState>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    /// Bind `bind_addr` and serve until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Tunnel listener on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Tunnel listener shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Spawn the handler for a new connection
    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!("New connection from {}", peer_addr);

        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        let handler = ChannelHandler::new(Arc::clone(&self.state), peer_addr, self.cancel.clone());
        tokio::spawn(async move {
            if let Err(e) = handler.run(socket).await {
                tracing::debug!("Connection from {} ended before attach: {}", peer_addr, e);
            }
        });
    }
}
