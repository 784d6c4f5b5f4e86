//! Outbound transport to the hub
//!
//! The connection manager only ever sees a framed byte stream. Opening it is
//! behind [`Connector`] so tests can hand over an in-memory pipe.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use kb_core::error::ConnectionError;
use kb_protocol::FrameCodec;

/// Byte stream a tunnel runs over
pub trait TunnelIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TunnelIo for T {}

/// A framed tunnel
pub type Transport = Framed<Box<dyn TunnelIo>, FrameCodec>;

/// Wrap any byte stream in the tunnel codec
pub fn framed<T: TunnelIo + 'static>(io: T) -> Transport {
    Framed::new(Box::new(io) as Box<dyn TunnelIo>, FrameCodec::new())
}

/// Opens the transport to the hub
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh transport
    async fn connect(&self) -> Result<Transport, ConnectionError>;

    /// Where this connector dials, for logs
    fn endpoint(&self) -> String;
}

/// Plain TCP connector
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Transport, ConnectionError> {
        tracing::debug!("Connecting to {}", self.address);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                ConnectionError::ConnectionRefused(format!(
                    "{}: timed out after {:?}",
                    self.address, self.connect_timeout
                ))
            })?
            .map_err(|e| ConnectionError::ConnectionRefused(format!("{}: {}", self.address, e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {}", e);
        }

        Ok(framed(stream))
    }

    fn endpoint(&self) -> String {
        self.address.clone()
    }
}
