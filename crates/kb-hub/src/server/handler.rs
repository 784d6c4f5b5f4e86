//! Per-connection tunnel handler
//!
//! Runs the handshake for one accepted connection, attaches the resulting
//! channel to the session directory and then owns the channel's single
//! read/write loop until it closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use kb_core::error::ConnectionError;
use kb_core::time::{current_time_millis, elapsed_millis};
use kb_core::{CallError, Identity, Resolution};
use kb_protocol::{is_compatible_version, FrameCodec, Message, ProtocolError};

use crate::session::SessionHandle;
use crate::state::HubState;

/// Handler for a single agent connection
pub struct ChannelHandler {
    /// Shared hub state
    state: Arc<HubState>,
    /// Peer address of the connecting agent
    peer_addr: SocketAddr,
    /// Hub-wide shutdown; each channel gets a child of it
    shutdown: CancellationToken,
}

impl ChannelHandler {
    pub fn new(state: Arc<HubState>, peer_addr: SocketAddr, shutdown: CancellationToken) -> Self {
        Self {
            state,
            peer_addr,
            shutdown,
        }
    }

    /// Handshake, attach, serve, detach.
    ///
    /// Returns once the connection is gone. An error means the peer never got
    /// past the handshake.
    pub async fn run<T>(self, io: T) -> Result<(), ConnectionError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let mut transport = Framed::new(io, FrameCodec::new());

        let handshake = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(()),
            result = self.handshake(&mut transport) => result,
        };
        let identity = match handshake {
            Ok(identity) => identity,
            Err(e) => {
                self.state.metrics.handshake_rejected();
                tracing::warn!("Handshake from {} failed: {}", self.peer_addr, e);
                return Err(e);
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(self.state.config.outbound_buffer);
        let handle = SessionHandle::new(
            outbound_tx,
            self.shutdown.child_token(),
            Some(self.peer_addr),
        );

        // Attached before the agent sees the ack; a disable that landed
        // after validation still refuses here
        if let Err(e) = self.state.directory.attach(&identity, handle.clone()) {
            self.state.metrics.handshake_rejected();
            tracing::warn!("Handshake from {} refused: {}", self.peer_addr, e);
            return Err(reject(&mut transport, e.to_string()).await);
        }

        self.state.metrics.handshake_accepted();
        tracing::info!(
            "{} online from {} as {}",
            identity,
            self.peer_addr,
            handle.connection_id()
        );

        let ack = Message::HelloAck {
            accepted: true,
            reason: None,
        };
        let reason = match transport.send(ack).await {
            Ok(()) => {
                self.run_channel(&identity, &handle, outbound_rx, &mut transport)
                    .await
            }
            Err(e) => format!("acknowledgement failed: {}", e),
        };

        // Fail first so no caller can be left waiting on a detached channel
        let failed = handle.registry().fail_all(CallError::Disconnected);
        handle.close();
        self.state.directory.detach(&identity, &handle);
        tracing::info!(
            "{} offline ({}): {}, {} calls failed",
            identity,
            handle.connection_id(),
            reason,
            failed
        );

        let _ = transport.close().await;
        Ok(())
    }

    /// Read `Hello` and validate it; refusals are answered here, the
    /// accepting `HelloAck` is sent once the channel is attached
    async fn handshake<T>(
        &self,
        transport: &mut Framed<T, FrameCodec>,
    ) -> Result<Identity, ConnectionError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let first = tokio::time::timeout(self.state.config.handshake_timeout, transport.next())
            .await
            .map_err(|_| ConnectionError::HandshakeTimeout)?;

        let (credential, version, hostname, os, arch) = match first {
            Some(Ok(Message::Hello {
                credential,
                version,
                hostname,
                os,
                arch,
            })) => (credential, version, hostname, os, arch),
            Some(Ok(other)) => {
                self.state.metrics.protocol_error();
                let reason = format!("Expected Hello, got {:?}", other.message_type());
                return Err(reject(transport, reason).await);
            }
            Some(Err(e)) => {
                self.state.metrics.protocol_error();
                return Err(ConnectionError::Protocol(e));
            }
            None => {
                return Err(ConnectionError::ConnectionLost(
                    "closed before Hello".to_string(),
                ))
            }
        };

        if !is_compatible_version(&version) {
            let reason = format!("Protocol version mismatch: {}", version);
            return Err(reject(transport, reason).await);
        }

        let Some(identity) = self.state.validator.validate(&credential).await else {
            return Err(reject(transport, "Invalid credential".to_string()).await);
        };

        if !self.state.directory.is_enabled(&identity) {
            let reason = format!("Identity {} is disabled", identity);
            return Err(reject(transport, reason).await);
        }

        tracing::debug!(
            "Handshake from {} validated: {} ({}) - {} {}",
            self.peer_addr,
            identity,
            hostname,
            os,
            arch
        );
        Ok(identity)
    }

    /// Duplex loop while attached; returns why the channel closed
    async fn run_channel<T>(
        &self,
        identity: &Identity,
        handle: &SessionHandle,
        mut outbound: mpsc::Receiver<Message>,
        transport: &mut Framed<T, FrameCodec>,
    ) -> String
    where
        T: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let config = &self.state.config;
        let registry = Arc::clone(handle.registry());

        let idle_timeout = config.heartbeat_timeout;
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        let mut heartbeat = interval_after(config.heartbeat_interval);
        let mut sweep = interval_after(config.sweep_interval);

        loop {
            tokio::select! {
                _ = handle.closed() => {
                    return "closed by hub".to_string();
                }

                _ = &mut idle => {
                    self.state.metrics.idle_disconnect();
                    return format!("nothing received for {:?}", idle_timeout);
                }

                Some(message) = outbound.recv() => {
                    if let Err(e) = transport.send(message).await {
                        return format!("send failed: {}", e);
                    }
                }

                frame = transport.next() => {
                    idle.as_mut().reset(Instant::now() + idle_timeout);

                    match frame {
                        Some(Ok(Message::Result(result))) => {
                            self.state.directory.touch(identity);
                            let call_id = result.call_id;
                            match registry.resolve(result) {
                                Resolution::Delivered => {}
                                Resolution::Late => {
                                    self.state.metrics.late_result();
                                    tracing::warn!("Late result {} from {}", call_id, identity);
                                }
                                Resolution::Unknown => {
                                    self.state.metrics.unknown_result();
                                    tracing::warn!("Unknown result {} from {}", call_id, identity);
                                }
                            }
                        }
                        Some(Ok(Message::HeartbeatAck { timestamp })) => {
                            self.state.directory.touch(identity);
                            tracing::trace!(
                                "Heartbeat ack from {}, latency={}ms",
                                identity,
                                elapsed_millis(timestamp)
                            );
                        }
                        Some(Ok(other)) => {
                            self.state.metrics.protocol_error();
                            return format!("unexpected {:?} from agent", other.message_type());
                        }
                        Some(Err(ProtocolError::Io(e))) => {
                            return format!("read failed: {}", e);
                        }
                        Some(Err(e)) => {
                            self.state.metrics.protocol_error();
                            return format!("protocol violation: {}", e);
                        }
                        None => return "closed by agent".to_string(),
                    }
                }

                _ = heartbeat.tick() => {
                    let ping = Message::Heartbeat { timestamp: current_time_millis() };
                    if let Err(e) = transport.send(ping).await {
                        return format!("heartbeat failed: {}", e);
                    }
                }

                _ = sweep.tick() => {
                    let expired = registry.expire(Instant::now());
                    if expired > 0 {
                        tracing::debug!("Expired {} calls on {}", expired, handle.connection_id());
                    }
                }
            }
        }
    }
}

/// Answer `Hello` with a refusal
async fn reject<T>(transport: &mut Framed<T, FrameCodec>, reason: String) -> ConnectionError
where
    T: AsyncRead + AsyncWrite + Send + Unpin,
{
    let ack = Message::HelloAck {
        accepted: false,
        reason: Some(reason.clone()),
    };
    if let Err(e) = transport.send(ack).await {
        tracing::debug!("Could not deliver rejection: {}", e);
    }
    let _ = transport.close().await;
    ConnectionError::AuthenticationFailed(reason)
}

/// Ticker whose first tick is one `period` away
fn interval_after(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
