//! Handle to one live tunnel channel

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kb_core::{CallError, CorrelationRegistry};
use kb_protocol::Message;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Cloneable handle to a channel's write side and its pending calls.
///
/// Two handles are equal only if they refer to the same accepted connection.
#[derive(Clone)]
pub struct SessionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<Message>,
    registry: Arc<CorrelationRegistry>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        outbound: mpsc::Sender<Message>,
        cancel: CancellationToken,
        peer: Option<SocketAddr>,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            peer,
            outbound,
            registry: Arc::new(CorrelationRegistry::new()),
            cancel,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Calls in flight on this channel
    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Queue a frame for the channel's writer
    pub async fn send(&self, message: Message) -> Result<(), CallError> {
        if self.cancel.is_cancelled() {
            return Err(CallError::Disconnected);
        }
        self.outbound
            .send(message)
            .await
            .map_err(|_| CallError::Disconnected)
    }

    /// Ask the channel's loop to tear the connection down
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }

    /// Resolves once the channel has been asked to close
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("pending", &self.registry.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_after_close_is_disconnected() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = SessionHandle::new(tx, CancellationToken::new(), None);

        handle.send(Message::Heartbeat { timestamp: 1 }).await.unwrap();
        assert_eq!(rx.recv().await, Some(Message::Heartbeat { timestamp: 1 }));

        handle.close();
        assert!(handle.is_closed());
        assert_eq!(
            handle.send(Message::Heartbeat { timestamp: 2 }).await,
            Err(CallError::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_send_after_writer_gone_is_disconnected() {
        let (tx, rx) = mpsc::channel(4);
        let handle = SessionHandle::new(tx, CancellationToken::new(), None);
        drop(rx);

        assert!(handle.is_closed());
        assert_eq!(
            handle.send(Message::Heartbeat { timestamp: 1 }).await,
            Err(CallError::Disconnected)
        );
    }

    #[test]
    fn test_handles_compare_by_connection() {
        let (tx, _rx) = mpsc::channel(1);
        let a = SessionHandle::new(tx.clone(), CancellationToken::new(), None);
        let b = SessionHandle::new(tx, CancellationToken::new(), None);

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.connection_id(), b.connection_id());
    }
}
