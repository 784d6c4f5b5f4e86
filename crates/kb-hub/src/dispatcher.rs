//! Call dispatcher
//!
//! Turns a caller's request into a [`CallEnvelope`] on the target identity's
//! channel and suspends that caller, and only that caller, until the
//! channel's registry hands back an outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use kb_core::time::deadline_after;
use kb_core::{CallError, Identity};
use kb_protocol::{CallEnvelope, CallId, Headers, Message, Method, Reply};

use crate::session::SessionDirectory;

/// Issues calls to connected agents
pub struct Dispatcher {
    directory: Arc<SessionDirectory>,
    default_timeout: Duration,
    dispatched: AtomicU64,
    ok: AtomicU64,
    remote_errors: AtomicU64,
    timeouts: AtomicU64,
    disconnected: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of the dispatcher's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    pub dispatched: u64,
    pub ok: u64,
    pub remote_errors: u64,
    pub timeouts: u64,
    pub disconnected: u64,
    pub rejected: u64,
}

impl Dispatcher {
    pub fn new(directory: Arc<SessionDirectory>, default_timeout: Duration) -> Self {
        Self {
            directory,
            default_timeout,
            dispatched: AtomicU64::new(0),
            ok: AtomicU64::new(0),
            remote_errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            disconnected: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Timeout used when the caller does not pick one
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Call `operation` on `identity` and wait for its reply.
    ///
    /// Rejections (`NotConnected`, `Disabled`) happen before anything is
    /// registered or sent. Once the envelope is registered the caller gets
    /// exactly one of: the agent's reply, `Timeout`, or `Disconnected`.
    /// A reply with `status = error` is still `Ok` here; it carries a
    /// routing or upstream failure reported by the agent.
    pub async fn dispatch(
        &self,
        identity: &Identity,
        operation: &str,
        method: Method,
        headers: Headers,
        body: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<Reply, CallError> {
        let handle = match self.directory.lookup(identity) {
            Ok(handle) => handle,
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Rejected {} for {}: {}", operation, identity, e);
                return Err(e);
            }
        };

        let timeout = timeout.unwrap_or(self.default_timeout);
        let deadline = deadline_after(timeout);
        let call_id = CallId::generate();
        let registry = Arc::clone(handle.registry());
        let waiter = registry.register(call_id, deadline)?;
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            "Dispatching {} {} to {} as {} (timeout {:?})",
            method,
            operation,
            identity,
            call_id,
            timeout
        );

        let call = CallEnvelope::new(call_id, operation, method, headers, body);
        let sent = tokio::time::timeout_at(deadline, handle.send(Message::Call(call))).await;
        let outcome = match sent {
            Ok(Ok(())) => waiter.wait_until(&registry, deadline).await,
            Ok(Err(e)) => {
                // Channel already dead: nothing will ever answer this call
                registry.remove(call_id);
                Err(e)
            }
            Err(_) => {
                // Outbound queue stayed full until the deadline
                registry.remove(call_id);
                Err(CallError::Timeout)
            }
        };

        match outcome {
            Ok(result) => {
                let reply = result.into_reply();
                if reply.is_ok() {
                    self.ok.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.remote_errors.fetch_add(1, Ordering::Relaxed);
                }
                Ok(reply)
            }
            Err(e) => {
                match e {
                    CallError::Timeout => {
                        self.timeouts.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("{} on {} timed out after {:?}", call_id, identity, timeout);
                    }
                    CallError::Disconnected => {
                        self.disconnected.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("{} on {} lost its channel", call_id, identity);
                    }
                    _ => {}
                }
                Err(e)
            }
        }
    }

    pub fn counters(&self) -> DispatchCounters {
        DispatchCounters {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            ok: self.ok.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            disconnected: self.disconnected.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
