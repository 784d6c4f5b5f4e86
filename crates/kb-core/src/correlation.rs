//! Call correlation registry
//!
//! Maps an in-flight [`CallId`] to the waiter that will receive its outcome.
//! One registry exists per tunnel endpoint (per channel on the hub, per
//! connection manager on the agent).
//!
//! # Exactly-once delivery
//!
//! Every terminal event (a matching result, a deadline sweep, a disconnect,
//! a caller giving up) first removes the entry under the registry lock and
//! only the event that removed it delivers. Delivery is a `oneshot` send made
//! while the lock is still held, so once an entry is gone its outcome is
//! already sitting in the waiter's channel. Later events find nothing and
//! are no-ops.
//!
//! The lock is a plain `std::sync::Mutex` and is never held across an
//! `.await`, so `resolve` is non-blocking and safe to call from a channel's
//! read loop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use kb_protocol::{CallId, ResultEnvelope};

use crate::error::CallError;

/// Outcome delivered to a waiter
pub type CallOutcome = Result<ResultEnvelope, CallError>;

/// How many expired call IDs are remembered for orphan classification
pub const TOMBSTONE_CAPACITY: usize = 1024;

/// Classification of a `resolve` attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Delivered to the waiting caller
    Delivered,
    /// Orphan for a call that already reached its terminal outcome
    Late,
    /// Orphan for a call ID this registry never saw (or forgot)
    Unknown,
}

/// Counters kept by the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub registered: u64,
    pub delivered: u64,
    pub timed_out: u64,
    pub abandoned: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub late_results: u64,
    pub unknown_results: u64,
}

struct PendingCall {
    created_at: Instant,
    deadline: Instant,
    waiter: oneshot::Sender<CallOutcome>,
}

#[derive(Default)]
struct Inner {
    pending: HashMap<CallId, PendingCall>,
    tombstones: VecDeque<CallId>,
    tombstone_set: HashSet<CallId>,
    stats: RegistryStats,
}

impl Inner {
    fn bury(&mut self, call_id: CallId) {
        if self.tombstone_set.insert(call_id) {
            self.tombstones.push_back(call_id);
            if self.tombstones.len() > TOMBSTONE_CAPACITY {
                if let Some(oldest) = self.tombstones.pop_front() {
                    self.tombstone_set.remove(&oldest);
                }
            }
        }
    }
}

/// Registry of in-flight calls
#[derive(Default)]
pub struct CorrelationRegistry {
    inner: Mutex<Inner>,
}

impl CorrelationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing inside can be left half-updated by a panic
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a call and get the waiter for its outcome
    pub fn register(&self, call_id: CallId, deadline: Instant) -> Result<Waiter, CallError> {
        let mut inner = self.lock();

        if inner.pending.contains_key(&call_id) {
            inner.stats.duplicates += 1;
            tracing::error!("Call ID {} already registered", call_id);
            return Err(CallError::DuplicateCallId(call_id));
        }

        let (tx, rx) = oneshot::channel();
        inner.pending.insert(
            call_id,
            PendingCall {
                created_at: Instant::now(),
                deadline,
                waiter: tx,
            },
        );
        inner.stats.registered += 1;

        Ok(Waiter { call_id, rx })
    }

    /// Deliver a result to its waiter.
    ///
    /// Results without a pending call are orphans: they are dropped, logged
    /// and counted, never treated as errors.
    pub fn resolve(&self, result: ResultEnvelope) -> Resolution {
        let mut inner = self.lock();
        let call_id = result.call_id;

        match inner.pending.remove(&call_id) {
            Some(pending) => {
                inner.stats.delivered += 1;
                inner.bury(call_id);
                tracing::trace!(
                    "Call {} resolved after {:?}",
                    call_id,
                    pending.created_at.elapsed()
                );
                // The caller may have gone away; nothing left to do then
                let _ = pending.waiter.send(Ok(result));
                Resolution::Delivered
            }
            None if inner.tombstone_set.contains(&call_id) => {
                inner.stats.late_results += 1;
                tracing::warn!("Dropping late result for call {}", call_id);
                Resolution::Late
            }
            None => {
                inner.stats.unknown_results += 1;
                tracing::warn!("Dropping result for unknown call {}", call_id);
                Resolution::Unknown
            }
        }
    }

    /// Fail every call whose deadline is at or before `now` with `Timeout`.
    ///
    /// Returns the number of calls expired.
    pub fn expire(&self, now: Instant) -> usize {
        let mut inner = self.lock();

        let expired: Vec<CallId> = inner
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(call_id, _)| *call_id)
            .collect();

        for call_id in &expired {
            if let Some(pending) = inner.pending.remove(call_id) {
                let _ = pending.waiter.send(Err(CallError::Timeout));
                inner.stats.timed_out += 1;
                inner.bury(*call_id);
            }
        }

        if !expired.is_empty() {
            tracing::debug!("Expired {} calls", expired.len());
        }
        expired.len()
    }

    /// Fail every pending call with `error` (typically `Disconnected`).
    ///
    /// Returns the number of calls failed.
    pub fn fail_all(&self, error: CallError) -> usize {
        let mut inner = self.lock();

        let drained: Vec<(CallId, PendingCall)> = inner.pending.drain().collect();
        let count = drained.len();

        for (call_id, pending) in drained {
            let _ = pending.waiter.send(Err(error.clone()));
            inner.stats.failed += 1;
            inner.bury(call_id);
        }

        count
    }

    /// Give up waiting on a call from the caller's side.
    ///
    /// Returns `true` if the entry was still pending (the caller's timeout
    /// wins). Returns `false` if another event already resolved it; its
    /// outcome is then in the waiter.
    pub fn abandon(&self, call_id: CallId) -> bool {
        let mut inner = self.lock();

        match inner.pending.remove(&call_id) {
            Some(_) => {
                inner.stats.abandoned += 1;
                inner.bury(call_id);
                true
            }
            None => false,
        }
    }

    /// Drop an entry without delivering anything
    pub fn remove(&self, call_id: CallId) -> bool {
        let mut inner = self.lock();
        if inner.pending.remove(&call_id).is_none() {
            return false;
        }
        inner.bury(call_id);
        true
    }

    /// Whether a call is pending
    pub fn contains(&self, call_id: CallId) -> bool {
        self.lock().pending.contains_key(&call_id)
    }

    /// Number of pending calls
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Check if no calls are pending
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> RegistryStats {
        self.lock().stats
    }
}

/// Receiving side of a registered call
#[derive(Debug)]
pub struct Waiter {
    call_id: CallId,
    rx: oneshot::Receiver<CallOutcome>,
}

impl Waiter {
    /// The call this waiter belongs to
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Wait until the registry delivers an outcome.
    ///
    /// A registry dropped with the call still pending counts as a disconnect.
    pub async fn wait(self) -> CallOutcome {
        self.rx.await.unwrap_or(Err(CallError::Disconnected))
    }

    /// Wait, but give up at `deadline` with `Timeout`.
    ///
    /// Only the waiting caller is suspended. If a result races the deadline,
    /// whichever removed the registry entry first decides the outcome.
    pub async fn wait_until(self, registry: &CorrelationRegistry, deadline: Instant) -> CallOutcome {
        let Waiter { call_id, mut rx } = self;

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(outcome) => outcome.unwrap_or(Err(CallError::Disconnected)),
            Err(_) => {
                if registry.abandon(call_id) {
                    Err(CallError::Timeout)
                } else {
                    rx.try_recv().unwrap_or(Err(CallError::Disconnected))
                }
            }
        }
    }
}
