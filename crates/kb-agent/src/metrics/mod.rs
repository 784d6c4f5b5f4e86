//! Agent counters
//!
//! Plain atomics shared between the connection manager, the call tasks and
//! the health endpoint. Every silent-loss point (overflow drops, duplicate
//! calls) has its own counter.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Live counters for one agent
#[derive(Debug, Default)]
pub struct AgentMetrics {
    calls_received: AtomicU64,
    results_sent: AtomicU64,
    results_queued: AtomicU64,
    queue_dropped: AtomicU64,
    error_results: AtomicU64,
    duplicate_calls: AtomicU64,
    reconnections: AtomicU64,
    auth_rejections: AtomicU64,
    protocol_errors: AtomicU64,
    queue_depth: AtomicUsize,
}

/// Point-in-time copy of [`AgentMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentCounters {
    pub calls_received: u64,
    pub results_sent: u64,
    pub results_queued: u64,
    pub queue_dropped: u64,
    pub error_results: u64,
    pub duplicate_calls: u64,
    pub reconnections: u64,
    pub auth_rejections: u64,
    pub protocol_errors: u64,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_received(&self) {
        self.calls_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn result_sent(&self) {
        self.results_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn result_queued(&self) {
        self.results_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_dropped(&self) {
        self.queue_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A call answered with `status=error`, whatever the error kind
    pub fn error_result(&self) {
        self.error_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate_call(&self) {
        self.duplicate_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnected(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_rejected(&self) {
        self.auth_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the offline queue's current length
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> AgentCounters {
        AgentCounters {
            calls_received: self.calls_received.load(Ordering::Relaxed),
            results_sent: self.results_sent.load(Ordering::Relaxed),
            results_queued: self.results_queued.load(Ordering::Relaxed),
            queue_dropped: self.queue_dropped.load(Ordering::Relaxed),
            error_results: self.error_results.load(Ordering::Relaxed),
            duplicate_calls: self.duplicate_calls.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            auth_rejections: self.auth_rejections.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let metrics = AgentMetrics::new();
        metrics.call_received();
        metrics.call_received();
        metrics.queue_dropped();
        metrics.set_queue_depth(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.calls_received, 2);
        assert_eq!(snapshot.queue_dropped, 1);
        assert_eq!(snapshot.results_sent, 0);
        assert_eq!(metrics.queue_depth(), 4);
    }
}
