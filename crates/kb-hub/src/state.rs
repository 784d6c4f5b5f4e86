//! Global hub state

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use kb_core::config::HubConfig;

use crate::auth::CredentialValidator;
use crate::dispatcher::{DispatchCounters, Dispatcher};
use crate::session::SessionDirectory;

/// Channel-level counters, shared by every connection task
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    handshakes_accepted: AtomicU64,
    handshakes_rejected: AtomicU64,
    late_results: AtomicU64,
    unknown_results: AtomicU64,
    protocol_errors: AtomicU64,
    idle_disconnects: AtomicU64,
}

/// Point-in-time copy of [`ChannelMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelCounters {
    pub handshakes_accepted: u64,
    pub handshakes_rejected: u64,
    pub late_results: u64,
    pub unknown_results: u64,
    pub protocol_errors: u64,
    pub idle_disconnects: u64,
}

impl ChannelMetrics {
    pub fn handshake_accepted(&self) {
        self.handshakes_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_rejected(&self) {
        self.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Result for a call that already timed out or lost its channel
    pub fn late_result(&self) {
        self.late_results.fetch_add(1, Ordering::Relaxed);
    }

    /// Result for a call ID the channel never issued
    pub fn unknown_result(&self) {
        self.unknown_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn idle_disconnect(&self) {
        self.idle_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelCounters {
        ChannelCounters {
            handshakes_accepted: self.handshakes_accepted.load(Ordering::Relaxed),
            handshakes_rejected: self.handshakes_rejected.load(Ordering::Relaxed),
            late_results: self.late_results.load(Ordering::Relaxed),
            unknown_results: self.unknown_results.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            idle_disconnects: self.idle_disconnects.load(Ordering::Relaxed),
        }
    }
}

/// All hub counters, as served at `/health`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HubCounters {
    #[serde(flatten)]
    pub dispatch: DispatchCounters,
    #[serde(flatten)]
    pub channels: ChannelCounters,
}

/// Liveness snapshot served at `/health`
#[derive(Debug, Clone, Serialize)]
pub struct HubHealth {
    pub uptime_secs: u64,
    pub session_count: usize,
    pub online_count: usize,
    pub counters: HubCounters,
}

/// Global state for the hub daemon
pub struct HubState {
    /// Configuration
    pub config: HubConfig,
    /// Identity to channel mapping
    pub directory: Arc<SessionDirectory>,
    /// Call issuer
    pub dispatcher: Arc<Dispatcher>,
    /// Handshake credential check
    pub validator: Arc<dyn CredentialValidator>,
    /// Channel counters
    pub metrics: ChannelMetrics,
    started_at: Instant,
}

impl HubState {
    /// Create hub state around a credential validator
    pub fn new(config: HubConfig, validator: Arc<dyn CredentialValidator>) -> Self {
        let directory = Arc::new(SessionDirectory::new(config.allow_duplicates));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&directory),
            config.default_call_timeout,
        ));

        Self {
            config,
            directory,
            dispatcher,
            validator,
            metrics: ChannelMetrics::default(),
            started_at: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> HubHealth {
        HubHealth {
            uptime_secs: self.started_at.elapsed().as_secs(),
            session_count: self.directory.len(),
            online_count: self.directory.online_count(),
            counters: HubCounters {
                dispatch: self.dispatcher.counters(),
                channels: self.metrics.snapshot(),
            },
        }
    }
}
