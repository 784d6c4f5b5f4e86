//! Agent state shared with the health endpoint

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use kb_core::ConnectionState;

use crate::metrics::{AgentCounters, AgentMetrics};

/// Read-only view of a running agent
#[derive(Clone)]
pub struct AgentState {
    state: watch::Receiver<ConnectionState>,
    metrics: Arc<AgentMetrics>,
    started_at: Instant,
    routes_configured: usize,
}

/// Liveness snapshot served at `/health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub state: ConnectionState,
    pub connected: bool,
    pub uptime_secs: u64,
    pub queue_depth: usize,
    pub routes_configured: usize,
    pub counters: AgentCounters,
}

impl AgentState {
    /// Create new agent state
    pub fn new(
        state: watch::Receiver<ConnectionState>,
        metrics: Arc<AgentMetrics>,
        routes_configured: usize,
    ) -> Self {
        Self {
            state,
            metrics,
            started_at: Instant::now(),
            routes_configured,
        }
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.connection_state();
        HealthSnapshot {
            state,
            connected: state.is_online(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            queue_depth: self.metrics.queue_depth(),
            routes_configured: self.routes_configured,
            counters: self.metrics.snapshot(),
        }
    }
}
