//! Local routing contract
//!
//! The agent hands every inbound call to a `LocalRouter`, which executes it
//! against a service on the kiosk's own network.

use async_trait::async_trait;
use std::time::Duration;

use kb_protocol::{CallEnvelope, Reply};

/// Executes calls against local services
#[async_trait]
pub trait LocalRouter: Send + Sync {
    /// Execute a call and produce its reply.
    ///
    /// Never fails at the type level: a missing route, a rejected verb or an
    /// unreachable service all come back as a `status=error` reply so the
    /// call is always answered.
    async fn invoke(&self, call: &CallEnvelope, timeout: Duration) -> Reply;

    /// Configured timeout for an operation, if the router has a route for it
    fn timeout_for(&self, operation: &str) -> Option<Duration>;

    /// Number of configured routes
    fn route_count(&self) -> usize {
        0
    }
}
