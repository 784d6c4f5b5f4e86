//! Local `/health` endpoint

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;

use crate::state::{AgentState, HealthSnapshot};

/// Create the health router
pub fn create_router(state: AgentState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// GET /health
async fn health_handler(State(state): State<AgentState>) -> Json<HealthSnapshot> {
    Json(state.snapshot())
}

/// Serve the health endpoint on `bind` until `cancel` fires
pub async fn serve(bind: &str, state: AgentState, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Health endpoint listening on http://{}/health", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::AgentMetrics;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use kb_core::ConnectionState;
    use std::sync::Arc;
    use tokio::sync::watch;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_snapshot() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Online);
        let metrics = Arc::new(AgentMetrics::new());
        metrics.call_received();
        metrics.set_queue_depth(3);

        let app = create_router(AgentState::new(state_rx, Arc::clone(&metrics), 2));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["state"], "online");
        assert_eq!(json["connected"], true);
        assert_eq!(json["queue_depth"], 3);
        assert_eq!(json["routes_configured"], 2);
        assert_eq!(json["counters"]["calls_received"], 1);

        drop(state_tx);
    }
}
