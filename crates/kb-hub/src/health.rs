//! Hub `/health` endpoint

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;

use crate::state::{HubHealth, HubState};

pub fn create_router(state: Arc<HubState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<HubState>>) -> Json<HubHealth> {
    Json(state.snapshot())
}

/// Serve the health endpoint on `bind` until `cancel` fires
pub async fn serve(bind: &str, state: Arc<HubState>, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Health endpoint listening on http://{}/health", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
