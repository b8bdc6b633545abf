//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Body of `GET /health`.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Outbox entries not yet published; a growing number means the relay
    /// cannot reach the bus.
    pub pending_outbox_entries: u64,
}

/// GET /health: returns system health status.
pub async fn check(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let pending_outbox_entries = state.outbox_store.pending_count().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        pending_outbox_entries,
    }))
}
