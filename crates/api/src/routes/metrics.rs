//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use store::OutboxStore;

/// Prometheus handle plus the outbox whose backlog is reported as a gauge.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub outbox: Arc<dyn OutboxStore>,
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.outbox.pending_count().await {
        Ok(pending) => metrics::gauge!("outbox_pending_entries").set(pending as f64),
        Err(e) => tracing::warn!(error = %e, "failed to count pending outbox entries"),
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.handle.render(),
    )
}
