//! Prometheus metrics endpoint.

use crate::observability::metrics::{ACTIVE_USERS_TOTAL, EXPOSITION_CONTENT_TYPE, USERS_TOTAL};
use crate::routes::AppState;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use std::sync::Arc;

/// Handler for `GET /metrics`.
///
/// Refreshes the user gauges from the database, then renders the registry.
/// A failed count leaves the gauges at their previous values.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = state.instrumentation.metrics();

    match state.users.counts().await {
        Ok((total, active)) => {
            metrics.set_gauge(USERS_TOTAL, total as f64);
            metrics.set_gauge(ACTIVE_USERS_TOTAL, active as f64);
        }
        Err(e) => {
            tracing::warn!(target: "user_api.metrics", error = %e, "Failed to refresh user gauges");
        }
    }

    ([(CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], metrics.render())
}
