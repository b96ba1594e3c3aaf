//! Service banner and health handlers.
//!
//! - `/`: service banner
//! - `/health`: aggregated dependency health, always 200

use crate::models::{ServiceEndpoints, ServiceInfo};
use crate::observability::health::HealthSnapshot;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

/// Service banner.
pub async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: "User Management API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: ServiceEndpoints {
            users: "/api/v1/users".to_string(),
            metrics: "/metrics".to_string(),
            health: "/health".to_string(),
        },
    })
}

/// Health handler.
///
/// Serves the snapshot stored by the background poller. A degraded or
/// unreachable audit store is reported in the body, never through the
/// status code: the API keeps serving while its audit trail is impaired.
#[tracing::instrument(skip_all, name = "user_api.health")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthSnapshot> {
    Json(state.health.overall_health().await)
}
