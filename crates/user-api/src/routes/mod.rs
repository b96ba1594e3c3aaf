//! HTTP routes for the User API.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::middleware::{panic_response, request_telemetry_middleware, tag_timeout_response};
use crate::observability::health::HealthAggregator;
use crate::observability::instrumentation::Instrumentation;
use crate::services::UserService;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

/// Request timeout applied to every route.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// User domain service.
    pub users: UserService,

    /// Telemetry sinks (metrics, audit queue, event log).
    pub instrumentation: Instrumentation,

    pub health: Arc<HealthAggregator>,

    /// Service configuration.
    pub config: Config,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/` - Service banner
/// - `/health` - Aggregated health (audit store)
/// - `/metrics` - Prometheus exposition
/// - `/api/v1/users` - Create and list users
/// - `/api/v1/users/:user_id` - Get, update and delete a user
/// - Panic recovery, TraceLayer, 30 second request timeout
/// - Permissive CORS (any origin, method and header)
/// - Request telemetry middleware
pub fn build_routes(state: Arc<AppState>) -> Router {
    let instrumentation = state.instrumentation.clone();

    let user_routes = Router::new()
        .route(
            "/api/v1/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route(
            "/api/v1/users/:user_id",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        );

    // Layer order (bottom-to-top execution):
    // 1. CatchPanicLayer - Panics become failed 500s (innermost)
    // 2. TraceLayer - Log request details
    // 3. TimeoutLayer - Timeout the request
    // 4. tag_timeout_response - Timeout 408s become failed requests
    // 5. CorsLayer - Answer preflights, add CORS headers
    // 6. request_telemetry_middleware - Record ALL responses (outermost)
    Router::new()
        .route("/", get(handlers::service_info))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(user_routes)
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::map_response(tag_timeout_response))
        .layer(CorsLayer::permissive())
        // Outermost so framework-level rejections (404, 405) and timeouts
        // are recorded too
        .layer(middleware::from_fn_with_state(
            instrumentation,
            request_telemetry_middleware,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_config_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<Config>();
    }
}
