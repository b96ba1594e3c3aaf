//! Request telemetry middleware.
//!
//! Applied as the outermost layer so every response is captured, including
//! framework-level rejections and timeouts. A response carrying a
//! [`RequestFailure`] extension (domain errors, panics, timeouts) takes the
//! failure path; every other response is a completed request. Either way the
//! response is returned exactly as the handler produced it, plus the
//! `x-request-id` header.

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header::USER_AGENT, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::any::Any;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::errors::{ApiError, RequestFailure};
use crate::observability::instrumentation::{Instrumentation, RequestContext};

/// Endpoint label for requests that matched no route.
pub const UNMATCHED_ENDPOINT: &str = "/other";

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest accepted caller-supplied request id.
const MAX_REQUEST_ID_LENGTH: usize = 128;

pub async fn request_telemetry_middleware(
    State(instrumentation): State<Instrumentation>,
    request: Request,
    next: Next,
) -> Response {
    let context = request_context(&request);
    let request_id = context.request_id.clone();
    let started = instrumentation.request_started(context);

    let mut response = next.run(request).await;

    let status = response.status().as_u16();
    match response.extensions().get::<RequestFailure>() {
        Some(failure) => instrumentation.request_failed(started, status, failure),
        None => instrumentation.request_completed(started, status),
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn request_context(request: &Request) -> RequestContext {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());

    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LENGTH)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    RequestContext {
        method: request.method().to_string(),
        endpoint,
        path: request.uri().path().to_string(),
        client_ip,
        user_agent,
        request_id,
    }
}

/// Marks the bare 408 produced by `TimeoutLayer` as a failed request.
pub async fn tag_timeout_response(mut response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT
        && response.extensions().get::<RequestFailure>().is_none()
    {
        response.extensions_mut().insert(RequestFailure {
            error_type: "TIMEOUT".to_string(),
            message: "Request timed out".to_string(),
        });
    }
    response
}

/// Panic handler for `CatchPanicLayer`: a 500 marked as a failed request.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };

    tracing::error!(target: "user_api.middleware", panic = %detail, "Request handler panicked");

    let mut response = ApiError::Internal.into_response();
    response.extensions_mut().insert(RequestFailure {
        error_type: "PANIC".to_string(),
        message: detail,
    });
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;
    use crate::audit::{AuditCategory, AuditDispatcher, AuditEvent, AuditSink, FieldValue};
    use crate::observability::log_queue::EventLogQueue;
    use crate::observability::logger::{MemorySink, StructuredLogger};
    use crate::observability::metrics::MetricsRegistry;
    use crate::observability::ServiceIdentity;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;
    use tower_http::catch_panic::CatchPanicLayer;
    use tower_http::timeout::TimeoutLayer;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<AuditEvent>>,
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn write_event(&self, event: &AuditEvent) -> bool {
            self.events.lock().unwrap().push(event.clone());
            true
        }
    }

    async fn handler_200() -> &'static str {
        "OK"
    }

    async fn handler_user(axum::extract::Path(_id): axum::extract::Path<i64>) -> &'static str {
        "user"
    }

    async fn handler_not_found() -> Result<&'static str, ApiError> {
        Err(ApiError::NotFound("User not found".to_string()))
    }

    async fn handler_panic() -> &'static str {
        panic!("boom")
    }

    async fn handler_slow() -> &'static str {
        tokio::time::sleep(Duration::from_secs(10)).await;
        "late"
    }

    struct TestApp {
        router: Router,
        instrumentation: Instrumentation,
        audit: Arc<RecordingSink>,
        log: MemorySink,
    }

    fn test_app() -> TestApp {
        let log = MemorySink::new();
        let logger = Arc::new(StructuredLogger::new(
            ServiceIdentity::new("user-mgt-api", "test"),
            Some(Box::new(log.clone())),
            false,
        ));
        let (event_log, _writer) = EventLogQueue::spawn(logger, 64).unwrap();
        let audit = Arc::new(RecordingSink::default());
        let (dispatcher, _join) =
            AuditDispatcher::spawn(audit.clone(), 64, CancellationToken::new());
        let instrumentation = Instrumentation::new(
            Arc::new(MetricsRegistry::new().unwrap()),
            event_log,
            dispatcher,
        );

        let router = Router::new()
            .route("/success", get(handler_200))
            .route("/users/:id", get(handler_user))
            .route("/missing", get(handler_not_found))
            .route("/panic", get(handler_panic))
            .route("/slow", get(handler_slow))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(TimeoutLayer::new(Duration::from_millis(100)))
            .layer(middleware::map_response(tag_timeout_response))
            .layer(middleware::from_fn_with_state(
                instrumentation.clone(),
                request_telemetry_middleware,
            ));

        TestApp {
            router,
            instrumentation,
            audit,
            log,
        }
    }

    fn get_request(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .expect("request builder should succeed")
    }

    async fn wait_for_events(app: &TestApp, count: usize) -> Vec<AuditEvent> {
        for _ in 0..200 {
            if app.audit.events.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        app.audit.events.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_middleware_records_success() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(get_request("/success"))
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(REQUEST_ID_HEADER).is_some());

        let rendered = app.instrumentation.metrics().render();
        assert!(rendered
            .contains(r#"http_requests_total{method="GET",endpoint="/success",status="200"} 1"#));

        let events = wait_for_events(&app, 1).await;
        assert_eq!(events[0].category(), AuditCategory::ApiRequests);
        // oneshot has no connection info
        assert_eq!(
            events[0].field("ip_address"),
            Some(&FieldValue::Text("unknown".to_string()))
        );
    }

    #[tokio::test]
    async fn test_middleware_uses_route_template() {
        let app = test_app();

        app.router
            .clone()
            .oneshot(get_request("/users/12345"))
            .await
            .unwrap();

        let rendered = app.instrumentation.metrics().render();
        assert!(rendered.contains(r#"endpoint="/users/:id""#));
        assert!(!rendered.contains("12345"));
    }

    #[tokio::test]
    async fn test_middleware_labels_unmatched_routes() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(get_request("/no/such/route"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(app
            .instrumentation
            .metrics()
            .render()
            .contains(r#"http_requests_total{method="GET",endpoint="/other",status="404"} 1"#));
    }

    #[tokio::test]
    async fn test_middleware_failure_path_keeps_response() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(get_request("/missing"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["message"], "User not found");

        let events = wait_for_events(&app, 1).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category(), AuditCategory::Errors);
        assert_eq!(
            events[0].field("error_type"),
            Some(&FieldValue::Text("NOT_FOUND".to_string()))
        );
    }

    #[tokio::test]
    async fn test_middleware_panic_becomes_failed_500() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(get_request("/panic"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let events = wait_for_events(&app, 1).await;
        assert_eq!(
            events[0].field("error_type"),
            Some(&FieldValue::Text("PANIC".to_string()))
        );
        assert_eq!(
            events[0].field("error_message"),
            Some(&FieldValue::Text("boom".to_string()))
        );
    }

    #[tokio::test]
    async fn test_middleware_propagates_request_id() {
        let app = test_app();

        let request = HttpRequest::builder()
            .uri("/success")
            .header(REQUEST_ID_HEADER, "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc-123");

        // Both started and completed records carry it
        for _ in 0..200 {
            if app.log.records().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let records = app.log.records();
        assert!(records.len() >= 2);
        assert!(records.iter().all(|r| r["request_id"] == "abc-123"));
    }

    #[tokio::test]
    async fn test_middleware_timeout_recorded_as_failure() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(get_request("/slow"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(app
            .instrumentation
            .metrics()
            .render()
            .contains(r#"http_requests_total{method="GET",endpoint="/slow",status="408"} 1"#));

        let events = wait_for_events(&app, 1).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category(), AuditCategory::Errors);
        assert_eq!(
            events[0].field("error_type"),
            Some(&FieldValue::Text("TIMEOUT".to_string()))
        );
    }

    #[tokio::test]
    async fn test_tag_timeout_keeps_existing_failure() {
        let mut response = StatusCode::REQUEST_TIMEOUT.into_response();
        response.extensions_mut().insert(RequestFailure {
            error_type: "UPSTREAM".to_string(),
            message: "slow upstream".to_string(),
        });

        let response = tag_timeout_response(response).await;
        assert_eq!(
            response.extensions().get::<RequestFailure>().unwrap().error_type,
            "UPSTREAM"
        );

        let ok = tag_timeout_response(StatusCode::OK.into_response()).await;
        assert!(ok.extensions().get::<RequestFailure>().is_none());
    }
}
