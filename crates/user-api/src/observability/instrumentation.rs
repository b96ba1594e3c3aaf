//! Request and domain event instrumentation.
//!
//! Fans every finished request out to three independent sinks in a fixed
//! order: metrics registry, audit queue, structured event log. All three
//! hand-offs are synchronous and non-blocking. The event log goes through a
//! single FIFO queue, so each request's "started" record is written before
//! its terminal record while different requests interleave freely.
//!
//! Nothing here can fail a request: every sink reports its outcome as a
//! value and the outcomes are ignored.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::log_queue::EventLogQueue;
use super::logger::LogLevel;
use super::metrics::MetricsRegistry;
use crate::audit::{ApiRequestRecord, AuditDispatcher, AuditEvent, Details, ErrorRecord};
use crate::errors::RequestFailure;
use crate::services::{UserAction, UserActionSink};

/// Client address label when the connection info is missing.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// What the routing layer knows about a request when it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: String,
    /// Route template, used as the metric and audit endpoint.
    pub endpoint: String,
    /// Raw request path, only written to the event log.
    pub path: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: String,
}

impl RequestContext {
    pub fn client_ip_or_unknown(&self) -> &str {
        self.client_ip.as_deref().unwrap_or(UNKNOWN_CLIENT)
    }
}

/// A request between `Started` and its terminal state.
///
/// Consumed by [`Instrumentation::request_completed`] or
/// [`Instrumentation::request_failed`]; dropping it (cancelled request)
/// skips the terminal telemetry.
#[must_use]
#[derive(Debug)]
pub struct StartedRequest {
    context: RequestContext,
    started: Instant,
}

impl StartedRequest {
    pub fn context(&self) -> &RequestContext {
        &self.context
    }
}

/// Injected telemetry sinks shared by the middleware and domain services.
#[derive(Clone)]
pub struct Instrumentation {
    metrics: Arc<MetricsRegistry>,
    event_log: EventLogQueue,
    audit: AuditDispatcher,
}

impl Instrumentation {
    pub fn new(
        metrics: Arc<MetricsRegistry>,
        event_log: EventLogQueue,
        audit: AuditDispatcher,
    ) -> Self {
        Self {
            metrics,
            event_log,
            audit,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn event_log(&self) -> &EventLogQueue {
        &self.event_log
    }

    pub fn audit(&self) -> &AuditDispatcher {
        &self.audit
    }

    /// `Started`: remember the start time and log the request.
    pub fn request_started(&self, context: RequestContext) -> StartedRequest {
        self.event_log.enqueue(
            LogLevel::Info,
            "Request started",
            json!({
                "method": context.method,
                "url": context.path,
                "endpoint": context.endpoint,
                "client_ip": context.client_ip_or_unknown(),
                "user_agent": context.user_agent,
                "request_id": context.request_id,
            }),
        );

        StartedRequest {
            context,
            started: Instant::now(),
        }
    }

    /// `Completed(status)`: metrics, then audit, then log.
    pub fn request_completed(&self, request: StartedRequest, status: u16) {
        let finished_at = Utc::now();
        let duration = request.started.elapsed();
        let context = request.context;

        self.metrics
            .record_request(&context.method, &context.endpoint, status, duration);

        let duration_ms = millis(duration);
        self.audit.dispatch(AuditEvent::api_request(
            ApiRequestRecord {
                method: context.method.clone(),
                endpoint: context.endpoint.clone(),
                status_code: status,
                duration_ms,
                user_id: None,
                ip_address: Some(context.client_ip_or_unknown().to_string()),
            },
            finished_at,
        ));

        self.event_log.enqueue(
            LogLevel::Info,
            "Request completed",
            json!({
                "method": context.method,
                "url": context.path,
                "endpoint": context.endpoint,
                "status_code": status,
                "duration_ms": duration_ms,
                "client_ip": context.client_ip_or_unknown(),
                "request_id": context.request_id,
            }),
        );
    }

    /// `Failed(error)`: metrics, then error audit document, then error log.
    ///
    /// The caller returns its original response untouched.
    pub fn request_failed(&self, request: StartedRequest, status: u16, failure: &RequestFailure) {
        let failed_at = Utc::now();
        let duration = request.started.elapsed();
        let context = request.context;

        self.metrics
            .record_request(&context.method, &context.endpoint, status, duration);

        self.audit.dispatch(AuditEvent::error(
            ErrorRecord {
                error_type: failure.error_type.clone(),
                error_message: failure.message.clone(),
                stack_trace: None,
                user_id: None,
                request_id: Some(context.request_id.clone()),
            },
            failed_at,
        ));

        self.event_log.enqueue(
            LogLevel::Error,
            "Request failed",
            json!({
                "method": context.method,
                "url": context.path,
                "endpoint": context.endpoint,
                "status_code": status,
                "duration_ms": millis(duration),
                "error_type": failure.error_type,
                "error_message": failure.message,
                "client_ip": context.client_ip_or_unknown(),
                "request_id": context.request_id,
            }),
        );
    }
}

impl UserActionSink for Instrumentation {
    fn user_action(&self, user_id: i64, action: UserAction, details: Details) {
        let details_json = serde_json::to_value(&details).unwrap_or(Value::Null);
        self.audit.dispatch(AuditEvent::user_action(
            user_id,
            action.as_str(),
            details,
            Utc::now(),
        ));

        self.event_log.enqueue(
            LogLevel::Info,
            "User action",
            json!({
                "user_id": user_id,
                "action": action.as_str(),
                "details": details_json,
            }),
        );
    }
}

impl std::fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumentation")
            .field("audit", &self.audit)
            .field("event_log", &self.event_log)
            .finish_non_exhaustive()
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
