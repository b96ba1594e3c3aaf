//! Observability for the User API.
//!
//! Provides the metrics registry, the structured event logger with its
//! writer queue, and the health aggregator.

pub mod health;
pub mod instrumentation;
pub mod log_queue;
pub mod logger;
pub mod metrics;

/// Service name and environment stamped on every log record and audit
/// document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub service: String,
    pub environment: String,
}

impl ServiceIdentity {
    pub fn new(service: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            environment: environment.into(),
        }
    }
}
