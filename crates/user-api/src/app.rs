//! Component wiring shared by the binary and the test harness.
//!
//! Builds every injected component from a [`Config`]: event log and its
//! writer queue, metrics registry, audit writer and queue, health aggregator
//! and its poller, user service.

use crate::audit::{AuditDispatcher, AuditIndexWriter, AuditStoreSettings};
use crate::config::Config;
use crate::errors::ApiError;
use crate::observability::health::HealthAggregator;
use crate::observability::instrumentation::Instrumentation;
use crate::observability::log_queue::EventLogQueue;
use crate::observability::logger::{FileSink, LogSink, StructuredLogger};
use crate::observability::metrics::MetricsRegistry;
use crate::observability::ServiceIdentity;
use crate::routes::AppState;
use crate::services::UserService;
use crate::tasks::start_audit_health_poller;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to build metrics registry: {0}")]
    Metrics(String),

    #[error("Failed to build audit store client: {0}")]
    AuditClient(#[from] ApiError),

    #[error("Failed to start event log writer: {0}")]
    EventLogWriter(#[source] std::io::Error),
}

/// Wired application components.
pub struct Components {
    pub state: Arc<AppState>,

    /// Background audit worker; completes after the cancellation token
    /// fires and the queue is drained.
    pub audit_worker: JoinHandle<()>,

    /// Background audit health poller; exits on cancellation.
    pub health_poller: JoinHandle<()>,

    /// Event log writer thread; exits once every queue handle is dropped.
    pub event_log_writer: std::thread::JoinHandle<()>,
}

/// Open the structured event log.
///
/// If the log file cannot be opened the logger still runs, writing to the
/// console only.
pub fn event_logger(config: &Config) -> Arc<StructuredLogger> {
    let identity = ServiceIdentity::new(&config.service_name, &config.environment);

    let primary: Option<Box<dyn LogSink>> = match FileSink::open(&config.event_log_path) {
        Ok(sink) => Some(Box::new(sink)),
        Err(e) => {
            warn!(
                target: "user_api.startup",
                path = %config.event_log_path.display(),
                error = %e,
                "Event log file unavailable, logging to console only"
            );
            None
        }
    };

    Arc::new(StructuredLogger::new(identity, primary, config.log_to_console))
}

/// Wire all components. Must be called inside a tokio runtime.
pub fn assemble(
    config: Config,
    pool: SqlitePool,
    logger: Arc<StructuredLogger>,
    cancel_token: CancellationToken,
) -> Result<Components, StartupError> {
    let metrics = Arc::new(MetricsRegistry::new().map_err(StartupError::Metrics)?);

    let writer = Arc::new(AuditIndexWriter::new(
        AuditStoreSettings::from_config(&config),
        logger.identity().clone(),
        Arc::clone(&logger),
    )?);

    let (dispatcher, audit_worker) = AuditDispatcher::spawn(
        writer.clone(),
        config.audit_queue_capacity,
        cancel_token.clone(),
    );

    let (event_log, event_log_writer) =
        EventLogQueue::spawn(logger, config.event_log_queue_capacity)
            .map_err(StartupError::EventLogWriter)?;

    let instrumentation = Instrumentation::new(metrics, event_log, dispatcher.clone());
    let health = Arc::new(HealthAggregator::new(writer, dispatcher));
    let health_poller = tokio::spawn(start_audit_health_poller(
        Arc::clone(&health),
        Duration::from_secs(config.audit_health_poll_seconds),
        cancel_token,
    ));
    let users = UserService::new(pool, Arc::new(instrumentation.clone()));

    let state = Arc::new(AppState {
        users,
        instrumentation,
        health,
        config,
    });

    Ok(Components {
        state,
        audit_worker,
        health_poller,
        event_log_writer,
    })
}
