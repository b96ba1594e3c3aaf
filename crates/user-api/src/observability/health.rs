//! Service health aggregation.
//!
//! The audit store is advisory: when it is unreachable the service reports
//! itself `degraded` but keeps serving requests. Nothing here ever reports
//! the service as down.
//!
//! # Audit dependency status
//!
//! - `healthy`: store cluster green or yellow, no audit events shed
//! - `degraded`: store healthy, but the audit queue dropped events since the
//!   previous evaluation
//! - `unreachable`: store check failed or cluster red
//!
//! # Evaluation
//!
//! Only [`HealthAggregator::refresh`] contacts the store and consumes the
//! dropped-event delta; the background poller calls it on every tick.
//! [`HealthAggregator::overall_health`] serves the latest stored snapshot,
//! so health requests never contact the store and never hide a shed signal
//! from the poller.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, warn};

use crate::audit::dispatcher::AuditDispatcher;
use crate::audit::writer::AuditIndexWriter;

/// Health of the audit dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unreachable,
}

/// Overall service status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
}

impl From<HealthStatus> for ServiceStatus {
    fn from(audit: HealthStatus) -> Self {
        match audit {
            HealthStatus::Healthy | HealthStatus::Degraded => ServiceStatus::Healthy,
            HealthStatus::Unreachable => ServiceStatus::Degraded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dependencies {
    pub audit: HealthStatus,
}

/// Body of the health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: ServiceStatus,
    pub dependencies: Dependencies,
    /// Unix time in seconds.
    pub timestamp: f64,
}

/// Merges audit store health into one service status.
pub struct HealthAggregator {
    writer: Arc<AuditIndexWriter>,
    dispatcher: AuditDispatcher,
    dropped_seen: AtomicU64,
    last_audit: Mutex<Option<HealthStatus>>,
    latest: RwLock<Option<HealthSnapshot>>,
    /// Serializes evaluations so each drop delta is consumed exactly once.
    refreshing: tokio::sync::Mutex<()>,
}

impl HealthAggregator {
    pub fn new(writer: Arc<AuditIndexWriter>, dispatcher: AuditDispatcher) -> Self {
        let dropped_seen = AtomicU64::new(dispatcher.dropped_total());
        Self {
            writer,
            dispatcher,
            dropped_seen,
            last_audit: Mutex::new(None),
            latest: RwLock::new(None),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    /// Latest evaluated snapshot.
    ///
    /// Evaluates once if nothing has been stored yet, e.g. before the
    /// poller's first tick.
    pub async fn overall_health(&self) -> HealthSnapshot {
        if let Some(snapshot) = self.stored() {
            return snapshot;
        }

        let _guard = self.refreshing.lock().await;
        // Another caller may have evaluated while we waited
        if let Some(snapshot) = self.stored() {
            return snapshot;
        }
        self.evaluate().await
    }

    /// Check the store, fold in shed events, store and return the snapshot.
    pub async fn refresh(&self) -> HealthSnapshot {
        let _guard = self.refreshing.lock().await;
        self.evaluate().await
    }

    fn stored(&self) -> Option<HealthSnapshot> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn evaluate(&self) -> HealthSnapshot {
        let store = self.writer.health_check().await;

        let dropped = self.dispatcher.dropped_total();
        let shed_since_last = self.dropped_seen.swap(dropped, Ordering::Relaxed) < dropped;

        let audit = match store {
            HealthStatus::Healthy if shed_since_last => HealthStatus::Degraded,
            other => other,
        };

        self.note_transition(audit);

        let snapshot = HealthSnapshot {
            status: audit.into(),
            dependencies: Dependencies { audit },
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        };
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        snapshot
    }

    fn note_transition(&self, audit: HealthStatus) {
        let mut last = self.last_audit.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == Some(audit) {
            return;
        }

        match audit {
            HealthStatus::Healthy => {
                info!(target: "user_api.health", audit = ?audit, previous = ?*last, "Audit dependency healthy")
            }
            HealthStatus::Degraded | HealthStatus::Unreachable => {
                warn!(target: "user_api.health", audit = ?audit, previous = ?*last, "Audit dependency not healthy")
            }
        }
        *last = Some(audit);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::audit::dispatcher::{AuditSink, DispatchOutcome};
    use crate::audit::event::{AuditEvent, Details};
    use crate::audit::writer::AuditStoreSettings;
    use crate::observability::logger::StructuredLogger;
    use crate::observability::ServiceIdentity;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Never completes a write, so the queue fills up.
    struct StuckSink;

    #[async_trait]
    impl AuditSink for StuckSink {
        async fn write_event(&self, _event: &AuditEvent) -> bool {
            std::future::pending::<()>().await;
            false
        }
    }

    fn writer(base_url: &str) -> Arc<AuditIndexWriter> {
        let identity = ServiceIdentity::new("user-mgt-api", "test");
        Arc::new(
            AuditIndexWriter::new(
                AuditStoreSettings {
                    base_url: base_url.to_string(),
                    index_prefix: "user-mgt".to_string(),
                    username: None,
                    password: None,
                    request_timeout: Duration::from_secs(2),
                },
                identity.clone(),
                Arc::new(StructuredLogger::console(identity)),
            )
            .unwrap(),
        )
    }

    async fn green_store() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "green"})))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_service_status_mapping() {
        assert_eq!(ServiceStatus::from(HealthStatus::Healthy), ServiceStatus::Healthy);
        assert_eq!(ServiceStatus::from(HealthStatus::Degraded), ServiceStatus::Healthy);
        assert_eq!(
            ServiceStatus::from(HealthStatus::Unreachable),
            ServiceStatus::Degraded
        );
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = HealthSnapshot {
            status: ServiceStatus::Degraded,
            dependencies: Dependencies {
                audit: HealthStatus::Unreachable,
            },
            timestamp: 1.5,
        };
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            json!({"status": "degraded", "dependencies": {"audit": "unreachable"}, "timestamp": 1.5})
        );
    }

    #[tokio::test]
    async fn test_healthy_store() {
        let server = green_store().await;
        let (dispatcher, _join) =
            AuditDispatcher::spawn(Arc::new(StuckSink), 4, CancellationToken::new());
        let aggregator = HealthAggregator::new(writer(&server.uri()), dispatcher);

        let snapshot = aggregator.overall_health().await;

        assert_eq!(snapshot.status, ServiceStatus::Healthy);
        assert_eq!(snapshot.dependencies.audit, HealthStatus::Healthy);
        assert!(snapshot.timestamp > 0.0);
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_service() {
        let (dispatcher, _join) =
            AuditDispatcher::spawn(Arc::new(StuckSink), 4, CancellationToken::new());
        let aggregator = HealthAggregator::new(writer("http://127.0.0.1:9"), dispatcher);

        let snapshot = aggregator.overall_health().await;

        assert_eq!(snapshot.status, ServiceStatus::Degraded);
        assert_eq!(snapshot.dependencies.audit, HealthStatus::Unreachable);
    }

    async fn shed_events(dispatcher: &AuditDispatcher) -> usize {
        let mut dropped = 0;
        for _ in 0..5 {
            let event = AuditEvent::user_action(1, "user_created", Details::new(), Utc::now());
            if dispatcher.dispatch(event) == DispatchOutcome::Dropped {
                dropped += 1;
            }
            tokio::task::yield_now().await;
        }
        dropped
    }

    #[tokio::test]
    async fn test_shed_events_mark_audit_degraded_once() {
        let server = green_store().await;
        let (dispatcher, _join) =
            AuditDispatcher::spawn(Arc::new(StuckSink), 1, CancellationToken::new());
        let aggregator = HealthAggregator::new(writer(&server.uri()), dispatcher.clone());

        assert!(shed_events(&dispatcher).await > 0);

        let first = aggregator.refresh().await;
        assert_eq!(first.dependencies.audit, HealthStatus::Degraded);
        // Service itself is still healthy
        assert_eq!(first.status, ServiceStatus::Healthy);

        // No new drops since the previous evaluation
        let second = aggregator.refresh().await;
        assert_eq!(second.dependencies.audit, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_reads_see_shed_signal_after_poller_tick() {
        let server = green_store().await;
        let (dispatcher, _join) =
            AuditDispatcher::spawn(Arc::new(StuckSink), 1, CancellationToken::new());
        let aggregator = HealthAggregator::new(writer(&server.uri()), dispatcher.clone());

        assert!(shed_events(&dispatcher).await > 0);

        // Poller tick consumes the delta
        let ticked = aggregator.refresh().await;
        assert_eq!(ticked.dependencies.audit, HealthStatus::Degraded);

        // Health reads keep reporting what the tick saw
        for _ in 0..3 {
            let read = aggregator.overall_health().await;
            assert_eq!(read.dependencies.audit, HealthStatus::Degraded);
            assert_eq!(read, ticked);
        }
    }

    #[tokio::test]
    async fn test_reads_do_not_contact_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "green"})))
            .expect(1)
            .mount(&server)
            .await;
        let (dispatcher, _join) =
            AuditDispatcher::spawn(Arc::new(StuckSink), 4, CancellationToken::new());
        let aggregator = HealthAggregator::new(writer(&server.uri()), dispatcher);

        // First read evaluates, the rest are served from the stored snapshot
        for _ in 0..5 {
            let snapshot = aggregator.overall_health().await;
            assert_eq!(snapshot.dependencies.audit, HealthStatus::Healthy);
        }
        server.verify().await;
    }

    #[tokio::test]
    async fn test_refresh_replaces_stored_snapshot() {
        let server = green_store().await;
        let (dispatcher, _join) =
            AuditDispatcher::spawn(Arc::new(StuckSink), 4, CancellationToken::new());
        let aggregator = HealthAggregator::new(writer(&server.uri()), dispatcher);

        assert_eq!(
            aggregator.overall_health().await.dependencies.audit,
            HealthStatus::Healthy
        );

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "red"})))
            .mount(&server)
            .await;

        // Stale until the next evaluation
        assert_eq!(
            aggregator.overall_health().await.dependencies.audit,
            HealthStatus::Healthy
        );
        aggregator.refresh().await;
        let snapshot = aggregator.overall_health().await;
        assert_eq!(snapshot.dependencies.audit, HealthStatus::Unreachable);
        assert_eq!(snapshot.status, ServiceStatus::Degraded);
    }
}
