//! Audit health poller background task.
//!
//! Re-evaluates audit health on a fixed interval and stores the result for
//! the health endpoint. The aggregator logs status transitions itself.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is cancelled. An in-flight
//! health check is bounded by the audit store request timeout.

use crate::observability::health::HealthAggregator;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Run the poller loop until `cancel_token` is cancelled.
pub async fn start_audit_health_poller(
    health: Arc<HealthAggregator>,
    poll_interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "user_api.tasks.audit_health",
        interval_seconds = poll_interval.as_secs(),
        "Audit health poller started"
    );

    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let snapshot = health.refresh().await;
                debug!(
                    target: "user_api.tasks.audit_health",
                    audit = ?snapshot.dependencies.audit,
                    "Audit health evaluated"
                );
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "user_api.tasks.audit_health",
                    "Audit health poller received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}
