//! Eventual consistency helpers for timing-dependent tests.
//!
//! Audit documents and event log records are written off the request path,
//! so tests poll for them with backoff instead of sleeping.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Categories of background work with their maximum settle time.
#[derive(Debug, Clone, Copy)]
pub enum ConsistencyCategory {
    /// Audit queue drained into the audit store.
    AuditDelivery,

    /// Event log records written by the event log writer thread.
    EventLog,

    /// Health snapshot re-evaluated by the background poller.
    HealthRefresh,
}

impl ConsistencyCategory {
    /// Get the maximum timeout for this consistency category.
    pub fn timeout(&self) -> Duration {
        match self {
            ConsistencyCategory::AuditDelivery => Duration::from_secs(10),
            ConsistencyCategory::EventLog => Duration::from_secs(5),
            ConsistencyCategory::HealthRefresh => Duration::from_secs(5),
        }
    }

    fn initial_delay(&self) -> Duration {
        Duration::from_millis(20)
    }
}

/// Assert that a condition becomes true within the timeout for the given
/// category.
///
/// Retries with a delay starting at 20ms and doubling, capped at the
/// remaining time.
///
/// # Example
///
/// ```rust,ignore
/// assert_eventually(ConsistencyCategory::AuditDelivery, || async {
///     store.documents("user-mgt-user-actions-*").len() == 50
/// })
/// .await
/// .expect("all user actions should be audited");
/// ```
pub async fn assert_eventually<F, Fut>(
    category: ConsistencyCategory,
    mut condition: F,
) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let timeout = category.timeout();
    let mut delay = category.initial_delay();
    let start = std::time::Instant::now();

    loop {
        if condition().await {
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(format!(
                "Condition not met within {:?} (category: {:?})",
                timeout, category
            ));
        }

        sleep(delay).await;

        delay *= 2;
        let remaining = timeout.saturating_sub(elapsed);
        if delay > remaining {
            delay = remaining;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_assert_eventually_succeeds_after_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result = assert_eventually(ConsistencyCategory::EventLog, move || {
            let attempts = attempts_clone.clone();
            async move { attempts.fetch_add(1, Ordering::SeqCst) + 1 >= 3 }
        })
        .await;

        assert!(result.is_ok());
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_assert_eventually_fails_on_timeout() {
        let result = assert_eventually(ConsistencyCategory::EventLog, || async { false }).await;
        let err = result.expect_err("Should return error on timeout");
        assert!(err.contains("not met within"));
    }
}
