//! Bounded background queue in front of the audit store.
//!
//! Request handling never waits on the audit store. Events are handed to a
//! bounded channel drained by a single worker task; when the channel is full
//! the event is dropped, counted and logged locally. Telemetry is shed before
//! requests are.
//!
//! # Graceful Shutdown
//!
//! On cancellation the worker closes the channel, writes the events already
//! queued, and exits.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::event::AuditEvent;
use super::writer::AuditIndexWriter;

/// Destination of dispatched audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Write one event; `false` on failure. Must not panic.
    async fn write_event(&self, event: &AuditEvent) -> bool;
}

#[async_trait]
impl AuditSink for AuditIndexWriter {
    async fn write_event(&self, event: &AuditEvent) -> bool {
        AuditIndexWriter::write_event(self, event).await
    }
}

/// Result of [`AuditDispatcher::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Queued,
    /// Queue full or worker stopped; the event was discarded.
    Dropped,
}

#[derive(Debug, Default)]
struct Counters {
    dropped: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of dispatcher counters since startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub dropped: u64,
    pub written: u64,
    pub failed: u64,
}

/// Handle to the audit worker. Cheap to clone.
#[derive(Clone)]
pub struct AuditDispatcher {
    sender: mpsc::Sender<AuditEvent>,
    counters: Arc<Counters>,
}

impl AuditDispatcher {
    /// Spawn the worker and return a handle plus the worker's join handle.
    ///
    /// # Arguments
    ///
    /// * `sink` - Where events are written
    /// * `capacity` - Queue bound; must be non-zero
    /// * `cancel_token` - Stops the worker after draining
    pub fn spawn(
        sink: Arc<dyn AuditSink>,
        capacity: usize,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());

        let worker = AuditWorker {
            receiver,
            sink,
            cancel_token,
            counters: Arc::clone(&counters),
        };
        let join = tokio::spawn(worker.run());

        (Self { sender, counters }, join)
    }

    /// Queue an event without waiting.
    pub fn dispatch(&self, event: AuditEvent) -> DispatchOutcome {
        match self.sender.try_send(event) {
            Ok(()) => DispatchOutcome::Queued,
            Err(TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "user_api.audit.dispatcher",
                    category = %event.category(),
                    "Audit queue full, dropping event"
                );
                DispatchOutcome::Dropped
            }
            Err(TrySendError::Closed(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: "user_api.audit.dispatcher",
                    category = %event.category(),
                    "Audit worker stopped, dropping event"
                );
                DispatchOutcome::Dropped
            }
        }
    }

    /// Events dropped since startup.
    pub fn dropped_total(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for AuditDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditDispatcher")
            .field("stats", &self.stats())
            .finish()
    }
}

struct AuditWorker {
    receiver: mpsc::Receiver<AuditEvent>,
    sink: Arc<dyn AuditSink>,
    cancel_token: CancellationToken,
    counters: Arc<Counters>,
}

impl AuditWorker {
    #[instrument(skip_all, name = "user_api.audit.worker")]
    async fn run(mut self) {
        debug!(target: "user_api.audit.dispatcher", "Audit worker started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.drain().await;
                    break;
                }

                event = self.receiver.recv() => {
                    match event {
                        Some(event) => self.write(&event).await,
                        // All handles dropped
                        None => break,
                    }
                }
            }
        }

        info!(
            target: "user_api.audit.dispatcher",
            written = self.counters.written.load(Ordering::Relaxed),
            failed = self.counters.failed.load(Ordering::Relaxed),
            dropped = self.counters.dropped.load(Ordering::Relaxed),
            "Audit worker stopped"
        );
    }

    async fn write(&self, event: &AuditEvent) {
        if self.sink.write_event(event).await {
            self.counters.written.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn drain(&mut self) {
        self.receiver.close();
        while let Some(event) = self.receiver.recv().await {
            self.write(&event).await;
        }
    }
}
