//! Bounded hand-off between request paths and the event log sinks.
//!
//! Records are stamped when they are queued and written by one dedicated
//! writer thread, so sink I/O never runs on the async runtime and the
//! blocking pool is never involved. The queue is FIFO: records queued by one
//! request are written in the order they were queued. When the queue is full
//! the record is dropped and counted.
//!
//! The writer thread exits once every handle is dropped, after writing what
//! is still queued.

use serde_json::Value;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::logger::{LogLevel, LogRecord, StructuredLogger};

/// Result of [`EventLogQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue full or writer stopped; the record was discarded.
    Dropped,
}

/// Handle to the event log writer thread. Cheap to clone.
#[derive(Clone)]
pub struct EventLogQueue {
    sender: mpsc::Sender<LogRecord>,
    logger: Arc<StructuredLogger>,
    dropped: Arc<AtomicU64>,
}

impl EventLogQueue {
    /// Start the writer thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be started.
    pub fn spawn(
        logger: Arc<StructuredLogger>,
        capacity: usize,
    ) -> io::Result<(Self, thread::JoinHandle<()>)> {
        let (sender, mut receiver) = mpsc::channel::<LogRecord>(capacity.max(1));

        let writer_logger = Arc::clone(&logger);
        let join = thread::Builder::new()
            .name("event-log-writer".to_string())
            .spawn(move || {
                let mut written = 0u64;
                while let Some(record) = receiver.blocking_recv() {
                    writer_logger.write_record(record);
                    written += 1;
                }
                debug!(target: "user_api.logger", written, "Event log writer stopped");
            })?;

        Ok((
            Self {
                sender,
                logger,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            join,
        ))
    }

    /// Stamp and queue one record without waiting.
    pub fn enqueue(&self, level: LogLevel, message: &str, fields: Value) -> EnqueueOutcome {
        let record = LogRecord::new(level, message, fields, self.logger.identity());
        match self.sender.try_send(record) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(TrySendError::Full(record)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "user_api.logger",
                    record = %record.message,
                    "Event log queue full, dropping record"
                );
                EnqueueOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Records dropped since startup.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn logger(&self) -> &Arc<StructuredLogger> {
        &self.logger
    }
}

impl std::fmt::Debug for EventLogQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogQueue")
            .field("logger", &self.logger)
            .field("dropped", &self.dropped_total())
            .finish()
    }
}
