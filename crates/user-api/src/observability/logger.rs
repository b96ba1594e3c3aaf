//! Structured application event log.
//!
//! Every record is one flat JSON object per line:
//! `{timestamp, level, service, environment, message, ...custom}`.
//! The event log is separate from `tracing` diagnostics; the console sink
//! forwards records into `tracing` so they reach the process subscriber.
//!
//! Logging is best-effort. A failing sink never surfaces an error to the
//! caller; the record is handed to the fallback sink instead and the outcome
//! is reported as a [`LogDelivery`].

use chrono::{SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

use super::ServiceIdentity;

const RESERVED_KEYS: [&str; 5] = ["timestamp", "level", "service", "environment", "message"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// One structured log record.
///
/// Reserved keys supplied through `fields` override the defaults for
/// `timestamp`, `service` and `environment`; `level` and `message` always
/// come from the call.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: String,
    pub service: String,
    pub environment: String,
    pub fields: Map<String, Value>,
}

impl LogRecord {
    pub fn new(
        level: LogLevel,
        message: impl Into<String>,
        fields: Value,
        identity: &ServiceIdentity,
    ) -> Self {
        let mut fields = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };

        let mut take = |key: &str| match fields.remove(key) {
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
            None => None,
        };

        let timestamp = take("timestamp")
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));
        let service = take("service").unwrap_or_else(|| identity.service.clone());
        let environment = take("environment").unwrap_or_else(|| identity.environment.clone());
        let _ = take("level");
        let _ = take("message");

        Self {
            level,
            message: message.into(),
            timestamp,
            service,
            environment,
            fields,
        }
    }
}

impl Serialize for LogRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(RESERVED_KEYS.len() + self.fields.len()))?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.serialize_entry("level", self.level.as_str())?;
        map.serialize_entry("service", &self.service)?;
        map.serialize_entry("environment", &self.environment)?;
        map.serialize_entry("message", &self.message)?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Outcome of [`StructuredLogger::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDelivery {
    /// Written to the primary sink.
    Written,
    /// Primary sink failed; the record went to the fallback sink.
    Fallback,
    /// No sink accepted the record.
    Dropped,
}

/// Destination for serialized log records.
pub trait LogSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Write one record. `line` is its JSON serialization without newline.
    fn write(&self, record: &LogRecord, line: &str) -> io::Result<()>;
}

/// Append-only JSON-lines file.
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn write(&self, _record: &LogRecord, line: &str) -> io::Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        // Single write per record keeps lines whole under concurrent appends
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&buf)?;
        file.flush()
    }
}

/// Forwards records into `tracing` at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    fn write(&self, record: &LogRecord, line: &str) -> io::Result<()> {
        match record.level {
            LogLevel::Debug => debug!(target: "user_api.events", "{}", line),
            LogLevel::Info => info!(target: "user_api.events", "{}", line),
            LogLevel::Warning => warn!(target: "user_api.events", "{}", line),
            LogLevel::Error | LogLevel::Critical => {
                error!(target: "user_api.events", "{}", line)
            }
        }
        Ok(())
    }
}

/// In-memory sink holding serialized lines, for inspection in tests and
/// local tooling.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parsed copies of every record written so far.
    pub fn records(&self) -> Vec<Value> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl LogSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write(&self, _record: &LogRecord, line: &str) -> io::Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }
}

/// Leveled JSON event emitter with a primary sink and a fallback sink.
pub struct StructuredLogger {
    identity: ServiceIdentity,
    primary: Option<Box<dyn LogSink>>,
    fallback: Box<dyn LogSink>,
    mirror_to_fallback: bool,
    failed_writes: AtomicU64,
}

impl StructuredLogger {
    /// Create a logger writing to `primary`, falling back to the console.
    ///
    /// With `mirror_to_console` every record is also written to the console.
    pub fn new(
        identity: ServiceIdentity,
        primary: Option<Box<dyn LogSink>>,
        mirror_to_console: bool,
    ) -> Self {
        Self::with_fallback(identity, primary, Box::new(ConsoleSink), mirror_to_console)
    }

    pub fn with_fallback(
        identity: ServiceIdentity,
        primary: Option<Box<dyn LogSink>>,
        fallback: Box<dyn LogSink>,
        mirror_to_fallback: bool,
    ) -> Self {
        Self {
            identity,
            primary,
            fallback,
            mirror_to_fallback,
            failed_writes: AtomicU64::new(0),
        }
    }

    /// Logger that only writes to the console.
    pub fn console(identity: ServiceIdentity) -> Self {
        Self::new(identity, None, true)
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Number of primary sink write failures since startup.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    /// Emit one record. Never fails; see [`LogDelivery`].
    pub fn log(&self, level: LogLevel, message: &str, fields: Value) -> LogDelivery {
        self.write_record(LogRecord::new(level, message, fields, &self.identity))
    }

    /// Write a record built earlier, keeping its timestamp.
    pub fn write_record(&self, record: LogRecord) -> LogDelivery {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(target: "user_api.logger", error = %e, "Failed to serialize log record");
                return LogDelivery::Dropped;
            }
        };

        let Some(primary) = &self.primary else {
            return match self.fallback.write(&record, &line) {
                Ok(()) => LogDelivery::Written,
                Err(_) => LogDelivery::Dropped,
            };
        };

        match primary.write(&record, &line) {
            Ok(()) => {
                if self.mirror_to_fallback {
                    let _ = self.fallback.write(&record, &line);
                }
                LogDelivery::Written
            }
            Err(e) => {
                self.failed_writes.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "user_api.logger",
                    sink = primary.name(),
                    error = %e,
                    "Event log write failed, using fallback sink"
                );
                match self.fallback.write(&record, &line) {
                    Ok(()) => LogDelivery::Fallback,
                    Err(_) => LogDelivery::Dropped,
                }
            }
        }
    }

    pub fn info(&self, message: &str, fields: Value) -> LogDelivery {
        self.log(LogLevel::Info, message, fields)
    }

    pub fn warning(&self, message: &str, fields: Value) -> LogDelivery {
        self.log(LogLevel::Warning, message, fields)
    }

    pub fn error(&self, message: &str, fields: Value) -> LogDelivery {
        self.log(LogLevel::Error, message, fields)
    }
}

impl std::fmt::Debug for StructuredLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredLogger")
            .field("identity", &self.identity)
            .field("primary", &self.primary.as_ref().map(|s| s.name()))
            .field("fallback", &self.fallback.name())
            .finish()
    }
}
