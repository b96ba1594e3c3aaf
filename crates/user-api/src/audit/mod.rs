//! Audit trail of user actions, API requests and errors.
//!
//! Events are written to daily partitions of an Elasticsearch-compatible
//! document store through a bounded background queue.

pub mod dispatcher;
pub mod event;
pub mod writer;

pub use dispatcher::{AuditDispatcher, AuditSink, DispatchOutcome};
pub use event::{
    ApiRequestRecord, AuditCategory, AuditEvent, Details, ErrorRecord, FieldValue, IndexName,
};
pub use writer::{AuditIndexWriter, AuditStoreSettings};
