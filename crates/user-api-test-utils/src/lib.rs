//! Test utilities for the User API.
//!
//! # Modules
//!
//! - `server_harness` - Spawns a real User API server on a random port
//! - `fake_audit_store` - Stateful in-process fake of the audit store
//! - `eventual` - Polling helpers for background telemetry

pub mod eventual;
pub mod fake_audit_store;
pub mod server_harness;

pub use eventual::{assert_eventually, ConsistencyCategory};
pub use fake_audit_store::FakeAuditStore;
pub use server_harness::{FailingLogSink, TestUserApiServer};
