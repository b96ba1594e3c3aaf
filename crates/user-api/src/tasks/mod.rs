//! Background tasks for the User API.
//!
//! # Tasks
//!
//! - `audit_health_poller` - Periodically checks the audit store so health
//!   transitions are logged even when nobody calls `/health`

pub mod audit_health_poller;

pub use audit_health_poller::start_audit_health_poller;
