//! Middleware for the User API.
//!
//! # Components
//!
//! - `request_telemetry` - per-request metrics, audit and event log

pub mod request_telemetry;

pub use request_telemetry::{panic_response, request_telemetry_middleware, tag_timeout_response};
