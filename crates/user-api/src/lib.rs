//! User API Service Library
//!
//! A user CRUD API wrapped in a telemetry and audit pipeline:
//!
//! - Prometheus request metrics
//! - Structured JSON event log
//! - Audit trail in a time-partitioned document store
//! - Aggregated dependency health
//!
//! # Architecture
//!
//! The service follows the Handler -> Service -> Repository pattern, with
//! the request telemetry middleware wrapping every route:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//!       |                               |
//!       +-- middleware ----------------> observability::instrumentation
//!                                           |-> metrics registry
//!                                           |-> audit dispatcher -> audit writer
//!                                           +-> structured logger
//! ```
//!
//! # Modules
//!
//! - `app` - Component wiring
//! - `audit` - Audit events, index writer and background queue
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Request telemetry middleware
//! - `models` - Data models
//! - `observability` - Metrics, event log, instrumentation, health
//! - `repositories` - Database access
//! - `routes` - Axum router setup
//! - `services` - User domain service
//! - `tasks` - Background tasks

pub mod app;
pub mod audit;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
