//! Domain services.

pub mod user_service;

pub use user_service::{UserAction, UserActionSink, UserService};
