//! HTTP request handlers for the User API.

pub mod health;
pub mod metrics;
pub mod users;

pub use health::{health_check, service_info};
pub use metrics::metrics_handler;
pub use users::{create_user, delete_user, get_user, list_users, update_user};
