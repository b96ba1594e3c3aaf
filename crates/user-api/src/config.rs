//! User API configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

/// Default database URL (file-backed SQLite, created on first start).
pub const DEFAULT_DATABASE_URL: &str = "sqlite://users.db?mode=rwc";

/// Default audit store URL.
pub const DEFAULT_AUDIT_STORE_URL: &str = "http://localhost:9200";

/// Default prefix for audit index names.
pub const DEFAULT_AUDIT_INDEX_PREFIX: &str = "user-mgt";

/// Default audit store request timeout in seconds.
pub const DEFAULT_AUDIT_REQUEST_TIMEOUT_SECONDS: u64 = 5;

/// Default capacity of the background audit queue.
pub const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Default interval between background audit health checks.
pub const DEFAULT_AUDIT_HEALTH_POLL_SECONDS: u64 = 30;

/// Default service name stamped on log records and audit documents.
pub const DEFAULT_SERVICE_NAME: &str = "user-mgt-api";

/// Default environment name stamped on log records and audit documents.
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Default path of the append-only structured event log.
pub const DEFAULT_EVENT_LOG_PATH: &str = "app_events.log";

/// Default capacity of the event log writer queue.
pub const DEFAULT_EVENT_LOG_QUEUE_CAPACITY: usize = 4096;

/// User API configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Database URL and audit store password are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Database connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8000").
    pub bind_address: String,

    /// Base URL of the audit document store.
    pub audit_store_url: String,

    /// Basic auth username for the audit store.
    pub audit_store_username: Option<String>,

    /// Basic auth password for the audit store.
    pub audit_store_password: Option<SecretString>,

    /// Prefix of every audit index name.
    pub audit_index_prefix: String,

    /// Per-request timeout for audit store calls, in seconds.
    pub audit_request_timeout_seconds: u64,

    /// Capacity of the bounded audit queue. Events beyond it are dropped.
    pub audit_queue_capacity: usize,

    /// Interval of the background audit health check, in seconds.
    pub audit_health_poll_seconds: u64,

    pub service_name: String,

    pub environment: String,

    /// Path of the append-only JSON-lines event log.
    pub event_log_path: PathBuf,

    /// Capacity of the event log writer queue. Records beyond it are dropped.
    pub event_log_queue_capacity: usize,

    /// Mirror structured log records to the console through tracing.
    pub log_to_console: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("audit_store_url", &self.audit_store_url)
            .field("audit_store_username", &self.audit_store_username)
            .field(
                "audit_store_password",
                &self.audit_store_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("audit_index_prefix", &self.audit_index_prefix)
            .field(
                "audit_request_timeout_seconds",
                &self.audit_request_timeout_seconds,
            )
            .field("audit_queue_capacity", &self.audit_queue_capacity)
            .field("audit_health_poll_seconds", &self.audit_health_poll_seconds)
            .field("service_name", &self.service_name)
            .field("environment", &self.environment)
            .field("event_log_path", &self.event_log_path)
            .field("event_log_queue_capacity", &self.event_log_queue_capacity)
            .field("log_to_console", &self.log_to_console)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Incomplete audit store credentials: {0}")]
    IncompleteCredentials(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get_or = |name: &str, default: &str| {
            vars.get(name)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        let database_url = get_or("DATABASE_URL", DEFAULT_DATABASE_URL);
        let bind_address = get_or("BIND_ADDRESS", DEFAULT_BIND_ADDRESS);
        let audit_store_url = get_or("AUDIT_STORE_URL", DEFAULT_AUDIT_STORE_URL)
            .trim_end_matches('/')
            .to_string();

        let audit_index_prefix = get_or("AUDIT_INDEX_PREFIX", DEFAULT_AUDIT_INDEX_PREFIX);
        if audit_index_prefix.is_empty()
            || audit_index_prefix
                .chars()
                .any(|c| c.is_ascii_uppercase() || c == '/' || c.is_whitespace())
        {
            return Err(ConfigError::InvalidValue {
                name: "AUDIT_INDEX_PREFIX".to_string(),
                reason: format!(
                    "must be non-empty lowercase without '/' or whitespace, got '{}'",
                    audit_index_prefix
                ),
            });
        }

        // Credentials are all-or-nothing
        let audit_store_username = vars.get("AUDIT_STORE_USERNAME").cloned();
        let audit_store_password = vars
            .get("AUDIT_STORE_PASSWORD")
            .map(|p| SecretString::from(p.clone()));
        match (&audit_store_username, &audit_store_password) {
            (Some(_), None) => {
                return Err(ConfigError::IncompleteCredentials(
                    "AUDIT_STORE_USERNAME is set but AUDIT_STORE_PASSWORD is not".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompleteCredentials(
                    "AUDIT_STORE_PASSWORD is set but AUDIT_STORE_USERNAME is not".to_string(),
                ))
            }
            _ => {}
        }

        let audit_request_timeout_seconds = parse_positive(
            vars,
            "AUDIT_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_AUDIT_REQUEST_TIMEOUT_SECONDS,
        )?;
        let audit_queue_capacity =
            parse_positive(vars, "AUDIT_QUEUE_CAPACITY", DEFAULT_AUDIT_QUEUE_CAPACITY)?;
        let audit_health_poll_seconds = parse_positive(
            vars,
            "AUDIT_HEALTH_POLL_SECONDS",
            DEFAULT_AUDIT_HEALTH_POLL_SECONDS,
        )?;

        let service_name = get_or("SERVICE_NAME", DEFAULT_SERVICE_NAME);
        let environment = get_or("ENVIRONMENT", DEFAULT_ENVIRONMENT);
        let event_log_path = PathBuf::from(get_or("EVENT_LOG_PATH", DEFAULT_EVENT_LOG_PATH));
        let event_log_queue_capacity = parse_positive(
            vars,
            "EVENT_LOG_QUEUE_CAPACITY",
            DEFAULT_EVENT_LOG_QUEUE_CAPACITY,
        )?;

        let log_to_console = match vars.get("LOG_TO_CONSOLE").map(|v| v.to_ascii_lowercase()) {
            None => true,
            Some(v) if v == "true" || v == "1" => true,
            Some(v) if v == "false" || v == "0" => false,
            Some(v) => {
                return Err(ConfigError::InvalidValue {
                    name: "LOG_TO_CONSOLE".to_string(),
                    reason: format!("expected true/false, got '{}'", v),
                })
            }
        };

        Ok(Config {
            database_url,
            bind_address,
            audit_store_url,
            audit_store_username,
            audit_store_password,
            audit_index_prefix,
            audit_request_timeout_seconds,
            audit_queue_capacity,
            audit_health_poll_seconds,
            service_name,
            environment,
            event_log_path,
            event_log_queue_capacity,
            log_to_console,
        })
    }
}

/// Parses a strictly positive integer variable, falling back to `default`
/// when the variable is absent.
fn parse_positive<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = value_str.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        name: name.to_string(),
        reason: format!("must be a valid positive integer, got '{}': {}", value_str, e),
    })?;

    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_address, "0.0.0.0:8000");
        assert_eq!(config.audit_store_url, "http://localhost:9200");
        assert_eq!(config.audit_index_prefix, "user-mgt");
        assert_eq!(config.audit_request_timeout_seconds, 5);
        assert_eq!(config.audit_queue_capacity, 1024);
        assert_eq!(config.audit_health_poll_seconds, 30);
        assert_eq!(config.service_name, "user-mgt-api");
        assert_eq!(config.environment, "development");
        assert_eq!(config.event_log_path, PathBuf::from("app_events.log"));
        assert_eq!(config.event_log_queue_capacity, 4096);
        assert!(config.log_to_console);
        assert!(config.audit_store_username.is_none());
        assert!(config.audit_store_password.is_none());
    }

    #[test]
    fn test_from_vars_custom_values() {
        let config = Config::from_vars(&vars(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("BIND_ADDRESS", "127.0.0.1:9000"),
            ("AUDIT_STORE_URL", "https://audit.internal:9200/"),
            ("AUDIT_INDEX_PREFIX", "users-prod"),
            ("AUDIT_QUEUE_CAPACITY", "16"),
            ("SERVICE_NAME", "user-api"),
            ("ENVIRONMENT", "production"),
            ("EVENT_LOG_PATH", "/var/log/user-api/events.log"),
            ("LOG_TO_CONSOLE", "false"),
            ("EVENT_LOG_QUEUE_CAPACITY", "64"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        // Trailing slash is trimmed so paths can be appended directly
        assert_eq!(config.audit_store_url, "https://audit.internal:9200");
        assert_eq!(config.audit_index_prefix, "users-prod");
        assert_eq!(config.audit_queue_capacity, 16);
        assert_eq!(config.service_name, "user-api");
        assert_eq!(config.environment, "production");
        assert_eq!(config.event_log_queue_capacity, 64);
        assert!(!config.log_to_console);
    }

    #[test]
    fn test_credentials_loaded_together() {
        let config = Config::from_vars(&vars(&[
            ("AUDIT_STORE_USERNAME", "elastic"),
            ("AUDIT_STORE_PASSWORD", "changeme"),
        ]))
        .unwrap();

        assert_eq!(config.audit_store_username.as_deref(), Some("elastic"));
        assert_eq!(
            config.audit_store_password.as_ref().unwrap().expose_secret(),
            "changeme"
        );
    }

    #[test]
    fn test_username_without_password_rejected() {
        let result = Config::from_vars(&vars(&[("AUDIT_STORE_USERNAME", "elastic")]));
        assert!(matches!(result, Err(ConfigError::IncompleteCredentials(_))));
    }

    #[test]
    fn test_password_without_username_rejected() {
        let result = Config::from_vars(&vars(&[("AUDIT_STORE_PASSWORD", "changeme")]));
        assert!(matches!(result, Err(ConfigError::IncompleteCredentials(_))));
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let result = Config::from_vars(&vars(&[("AUDIT_QUEUE_CAPACITY", "0")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref name, ref reason })
                if name == "AUDIT_QUEUE_CAPACITY" && reason.contains("greater than 0")
        ));
    }

    #[test]
    fn test_non_numeric_timeout_rejected() {
        let result = Config::from_vars(&vars(&[("AUDIT_REQUEST_TIMEOUT_SECONDS", "soon")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_uppercase_index_prefix_rejected() {
        let result = Config::from_vars(&vars(&[("AUDIT_INDEX_PREFIX", "User-Mgt")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_invalid_log_to_console_rejected() {
        let result = Config::from_vars(&vars(&[("LOG_TO_CONSOLE", "sometimes")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config::from_vars(&vars(&[
            ("DATABASE_URL", "postgres://user:hunter2@db/users"),
            ("AUDIT_STORE_USERNAME", "elastic"),
            ("AUDIT_STORE_PASSWORD", "s3cret-pass"),
        ]))
        .unwrap();

        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("s3cret-pass"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("elastic"));
    }
}
