//! Test server harness for E2E testing
//!
//! Provides `TestUserApiServer` for spawning real User API instances in
//! tests, backed by an in-memory database and an in-memory event log.

use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use user_api::app::{self, Components};
use user_api::config::Config;
use user_api::observability::logger::{LogRecord, LogSink, MemorySink, StructuredLogger};
use user_api::observability::ServiceIdentity;
use user_api::repositories::{connect_pool, UsersRepository};
use user_api::routes::{self, AppState};

/// Test harness for spawning the User API in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let store = FakeAuditStore::start().await;
///     let server = TestUserApiServer::spawn(&store.uri()).await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestUserApiServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    pool: SqlitePool,
    event_log: MemorySink,
    cancel_token: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Event log sink that rejects every write, like a full disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingLogSink;

impl LogSink for FailingLogSink {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn write(&self, _record: &LogRecord, _line: &str) -> io::Result<()> {
        Err(io::Error::other("No space left on device"))
    }
}

impl TestUserApiServer {
    /// Spawn a server whose audit store lives at `audit_store_url`.
    pub async fn spawn(audit_store_url: &str) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(audit_store_url, HashMap::new()).await
    }

    /// Spawn a server whose primary event log sink fails every write.
    ///
    /// Records then land in the fallback sink, readable through
    /// [`TestUserApiServer::event_log`].
    pub async fn spawn_with_failing_event_log(
        audit_store_url: &str,
    ) -> Result<Self, anyhow::Error> {
        Self::start(audit_store_url, HashMap::new(), true).await
    }

    /// Spawn a server with extra configuration variables.
    ///
    /// The server will:
    /// - Use a private in-memory database
    /// - Record event log lines in memory instead of a file
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Re-evaluate audit health every second
    pub async fn spawn_with_vars(
        audit_store_url: &str,
        extra_vars: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        Self::start(audit_store_url, extra_vars, false).await
    }

    async fn start(
        audit_store_url: &str,
        extra_vars: HashMap<String, String>,
        failing_event_log: bool,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("DATABASE_URL".to_string(), "sqlite::memory:".to_string()),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("AUDIT_STORE_URL".to_string(), audit_store_url.to_string()),
            ("AUDIT_REQUEST_TIMEOUT_SECONDS".to_string(), "2".to_string()),
            ("ENVIRONMENT".to_string(), "test".to_string()),
            ("LOG_TO_CONSOLE".to_string(), "false".to_string()),
            ("AUDIT_HEALTH_POLL_SECONDS".to_string(), "1".to_string()),
        ]);
        vars.extend(extra_vars);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let pool = connect_pool(&config.database_url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;
        UsersRepository::ensure_schema(&pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create schema: {}", e))?;

        let event_log = MemorySink::new();
        let identity = ServiceIdentity::new(&config.service_name, &config.environment);
        let logger = if failing_event_log {
            StructuredLogger::with_fallback(
                identity,
                Some(Box::new(FailingLogSink)),
                Box::new(event_log.clone()),
                false,
            )
        } else {
            StructuredLogger::new(identity, Some(Box::new(event_log.clone())), false)
        };
        let logger = Arc::new(logger);

        let cancel_token = CancellationToken::new();
        let Components { state, .. } =
            app::assemble(config, pool.clone(), logger, cancel_token.clone())
                .map_err(|e| anyhow::anyhow!("Failed to assemble components: {}", e))?;

        // Build routes using the real route builder
        let app = routes::build_routes(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            // Connect info gives the middleware a client address
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            pool,
            event_log,
            cancel_token,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared application state (metrics registry, health aggregator, ...).
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Event log records written so far, parsed.
    pub fn event_log(&self) -> Vec<Value> {
        self.event_log.records()
    }

    /// The server's structured logger, for delivery counters.
    pub fn event_logger(&self) -> &Arc<StructuredLogger> {
        self.state.instrumentation.event_log().logger()
    }
}

impl Drop for TestUserApiServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_audit_store::FakeAuditStore;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let store = FakeAuditStore::start().await;
        let server = TestUserApiServer::spawn(&store.uri()).await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);

        let body: Value = response.json().await?;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["dependencies"]["audit"], "healthy");

        Ok(())
    }

    #[tokio::test]
    async fn test_server_provides_pool_access() -> Result<(), anyhow::Error> {
        let store = FakeAuditStore::start().await;
        let server = TestUserApiServer::spawn(&store.uri()).await?;

        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(server.pool())
            .await?;

        assert_eq!(result.0, 0);
        Ok(())
    }
}
