//! User API
//!
//! Entry point for the user management service.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use user_api::app::{self, Components};
use user_api::config::Config;
use user_api::repositories::{connect_pool, UsersRepository};
use user_api::routes;

/// Upper bound on draining the audit queue at shutdown.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on flushing queued event log records at shutdown.
const EVENT_LOG_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "user_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting User API");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        audit_store_url = %config.audit_store_url,
        environment = %config.environment,
        "Configuration loaded successfully"
    );

    info!("Connecting to database...");
    let pool = connect_pool(&config.database_url).await.map_err(|e| {
        error!("Failed to connect to database: {}", e);
        e
    })?;
    UsersRepository::ensure_schema(&pool).await.map_err(|e| {
        error!("Failed to create schema: {}", e);
        e
    })?;
    info!("Database ready");

    let bind_address = config.bind_address.clone();

    let cancel_token = CancellationToken::new();
    let logger = app::event_logger(&config);
    let Components {
        state,
        audit_worker,
        health_poller,
        event_log_writer,
    } = app::assemble(config, pool, logger, cancel_token.clone()).map_err(|e| {
        error!("Failed to start components: {}", e);
        e
    })?;

    // Build application routes
    let app = routes::build_routes(state);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("User API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Stop background work and flush queued audit events
    cancel_token.cancel();
    if let Err(e) = health_poller.await {
        warn!("Audit health poller ended abnormally: {}", e);
    }
    match tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, audit_worker).await {
        Ok(Ok(())) => info!("Audit queue drained"),
        Ok(Err(e)) => warn!("Audit worker ended abnormally: {}", e),
        Err(_) => warn!("Audit queue drain timed out, pending events discarded"),
    }

    // The router and its queue handles are gone; the writer exits once the
    // queue is empty
    let flush = tokio::task::spawn_blocking(move || event_log_writer.join());
    match tokio::time::timeout(EVENT_LOG_FLUSH_TIMEOUT, flush).await {
        Ok(Ok(Ok(()))) => info!("Event log flushed"),
        Ok(_) => warn!("Event log writer ended abnormally"),
        Err(_) => warn!("Event log flush timed out"),
    }

    info!("User API shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
