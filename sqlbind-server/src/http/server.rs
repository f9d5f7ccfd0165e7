//! Axum server setup
//!
//! Server skeleton with:
//! - Database startup before the listener binds
//! - Tracing and request timeout middleware
//! - Graceful shutdown on SIGTERM/Ctrl+C, followed by pool shutdown

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::routes;
use crate::adapter::Database;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:8000)
    pub bind_addr: SocketAddr,

    /// Requests running longer than this are cancelled with 408; their
    /// connections are released by the middleware's drop guard.
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Build the application router around a database adapter
pub fn build_app(db: &Database, config: &ServerConfig) -> Router {
    db.init_app(routes::app_router())
        .merge(routes::health::router())
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(db.clone())
}

/// Run the HTTP server.
///
/// Startup failures abort before the listener binds. The pool is closed
/// after the server stops, whether it stopped cleanly or not.
///
/// # Example
///
/// ```ignore
/// let db = Database::new(DbSettings::from_env()?);
/// run_server(db, ServerConfig::default()).await?;
/// ```
pub async fn run_server(db: Database, config: ServerConfig) -> Result<(), ServerError> {
    db.startup().await?;

    let result = serve(&db, &config).await;

    db.shutdown().await;
    tracing::info!("Server shutdown complete");
    result
}

async fn serve(db: &Database, config: &ServerConfig) -> Result<(), ServerError> {
    let app = build_app(db, config);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting shutdown");
        }
    }
}

/// Server error type
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlbind_core::Error),
}
