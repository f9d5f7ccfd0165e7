//! HTTP layer
//!
//! Axum server with:
//! - Per-request database connections
//! - Request tracing and timeout
//! - Graceful shutdown that closes the pool
//! - JSON error responses

pub mod error;
pub mod extractors;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use extractors::Conn;
pub use server::{build_app, run_server, ServerConfig, ServerError};
