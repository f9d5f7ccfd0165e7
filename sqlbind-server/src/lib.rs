//! sqlbind-server: database lifecycle for axum applications
//!
//! Opens the pool at startup, leases one connection per request and closes
//! the pool at shutdown. Ships a small users app exercising every query
//! path.

pub mod adapter;
pub mod http;
pub mod middleware;
pub mod models;

pub use adapter::Database;
pub use http::{build_app, run_server, ApiError, Conn, ServerConfig, ServerError};
pub use middleware::bind_connection;
