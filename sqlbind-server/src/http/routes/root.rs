//! Root endpoint

use axum::{extract::State, routing::get, Router};

use crate::adapter::Database;
use crate::http::error::ApiError;
use crate::http::extractors::Conn;

/// GET / - checks the request connection carries the configured pool options
async fn root(State(db): State<Database>, Conn(conn): Conn) -> Result<&'static str, ApiError> {
    let expected = db.settings().kwargs.idle_timeout()?;
    let actual = conn.get().await?.settings().idle_timeout;

    if expected.is_some() && expected != actual {
        return Err(ApiError::internal(format!(
            "connection idle timeout {:?} does not match configured {:?}",
            actual, expected
        )));
    }

    Ok("Hello, world!")
}

/// Root routes
pub fn router() -> Router<Database> {
    Router::new().route("/", get(root))
}
