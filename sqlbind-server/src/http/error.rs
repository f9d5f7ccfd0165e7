//! API error type with IntoResponse
//!
//! Errors are converted to JSON responses with appropriate status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// API error type with automatic HTTP status mapping
#[derive(Debug)]
pub enum ApiError {
    /// Single-row lookup matched nothing (404)
    NotFound { resource: String },

    /// Pool exhausted past the acquire timeout (503)
    Unavailable,

    /// Database error (500, logged)
    Database(sqlbind_core::Error),

    /// Internal error (500, logged)
    Internal { message: String },
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::NotFound { resource } => json!({
                "error": "not_found",
                "message": format!("{} not found", resource)
            }),
            Self::Unavailable => json!({
                "error": "unavailable",
                "message": "no database connection available"
            }),
            Self::Database(e) => {
                // Log the actual error, return generic message
                tracing::error!("Database error: {}", e);
                json!({
                    "error": "internal_error",
                    "message": "an internal error occurred"
                })
            }
            Self::Internal { message } => {
                tracing::error!("Internal error: {}", message);
                json!({
                    "error": "internal_error",
                    "message": "an internal error occurred"
                })
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlbind_core::Error> for ApiError {
    fn from(e: sqlbind_core::Error) -> Self {
        match e {
            sqlbind_core::Error::NotFound { resource } => Self::NotFound { resource },
            sqlbind_core::Error::PoolTimedOut => Self::Unavailable,
            other => Self::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn not_found_is_404_with_resource() {
        let err = ApiError::from(sqlbind_core::Error::not_found("app_users"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["message"], "app_users not found");
    }

    #[tokio::test]
    async fn pool_timeout_is_503() {
        let err = ApiError::from(sqlbind_core::Error::PoolTimedOut);
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn other_errors_hide_details() {
        let err = ApiError::from(sqlbind_core::Error::ConnectionReleased);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("released"));
    }
}
