//! Custom Axum extractors

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use sqlbind_core::{EngineConnection, Lease};

use super::error::ApiError;

/// The connection the middleware leased for this request
pub struct Conn<C = EngineConnection>(pub Lease<C>);

impl<S, C> FromRequestParts<S> for Conn<C>
where
    S: Send + Sync,
    C: Send + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Lease<C>>()
            .cloned()
            .map(Self)
            .ok_or_else(|| {
                ApiError::internal(format!(
                    "no request connection on {}; is the connection middleware installed?",
                    parts.uri.path()
                ))
            })
    }
}
