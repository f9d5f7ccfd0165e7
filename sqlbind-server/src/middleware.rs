//! Request middleware: one leased connection per request
//!
//! The lease is inserted into request extensions and scoped as the task's
//! current request connection before the handler runs, and released after
//! it returns. Queries through the engine or adapter inside the handler
//! reuse it. If the request future is dropped (client disconnect, timeout
//! layer) or the handler panics, the drop guard releases the lease instead.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use sqlbind_core::{ConnectionSource, Lease};

use crate::http::ApiError;

/// Releases a lease that the normal path never got to
struct ReleaseOnDrop<C>(Lease<C>);

impl<C> Drop for ReleaseOnDrop<C> {
    fn drop(&mut self) {
        if self.0.release_now() {
            tracing::warn!("Request ended early; connection released on drop");
        }
    }
}

/// Acquire a connection, expose it to the handler, release it afterwards.
///
/// Install with `axum::middleware::from_fn_with_state(source, bind_connection::<S>)`.
pub async fn bind_connection<S>(
    State(source): State<S>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError>
where
    S: ConnectionSource + Clone,
{
    let lease = Lease::<S::Connection>::new();
    let guard = ReleaseOnDrop(lease.clone());

    lease.acquire_from(&source).await.map_err(|e| {
        tracing::error!(path = %request.uri().path(), "Failed to acquire connection: {}", e);
        ApiError::from(e)
    })?;

    request.extensions_mut().insert(lease.clone());
    let response = lease.scope(next.run(request)).await;

    lease.release_to(&source).await;
    drop(guard);

    Ok(response)
}
