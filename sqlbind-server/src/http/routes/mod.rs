//! Route handlers organized by resource

pub mod health;
pub mod root;
pub mod users;

use axum::Router;

use crate::adapter::Database;

/// Routes that need a request connection
pub fn app_router() -> Router<Database> {
    Router::new().merge(root::router()).merge(users::router())
}
