//! User endpoints
//!
//! `GET /users/{uid}?method=N` reads one user through one of the equivalent
//! query paths; all of them must agree on both the row and the 404.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;

use sqlbind_core::{Executor, Insert, Model};

use crate::adapter::Database;
use crate::http::error::ApiError;
use crate::http::extractors::Conn;
use crate::models::User;

/// Which query path `GET /users/{uid}` exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPath {
    /// `User::get_or_404` through the adapter
    ModelGet,
    /// Query sugar run on the request connection
    QuerySugar,
    /// The request connection's own accessor
    RequestConnection,
    /// The bound engine (pool handle)
    Engine,
    /// The adapter's top-level accessor
    Database,
}

impl LookupPath {
    pub fn parse(method: Option<&str>) -> Self {
        match method {
            Some("1") => Self::QuerySugar,
            Some("2") => Self::RequestConnection,
            Some("3") => Self::Engine,
            Some("4") => Self::Database,
            _ => Self::ModelGet,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LookupParams {
    pub method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserForm {
    pub name: Option<String>,
}

/// GET /users/{uid}
async fn get_user(
    State(db): State<Database>,
    Conn(conn): Conn,
    Path(uid): Path<i64>,
    Query(params): Query<LookupParams>,
) -> Result<Json<User>, ApiError> {
    let query = User::query().filter_eq(User::PRIMARY_KEY, uid);

    let user = match LookupPath::parse(params.method.as_deref()) {
        LookupPath::ModelGet => User::get_or_404(&db, uid).await?,
        LookupPath::QuerySugar => query.first_or_404(&conn).await?,
        LookupPath::RequestConnection => conn.first_or_404(&query).await?,
        LookupPath::Engine => db.bind().await?.first_or_404(&query).await?,
        LookupPath::Database => db.first_or_404(&query).await?,
    };

    Ok(Json(user))
}

/// POST /users - create, then read back through every path
async fn create_user(
    State(db): State<Database>,
    Conn(conn): Conn,
    Form(form): Form<CreateUserForm>,
) -> Result<Json<User>, ApiError> {
    let insert = Insert::<User>::new().value_opt("nickname", form.name);
    let user = User::create(&conn, insert).await?;
    tracing::info!(id = user.id, nickname = %user.nickname, "User created");

    let query = User::query().filter_eq(User::PRIMARY_KEY, user.id);
    query.first_or_404(&conn).await?;
    db.first_or_404(&query).await?;
    db.bind().await?.first_or_404(&query).await?;
    conn.first_or_404(&query).await?;

    Ok(Json(user))
}

/// User routes
pub fn router() -> Router<Database> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/{uid}", get(get_user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_path_from_method() {
        assert_eq!(LookupPath::parse(None), LookupPath::ModelGet);
        assert_eq!(LookupPath::parse(Some("0")), LookupPath::ModelGet);
        assert_eq!(LookupPath::parse(Some("1")), LookupPath::QuerySugar);
        assert_eq!(LookupPath::parse(Some("2")), LookupPath::RequestConnection);
        assert_eq!(LookupPath::parse(Some("3")), LookupPath::Engine);
        assert_eq!(LookupPath::parse(Some("4")), LookupPath::Database);
        assert_eq!(LookupPath::parse(Some("x")), LookupPath::ModelGet);
    }
}
