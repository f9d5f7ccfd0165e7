//! Structured error types for sqlbind-core.
//!
//! Uses `thiserror` so the server crate can map variants onto HTTP
//! responses. Binaries (sqlbind-cli) wrap these in `anyhow` for context.

use thiserror::Error;

/// Main error type for engine, lease and query operations
#[derive(Error, Debug)]
pub enum Error {
    /// Settings are missing or inconsistent
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Database host could not be reached (DNS, TCP, TLS or pool timeout at startup)
    #[error("Database at {target} is unreachable: {source}")]
    Unreachable {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    /// Server rejected the credentials
    #[error("Authentication failed for user '{user}': {source}")]
    Auth {
        user: String,
        #[source]
        source: sqlx::Error,
    },

    /// Single-row query matched zero rows
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// No connection became available within the acquire timeout
    #[error("Timed out waiting for a pooled connection")]
    PoolTimedOut,

    /// Any other query or execution failure
    #[error("Query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Engine accessed before startup or after shutdown
    #[error("Database engine is not bound; startup has not run or shutdown already did")]
    NotBound,

    /// Startup called on an adapter that already owns an engine
    #[error("Database engine is already bound")]
    AlreadyBound,

    /// Request connection used after it went back to the pool
    #[error("Request connection was already released")]
    ConnectionReleased,
}

/// Result type alias for sqlbind-core operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a not-found error for the given resource (usually a table name)
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Classify a failure raised while opening the pool.
    ///
    /// SQLSTATE class 28 (invalid authorization) is an auth error; everything
    /// else that happens before the first query counts as unreachable.
    pub fn connect(target: impl Into<String>, user: impl Into<String>, source: sqlx::Error) -> Self {
        let auth = match &source {
            sqlx::Error::Database(db) => db.code().is_some_and(|code| code.starts_with("28")),
            _ => false,
        };

        if auth {
            Self::Auth {
                user: user.into(),
                source,
            }
        } else {
            Self::Unreachable {
                target: target.into(),
                source,
            }
        }
    }

    /// True for the zero-rows signal
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::PoolTimedOut,
            other => Self::Query(other),
        }
    }
}
