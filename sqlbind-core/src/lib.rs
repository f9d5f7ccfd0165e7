//! sqlbind-core: engine, request lease and typed models over sqlx
//!
//! - [`config`]: `DB_*` settings from TOML, environment or JSON
//! - [`engine`]: the process-wide pool handle
//! - [`lease`]: per-request connection with a guaranteed single release
//! - [`schema`]: model trait and metadata registry
//! - [`query`]: select/insert builders and the [`Executor`] seam

pub mod config;
pub mod engine;
pub mod error;
pub mod lease;
pub mod query;
pub mod schema;

pub use config::{ConnectTarget, DbSettings, PoolKwargs, SslMode, SslSettings};
pub use engine::{Engine, EngineConnection, PoolSettings};
pub use error::{Error, Result};
pub use lease::{ConnectionSource, Lease, LeaseGuard, LeaseState, RequestConnection};
pub use query::{Executor, Insert, Order, Select};
pub use schema::{Column, ColumnType, Metadata, Model, Table, Value};

// Re-export sqlx for callers that build their own queries
pub use sqlx;
