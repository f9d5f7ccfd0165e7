//! The adapter object: owns the engine between startup and shutdown
//!
//! ```ignore
//! let db = Database::with_metadata(settings, models::metadata(), true);
//! db.startup().await?;
//! let app = db.init_app(routes::router()).with_state(db.clone());
//! // ... serve ...
//! db.shutdown().await;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use axum::middleware::from_fn_with_state;
use axum::Router;
use tokio::sync::RwLock;

use sqlbind_core::{
    ConnectionSource, DbSettings, Engine, EngineConnection, Error, Executor, Insert, Metadata,
    Model, Result, Select,
};

use crate::middleware::bind_connection;

/// Database adapter shared by the application and its handlers
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    settings: DbSettings,
    metadata: Metadata,
    create_on_startup: bool,
    engine: RwLock<Option<Engine>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("tables", &self.inner.metadata.tables().len())
            .field("create_on_startup", &self.inner.create_on_startup)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub fn new(settings: DbSettings) -> Self {
        Self::with_metadata(settings, Metadata::new(), false)
    }

    /// Adapter with a model registry; `create_on_startup` runs
    /// `CREATE TABLE IF NOT EXISTS` for every registered table at startup.
    pub fn with_metadata(settings: DbSettings, metadata: Metadata, create_on_startup: bool) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                settings,
                metadata,
                create_on_startup,
                engine: RwLock::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &DbSettings {
        &self.inner.settings
    }

    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    /// Startup hook: open the pool and bind it.
    ///
    /// Configuration, connectivity and authentication failures propagate
    /// unchanged and should abort application startup.
    pub async fn startup(&self) -> Result<()> {
        let mut slot = self.inner.engine.write().await;
        if slot.is_some() {
            return Err(Error::AlreadyBound);
        }

        let target = self.inner.settings.target()?;
        tracing::info!(db = %target, "Binding database engine");
        let engine = Engine::connect(&self.inner.settings).await?;

        if self.inner.create_on_startup {
            if let Err(e) = self.inner.metadata.create_all(&engine).await {
                tracing::error!("Schema creation failed, closing pool: {}", e);
                engine.close().await;
                return Err(e);
            }
        }

        *slot = Some(engine);
        Ok(())
    }

    /// Shutdown hook: close the pool. Safe to call more than once and after
    /// a failed startup.
    pub async fn shutdown(&self) {
        let engine = self.inner.engine.write().await.take();
        match engine {
            Some(engine) => engine.close().await,
            None => tracing::debug!("Database not bound; nothing to close"),
        }
    }

    pub async fn is_bound(&self) -> bool {
        self.inner.engine.read().await.is_some()
    }

    /// The bound engine (pool handle)
    pub async fn bind(&self) -> Result<Engine> {
        self.inner.engine.read().await.clone().ok_or(Error::NotBound)
    }

    /// Install the per-request connection middleware on `router` unless
    /// `DB_USE_CONNECTION_FOR_REQUEST` is off.
    pub fn init_app<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        if !self.inner.settings.use_connection_for_request {
            tracing::info!("Per-request connections disabled");
            return router;
        }
        router.route_layer(from_fn_with_state(self.clone(), bind_connection::<Database>))
    }

    pub async fn create_all(&self) -> Result<()> {
        self.inner.metadata.create_all(&self.bind().await?).await
    }

    pub async fn drop_all(&self) -> Result<()> {
        self.inner.metadata.drop_all(&self.bind().await?).await
    }
}

#[async_trait]
impl ConnectionSource for Database {
    type Connection = EngineConnection;

    async fn acquire(&self) -> Result<EngineConnection> {
        self.bind().await?.acquire().await
    }

    async fn release(&self, connection: EngineConnection) {
        connection.close().await;
    }
}

/// Top-level accessor: goes through the bound engine, so inside a request it
/// shares the request's connection.
#[async_trait]
impl Executor for Database {
    async fn first<M: Model>(&self, query: &Select<M>) -> Result<Option<M>> {
        self.bind().await?.first(query).await
    }

    async fn all<M: Model>(&self, query: &Select<M>) -> Result<Vec<M>> {
        self.bind().await?.all(query).await
    }

    async fn insert<M: Model>(&self, insert: &Insert<M>) -> Result<M> {
        self.bind().await?.insert(insert).await
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.bind().await?.execute(sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_without_startup_is_noop() {
        let db = Database::new(DbSettings::from_parts("localhost", 5432, "postgres", "", "postgres"));
        db.shutdown().await;
        db.shutdown().await;
        assert!(!db.is_bound().await);
    }

    #[tokio::test]
    async fn unbound_accessors_fail() {
        let db = Database::new(DbSettings::from_dsn("postgresql://localhost/postgres"));
        assert!(matches!(db.bind().await, Err(Error::NotBound)));
        assert!(matches!(db.execute("SELECT 1").await, Err(Error::NotBound)));
        assert!(matches!(ConnectionSource::acquire(&db).await, Err(Error::NotBound)));
    }

    #[tokio::test]
    async fn startup_with_bad_config_leaves_adapter_unbound() {
        let db = Database::new(DbSettings::default());
        let err = db.startup().await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(!db.is_bound().await);
        db.shutdown().await;
    }
}
