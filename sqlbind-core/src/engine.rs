//! Engine: the process-wide pool handle
//!
//! Created once at startup from [`DbSettings`], cloned freely into request
//! handlers, closed once at shutdown.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection, PgPool, Postgres};

use crate::config::{ConnectTarget, DbSettings};
use crate::error::{Error, Result};
use crate::lease::{ConnectionSource, LeaseState, RequestConnection};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Pool options as the pool actually applied them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSettings {
    pub min_size: u32,
    pub max_size: u32,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    fn from_pool(pool: &PgPool) -> Self {
        let options = pool.options();
        Self {
            min_size: options.get_min_connections(),
            max_size: options.get_max_connections(),
            idle_timeout: options.get_idle_timeout(),
            max_lifetime: options.get_max_lifetime(),
            acquire_timeout: options.get_acquire_timeout(),
        }
    }
}

/// Shared pool handle
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    id: u64,
    pool: PgPool,
    connect_options: PgConnectOptions,
    target: ConnectTarget,
    settings: PoolSettings,
    dedicated: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("target", &self.inner.target)
            .field("settings", &self.inner.settings)
            .field("dedicated", &self.inner.dedicated)
            .finish()
    }
}

impl Engine {
    /// Open the pool.
    ///
    /// One direct connection is made first, so an unreachable server or
    /// rejected credentials fail here after a single attempt. The pool's own
    /// connect would retry refused connections until the acquire timeout.
    pub async fn connect(settings: &DbSettings) -> Result<Self> {
        let connect_options = settings.connect_options()?;
        let target = ConnectTarget::from_options(&connect_options);

        tracing::info!(db = %target, "Checking database is reachable");
        let first = PgConnection::connect_with(&connect_options)
            .await
            .map_err(|e| {
                tracing::error!(db = %target, "Database connection failed: {}", e);
                Error::connect(target.to_string(), target.user.clone(), e)
            })?;
        if let Err(e) = first.close().await {
            tracing::debug!("Closing startup connection failed: {}", e);
        }

        let mut pool_options = PgPoolOptions::new()
            .min_connections(settings.pool_min_size)
            .max_connections(settings.pool_max_size);
        if let Some(idle) = settings.kwargs.idle_timeout()? {
            pool_options = pool_options.idle_timeout(idle);
        }
        if let Some(lifetime) = settings.kwargs.max_lifetime()? {
            pool_options = pool_options.max_lifetime(lifetime);
        }
        if let Some(timeout) = settings.kwargs.acquire_timeout()? {
            pool_options = pool_options.acquire_timeout(timeout);
        }
        if let Some(test) = settings.kwargs.test_before_acquire {
            pool_options = pool_options.test_before_acquire(test);
        }

        tracing::info!(db = %target, "Creating database pool");

        let pool = pool_options
            .connect_with(connect_options.clone())
            .await
            .map_err(|e| {
                tracing::error!(db = %target, "Failed to create database pool: {}", e);
                Error::connect(target.to_string(), target.user.clone(), e)
            })?;

        let pool_settings = PoolSettings::from_pool(&pool);
        tracing::info!(
            min = pool_settings.min_size,
            max = pool_settings.max_size,
            idle_timeout = ?pool_settings.idle_timeout,
            dedicated = settings.dedicated_connection,
            "Database pool created"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
                pool,
                connect_options,
                target,
                settings: pool_settings,
                dedicated: settings.dedicated_connection,
            }),
        })
    }

    /// The underlying sqlx pool
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    pub fn target(&self) -> &ConnectTarget {
        &self.inner.target
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }

    /// The request connection the running task was given, if it came from
    /// this engine and is still held. Queries issued through the engine run
    /// on it instead of checking out a second connection.
    pub async fn current_connection(&self) -> Option<RequestConnection> {
        let lease = RequestConnection::current()?;
        if lease.state() != LeaseState::Acquired {
            return None;
        }
        let owned = match lease.get().await {
            Ok(conn) => conn.is_from(self),
            Err(_) => false,
        };
        owned.then_some(lease)
    }

    /// Hand out a connection: a pooled one, or a fresh dedicated one when
    /// configured with `DB_DEDICATED_CONNECTION`.
    pub async fn acquire(&self) -> Result<EngineConnection> {
        if self.is_closed() {
            return Err(Error::NotBound);
        }

        let kind = if self.inner.dedicated {
            let conn = PgConnection::connect_with(&self.inner.connect_options).await?;
            ConnectionKind::Dedicated(conn)
        } else {
            ConnectionKind::Pooled(self.inner.pool.acquire().await?)
        };

        tracing::debug!(
            dedicated = self.inner.dedicated,
            idle = self.inner.pool.num_idle(),
            size = self.inner.pool.size(),
            "Connection acquired"
        );

        Ok(EngineConnection {
            kind,
            settings: self.inner.settings,
            engine_id: self.inner.id,
        })
    }

    /// Close the pool, waiting for checked-out connections to come back.
    /// Calling this on a closed engine does nothing.
    pub async fn close(&self) {
        if self.inner.pool.is_closed() {
            tracing::debug!(db = %self.inner.target, "Database pool already closed");
            return;
        }
        self.inner.pool.close().await;
        tracing::info!(db = %self.inner.target, "Database pool closed");
    }
}

#[async_trait]
impl ConnectionSource for Engine {
    type Connection = EngineConnection;

    async fn acquire(&self) -> Result<EngineConnection> {
        Engine::acquire(self).await
    }

    async fn release(&self, connection: EngineConnection) {
        connection.close().await;
    }
}

/// A connection handed out by [`Engine::acquire`]
pub struct EngineConnection {
    kind: ConnectionKind,
    settings: PoolSettings,
    engine_id: u64,
}

enum ConnectionKind {
    Pooled(PoolConnection<Postgres>),
    Dedicated(PgConnection),
}

impl EngineConnection {
    /// Pool options in force when this connection was handed out
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// True when `engine` handed this connection out
    pub fn is_from(&self, engine: &Engine) -> bool {
        self.engine_id == engine.inner.id
    }

    pub fn is_dedicated(&self) -> bool {
        matches!(self.kind, ConnectionKind::Dedicated(_))
    }

    pub fn as_pg_mut(&mut self) -> &mut PgConnection {
        match &mut self.kind {
            ConnectionKind::Pooled(conn) => conn,
            ConnectionKind::Dedicated(conn) => conn,
        }
    }

    /// Give the connection back: pooled ones return to the pool, dedicated
    /// ones are closed.
    pub async fn close(self) {
        match self.kind {
            ConnectionKind::Pooled(conn) => drop(conn),
            ConnectionKind::Dedicated(conn) => {
                if let Err(e) = conn.close().await {
                    tracing::warn!("Failed to close dedicated connection: {}", e);
                }
            }
        }
    }
}

impl Deref for EngineConnection {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match &self.kind {
            ConnectionKind::Pooled(conn) => conn,
            ConnectionKind::Dedicated(conn) => conn,
        }
    }
}

impl DerefMut for EngineConnection {
    fn deref_mut(&mut self) -> &mut PgConnection {
        self.as_pg_mut()
    }
}
