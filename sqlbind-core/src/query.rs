//! Query builders and the executor seam
//!
//! [`Select`] and [`Insert`] render through `sqlx::QueryBuilder`, so every
//! value travels as a bound parameter. [`Executor`] is implemented by the
//! pool handle ([`Engine`]) and the per-request connection
//! ([`RequestConnection`]); the server crate adds the top-level adapter.
//! All of them share `first_or_404`, so a zero-row lookup produces the same
//! [`Error::NotFound`] whichever path ran it, and within a request they all
//! run on the same connection.

use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::lease::RequestConnection;
use crate::schema::{quote_ident, Model, Value};

/// Sort direction for [`Select::order_by`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// `SELECT * FROM <table>` with equality filters
pub struct Select<M> {
    filters: Vec<(&'static str, Value)>,
    order: Vec<(&'static str, Order)>,
    limit: Option<i64>,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for Select<M> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            order: self.order.clone(),
            limit: self.limit,
            _model: PhantomData,
        }
    }
}

impl<M> std::fmt::Debug for Select<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Select")
            .field("filters", &self.filters)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .finish()
    }
}

impl<M: Model> Default for Select<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> Select<M> {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            _model: PhantomData,
        }
    }

    /// `AND <column> = <value>`
    pub fn filter_eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push((column, value.into()));
        self
    }

    pub fn order_by(mut self, column: &'static str, order: Order) -> Self {
        self.order.push((column, order));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn to_builder(&self) -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new(format!("SELECT * FROM {}", quote_ident(M::TABLE)));

        for (i, (column, value)) in self.filters.iter().enumerate() {
            builder.push(if i == 0 { " WHERE " } else { " AND " });
            builder.push(quote_ident(column));
            builder.push(" = ");
            push_value(&mut builder, value.clone());
        }

        for (i, (column, order)) in self.order.iter().enumerate() {
            builder.push(if i == 0 { " ORDER BY " } else { ", " });
            builder.push(quote_ident(column));
            builder.push(match order {
                Order::Asc => " ASC",
                Order::Desc => " DESC",
            });
        }

        if let Some(limit) = self.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit);
        }

        builder
    }

    /// The SQL text this query sends, with `$n` placeholders
    pub fn sql(&self) -> String {
        self.to_builder().sql().to_string()
    }

    /// Run through `executor`, returning the first row if any
    pub async fn first<E: Executor>(&self, executor: &E) -> Result<Option<M>> {
        executor.first(self).await
    }

    /// Run through `executor`, failing with [`Error::NotFound`] on zero rows
    pub async fn first_or_404<E: Executor>(&self, executor: &E) -> Result<M> {
        executor.first_or_404(self).await
    }

    pub async fn all<E: Executor>(&self, executor: &E) -> Result<Vec<M>> {
        executor.all(self).await
    }
}

/// `INSERT INTO <table> ... RETURNING *`
pub struct Insert<M> {
    values: Vec<(&'static str, Value)>,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for Insert<M> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            _model: PhantomData,
        }
    }
}

impl<M: Model> Default for Insert<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> Insert<M> {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            _model: PhantomData,
        }
    }

    pub fn value(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.values.push((column, value.into()));
        self
    }

    /// Set the column only when a value is present; otherwise the column
    /// default applies.
    pub fn value_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.value(column, value),
            None => self,
        }
    }

    pub(crate) fn to_builder(&self) -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new(format!("INSERT INTO {}", quote_ident(M::TABLE)));

        if self.values.is_empty() {
            builder.push(" DEFAULT VALUES");
        } else {
            let columns: Vec<String> = self.values.iter().map(|(c, _)| quote_ident(c)).collect();
            builder.push(format!(" ({}) VALUES (", columns.join(", ")));
            for (i, (_, value)) in self.values.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_value(&mut builder, value.clone());
            }
            builder.push(")");
        }

        builder.push(" RETURNING *");
        builder
    }

    pub fn sql(&self) -> String {
        self.to_builder().sql().to_string()
    }
}

fn push_value(builder: &mut QueryBuilder<'static, Postgres>, value: Value) {
    match value {
        Value::BigInt(v) => {
            builder.push_bind(v);
        }
        Value::Int(v) => {
            builder.push_bind(v);
        }
        Value::Text(v) => {
            builder.push_bind(v);
        }
        Value::Bool(v) => {
            builder.push_bind(v);
        }
        Value::Double(v) => {
            builder.push_bind(v);
        }
    }
}

/// Something queries can run through
#[async_trait]
pub trait Executor: Send + Sync {
    async fn first<M: Model>(&self, query: &Select<M>) -> Result<Option<M>>;

    async fn all<M: Model>(&self, query: &Select<M>) -> Result<Vec<M>>;

    async fn insert<M: Model>(&self, insert: &Insert<M>) -> Result<M>;

    /// Run a statement without parameters (DDL), returning affected rows
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// First row, or [`Error::NotFound`] naming the model's table
    async fn first_or_404<M: Model>(&self, query: &Select<M>) -> Result<M> {
        self.first(query)
            .await?
            .ok_or_else(|| Error::not_found(M::TABLE))
    }
}

async fn fetch_optional<'c, E, M>(executor: E, query: &Select<M>) -> Result<Option<M>>
where
    E: sqlx::Executor<'c, Database = Postgres>,
    M: Model,
{
    let mut builder = query.to_builder();
    let row = builder.build_query_as::<M>().fetch_optional(executor).await?;
    Ok(row)
}

async fn fetch_all<'c, E, M>(executor: E, query: &Select<M>) -> Result<Vec<M>>
where
    E: sqlx::Executor<'c, Database = Postgres>,
    M: Model,
{
    let mut builder = query.to_builder();
    let rows = builder.build_query_as::<M>().fetch_all(executor).await?;
    Ok(rows)
}

async fn insert_one<'c, E, M>(executor: E, insert: &Insert<M>) -> Result<M>
where
    E: sqlx::Executor<'c, Database = Postgres>,
    M: Model,
{
    let mut builder = insert.to_builder();
    let row = builder.build_query_as::<M>().fetch_one(executor).await?;
    tracing::debug!(table = M::TABLE, "Row inserted");
    Ok(row)
}

async fn execute_raw<'c, E>(executor: E, sql: &str) -> Result<u64>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(sql).execute(executor).await?;
    Ok(result.rows_affected())
}

/// Inside a request the engine runs on that request's connection; elsewhere
/// it borrows from the pool per call.
#[async_trait]
impl Executor for Engine {
    async fn first<M: Model>(&self, query: &Select<M>) -> Result<Option<M>> {
        match self.current_connection().await {
            Some(conn) => conn.first(query).await,
            None => fetch_optional(self.pool(), query).await,
        }
    }

    async fn all<M: Model>(&self, query: &Select<M>) -> Result<Vec<M>> {
        match self.current_connection().await {
            Some(conn) => conn.all(query).await,
            None => fetch_all(self.pool(), query).await,
        }
    }

    async fn insert<M: Model>(&self, insert: &Insert<M>) -> Result<M> {
        match self.current_connection().await {
            Some(conn) => conn.insert(insert).await,
            None => insert_one(self.pool(), insert).await,
        }
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        match self.current_connection().await {
            Some(conn) => conn.execute(sql).await,
            None => execute_raw(self.pool(), sql).await,
        }
    }
}

#[async_trait]
impl Executor for RequestConnection {
    async fn first<M: Model>(&self, query: &Select<M>) -> Result<Option<M>> {
        let mut conn = self.get().await?;
        fetch_optional(conn.as_pg_mut(), query).await
    }

    async fn all<M: Model>(&self, query: &Select<M>) -> Result<Vec<M>> {
        let mut conn = self.get().await?;
        fetch_all(conn.as_pg_mut(), query).await
    }

    async fn insert<M: Model>(&self, insert: &Insert<M>) -> Result<M> {
        let mut conn = self.get().await?;
        insert_one(conn.as_pg_mut(), insert).await
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut conn = self.get().await?;
        execute_raw(conn.as_pg_mut(), sql).await
    }
}
