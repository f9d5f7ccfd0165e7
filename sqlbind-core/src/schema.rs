//! Model and metadata registry
//!
//! Static table definitions registered once at startup. Models are plain
//! structs that derive `sqlx::FromRow` and `serde::Serialize`; their JSON
//! form is what handlers return.

use std::fmt;

use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::FromRow;

use crate::error::Result;
use crate::query::{Executor, Insert, Select};

/// A bound parameter or column default
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    BigInt(i64),
    Int(i32),
    Text(String),
    Bool(bool),
    Double(f64),
}

impl Value {
    /// SQL literal for DDL defaults. Never used for query parameters.
    pub fn to_literal(&self) -> String {
        match self {
            Self::BigInt(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Text(v) => format!("'{}'", v.replace('\'', "''")),
            Self::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
            Self::Double(v) => v.to_string(),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Column SQL types supported by the DDL renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// `BIGSERIAL`: auto-assigned 64-bit key
    BigSerial,
    BigInt,
    Integer,
    Text,
    Boolean,
    Double,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::BigSerial => "BIGSERIAL",
            Self::BigInt => "BIGINT",
            Self::Integer => "INTEGER",
            Self::Text => "TEXT",
            Self::Boolean => "BOOLEAN",
            Self::Double => "DOUBLE PRECISION",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub primary_key: bool,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl Column {
    pub fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            primary_key: false,
            nullable: true,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(self.name), self.ty.as_sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_literal());
        }
        sql
    }
}

/// Table definition
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: &'static str,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(Column::to_sql).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(self.name),
            columns.join(", ")
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(self.name))
    }
}

/// Quote an identifier for Postgres
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A row type mapped to one table
pub trait Model: for<'r> FromRow<'r, PgRow> + Serialize + Send + Sync + Unpin + 'static {
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str = "id";

    /// Table definition registered with [`Metadata`]
    fn table() -> Table;

    /// Start a query over this model's table
    fn query() -> Select<Self>
    where
        Self: Sized,
    {
        Select::new()
    }

    /// Fetch by primary key or fail with the not-found error
    fn get_or_404<'a, E>(executor: &'a E, id: impl Into<Value>) -> BoxFuture<'a, Result<Self>>
    where
        E: Executor,
        Self: Sized,
    {
        let query = Self::query().filter_eq(Self::PRIMARY_KEY, id);
        Box::pin(async move { executor.first_or_404(&query).await })
    }

    /// Insert a row and return it as stored
    fn create<'a, E>(executor: &'a E, insert: Insert<Self>) -> BoxFuture<'a, Result<Self>>
    where
        E: Executor,
        Self: Sized,
    {
        Box::pin(async move { executor.insert(&insert).await })
    }
}

/// Ordered registry of table definitions
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    tables: Vec<Table>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model's table. Registering the same table twice is a no-op.
    pub fn register<M: Model>(mut self) -> Self {
        if !self.tables.iter().any(|t| t.name == M::TABLE) {
            self.tables.push(M::table());
        }
        self
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Create every registered table, in registration order
    pub async fn create_all<E: Executor>(&self, executor: &E) -> Result<()> {
        for table in &self.tables {
            executor.execute(&table.create_sql()).await?;
            tracing::info!(table = table.name, "Table created");
        }
        Ok(())
    }

    /// Drop every registered table, in reverse registration order
    pub async fn drop_all<E: Executor>(&self, executor: &E) -> Result<()> {
        for table in self.tables.iter().rev() {
            executor.execute(&table.drop_sql()).await?;
            tracing::info!(table = table.name, "Table dropped");
        }
        Ok(())
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for table in &self.tables {
            writeln!(f, "{};", table.create_sql())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, sqlx::FromRow)]
    struct Note {
        id: i64,
        body: String,
    }

    impl Model for Note {
        const TABLE: &'static str = "notes";

        fn table() -> Table {
            Table::new(Self::TABLE)
                .column(Column::new("id", ColumnType::BigSerial).primary_key())
                .column(Column::new("body", ColumnType::Text).not_null().default("it's empty"))
        }
    }

    #[derive(Debug, Serialize, sqlx::FromRow)]
    struct Tag {
        id: i64,
    }

    impl Model for Tag {
        const TABLE: &'static str = "tags";

        fn table() -> Table {
            Table::new(Self::TABLE).column(Column::new("id", ColumnType::BigInt).primary_key())
        }
    }

    #[test]
    fn create_sql_renders_columns() {
        assert_eq!(
            Note::table().create_sql(),
            r#"CREATE TABLE IF NOT EXISTS "notes" ("id" BIGSERIAL PRIMARY KEY, "body" TEXT NOT NULL DEFAULT 'it''s empty')"#
        );
        assert_eq!(Note::table().drop_sql(), r#"DROP TABLE IF EXISTS "notes""#);
    }

    #[test]
    fn registry_keeps_order_and_dedups() {
        let metadata = Metadata::new()
            .register::<Note>()
            .register::<Tag>()
            .register::<Note>();

        let names: Vec<_> = metadata.tables().iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["notes", "tags"]);
        assert_eq!(metadata.to_string().lines().count(), 2);
    }

    #[test]
    fn literals_are_escaped() {
        assert_eq!(Value::from("o'neil").to_literal(), "'o''neil'");
        assert_eq!(Value::from(true).to_literal(), "TRUE");
        assert_eq!(Value::from(7i64).to_literal(), "7");
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }
}
