//! Database seam for TAP_SCHEMA updates.
//!
//! `TapStore` exposes the handful of namespace-level operations the update
//! workflow needs. Every method is its own commit boundary: either all of
//! its statements take effect or none do.

pub mod memory;
pub mod postgres;

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use bytes::BytesMut;
use thiserror::Error;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};

use crate::ledger::SchemaVersion;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("postgres: {}", describe(.0))]
    Postgres(#[from] tokio_postgres::Error),

    #[error("namespace not found: {0}")]
    MissingNamespace(String),

    #[error("namespace already exists: {0}")]
    NamespaceExists(String),

    #[error("relation not found: {0}")]
    MissingRelation(String),

    #[error("duplicate key in {table}: {key}")]
    DuplicateKey { table: String, key: String },

    #[error("invalid row for {table}: {reason}")]
    InvalidRow { table: String, reason: String },
}

fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{} ({detail})", db.message()),
            None => db.message().to_string(),
        },
        None => e.to_string(),
    }
}

/// Column types used by TAP_SCHEMA tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
}

impl SqlType {
    pub fn ddl(self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
}

/// A physical table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
}

impl TableSpec {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// A view aliasing a table in the same namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSpec {
    pub view: String,
    pub table: String,
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Text(String),
    Int(i32),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Text(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Text(s) if <&str as ToSql>::accepts(ty) => s.as_str().to_sql(ty, out),
            Value::Int(i) if <i32 as ToSql>::accepts(ty) => i.to_sql(ty, out),
            other => Err(format!("cannot bind {other:?} as {ty}").into()),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <&str as ToSql>::accepts(ty) || <i32 as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

/// Rows destined for one table.
#[derive(Debug, Clone)]
pub struct RowBatch<'a> {
    pub table: &'a TableSpec,
    pub rows: Vec<Vec<Value>>,
}

/// Namespace-level database operations used by an update run.
///
/// Implementations hold a single session; the update lock is tied to it.
#[async_trait]
pub trait TapStore: Send {
    /// Try to take the update lock for this session. Returns false if
    /// another session holds it.
    async fn try_lock(&mut self) -> StoreResult<bool>;

    /// Release the update lock if this session holds it.
    async fn unlock(&mut self) -> StoreResult<()>;

    /// Drop `namespace` (cascading, tolerant of absence) and create it empty.
    async fn recreate_namespace(&mut self, namespace: &str) -> StoreResult<()>;

    async fn namespace_exists(&mut self, namespace: &str) -> StoreResult<bool>;

    /// Create `table` in `namespace` unless it already exists.
    async fn create_table(&mut self, namespace: &str, table: &TableSpec) -> StoreResult<()>;

    /// Insert every batch in one transaction.
    async fn insert_rows(&mut self, namespace: &str, batches: &[RowBatch<'_>]) -> StoreResult<()>;

    /// Create or replace every view in one transaction.
    async fn create_views(&mut self, namespace: &str, views: &[ViewSpec]) -> StoreResult<()>;

    /// Create the version table if needed and upsert `version`, refreshing
    /// `loaded_at` on conflict.
    async fn upsert_version(&mut self, namespace: &str, version: &str) -> StoreResult<SchemaVersion>;

    /// Most recently loaded version, or `None` if the table is absent or empty.
    async fn current_version(&mut self, namespace: &str) -> StoreResult<Option<SchemaVersion>>;

    /// Non-null values of `column` in a table or view, as text.
    async fn column_values(
        &mut self,
        namespace: &str,
        relation: &str,
        column: &str,
    ) -> StoreResult<Vec<String>>;

    /// Apply `(from, to)` namespace renames in order, all in one transaction.
    async fn rename_namespaces(&mut self, renames: &[(&str, &str)]) -> StoreResult<()>;
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a namespace-qualified relation name.
pub fn qualified(namespace: &str, relation: &str) -> String {
    format!("{}.{}", quote_ident(namespace), quote_ident(relation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("tap_schema"), "\"tap_schema\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn qualified_quotes_both_parts() {
        assert_eq!(qualified("tap_schema_staging", "schemas11"), "\"tap_schema_staging\".\"schemas11\"");
    }

    #[test]
    fn value_conversions() {
        assert_eq!(Value::from("a"), Value::Text("a".to_string()));
        assert_eq!(Value::from(Some(3)), Value::Int(3));
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::Int(7).to_string(), "7");
    }

    #[test]
    fn value_refuses_mismatched_binding() {
        let mut buf = BytesMut::new();
        assert!(Value::Int(1).to_sql(&Type::TEXT, &mut buf).is_err());
        assert!(Value::Text("x".into()).to_sql(&Type::INT4, &mut buf).is_err());
        assert!(matches!(Value::Null.to_sql(&Type::INT4, &mut buf), Ok(IsNull::Yes)));
    }
}
