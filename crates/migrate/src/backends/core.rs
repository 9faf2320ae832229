//! Core Database Backend Traits
//!
//! The schema executor seam: the runner and the ledger store only ever talk
//! to the relational engine through these traits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{DatabaseError, DatabaseResult};

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Begin a transaction from the pool
    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn DatabaseTransaction>>;

    /// Execute a statement directly on the pool and return affected rows count
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64>;

    /// Execute a query directly on the pool and return the result rows
    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query directly on the pool and return the first result row
    async fn fetch_optional(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Option<Box<dyn DatabaseRow>>>;

    /// Acquire the cross-process migration lock identified by `key`
    ///
    /// Waits at most `timeout` (forever when `None`) and fails with
    /// [`DatabaseError::LockTimeout`] once the deadline passes.
    async fn acquire_lock(&self, key: i64, timeout: Option<Duration>) -> DatabaseResult<Box<dyn MigrationLock>>;

    /// Get the SQL dialect spoken by this pool
    fn dialect(&self) -> SqlDialect;

    /// Close the pool
    async fn close(&self) -> DatabaseResult<()>;
}

/// Abstract database transaction trait
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64>;

    /// Execute an unparameterised script that may hold several statements
    async fn execute_script(&mut self, sql: &str) -> DatabaseResult<()>;

    /// Execute a query and return result rows within the transaction
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query and return the first result row within the transaction
    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Option<Box<dyn DatabaseRow>>>;

    /// Get the SQL dialect spoken by this transaction
    fn dialect(&self) -> SqlDialect;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> DatabaseResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> DatabaseResult<()>;
}

/// Held migration lock
#[async_trait]
pub trait MigrationLock: Send + Sync {
    /// Release the lock
    async fn release(self: Box<Self>) -> DatabaseResult<()>;
}

/// Abstract database row trait
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> DatabaseResult<DatabaseValue>;

    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> DatabaseResult<DatabaseValue>;

    /// Get column names
    fn column_names(&self) -> Vec<String>;
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
}

impl DatabaseValue {
    /// Read the value as a boolean; integers follow the SQLite convention
    pub fn as_bool(&self) -> DatabaseResult<bool> {
        match self {
            DatabaseValue::Bool(b) => Ok(*b),
            DatabaseValue::Int32(i) => Ok(*i != 0),
            DatabaseValue::Int64(i) => Ok(*i != 0),
            other => Err(DatabaseError::Column(format!("Expected boolean, found {:?}", other))),
        }
    }

    pub fn as_i64(&self) -> DatabaseResult<i64> {
        match self {
            DatabaseValue::Int32(i) => Ok(*i as i64),
            DatabaseValue::Int64(i) => Ok(*i),
            other => Err(DatabaseError::Column(format!("Expected integer, found {:?}", other))),
        }
    }

    pub fn into_string(self) -> DatabaseResult<String> {
        match self {
            DatabaseValue::String(s) => Ok(s),
            other => Err(DatabaseError::Column(format!("Expected text, found {:?}", other))),
        }
    }

    /// Read the value as a UTC timestamp; text is parsed as RFC 3339
    pub fn as_datetime(&self) -> DatabaseResult<DateTime<Utc>> {
        match self {
            DatabaseValue::DateTime(dt) => Ok(*dt),
            DatabaseValue::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| DatabaseError::Column(format!("Invalid timestamp '{}': {}", s, e))),
            other => Err(DatabaseError::Column(format!("Expected timestamp, found {:?}", other))),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder for the zero-based parameter `index`
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => format!("?{}", index + 1),
        }
    }

    /// Primary key column definition with auto-increment
    pub fn auto_increment_primary_key(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "BIGSERIAL PRIMARY KEY",
            SqlDialect::SQLite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    /// Column type for short strings such as versions and names
    pub fn string_type(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "VARCHAR(255)",
            SqlDialect::SQLite => "TEXT",
        }
    }

    /// Column type for timestamps
    pub fn timestamp_type(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "TIMESTAMPTZ",
            SqlDialect::SQLite => "TEXT",
        }
    }

    /// Boolean literal usable in DDL defaults
    pub fn boolean_literal(&self, value: bool) -> &'static str {
        match (self, value) {
            (SqlDialect::PostgreSQL, true) => "TRUE",
            (SqlDialect::PostgreSQL, false) => "FALSE",
            (SqlDialect::SQLite, true) => "1",
            (SqlDialect::SQLite, false) => "0",
        }
    }

    /// Parser dialect used to split migration scripts into statements
    pub fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        match self {
            SqlDialect::PostgreSQL => Box::new(sqlparser::dialect::PostgreSqlDialect {}),
            SqlDialect::SQLite => Box::new(sqlparser::dialect::SQLiteDialect {}),
        }
    }
}

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600), // 10 minutes
            max_lifetime_seconds: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }
}
