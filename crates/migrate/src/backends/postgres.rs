//! PostgreSQL Backend Implementation
//!
//! PostgreSQL implementation of the schema executor traits using sqlx as the
//! underlying driver. The migration lock is a session-level advisory lock.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, Pool, Postgres, Row, TypeInfo, ValueRef};
use tracing::{debug, warn};

use super::core::*;
use crate::error::{DatabaseError, DatabaseResult};

/// Interval between `pg_try_advisory_lock` attempts
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// PostgreSQL connection pool implementation
pub struct PostgresPool {
    pool: Pool<Postgres>,
}

impl PostgresPool {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Create a PostgreSQL pool from a database URL
    pub async fn connect(database_url: &str, config: DatabasePoolConfig) -> DatabaseResult<Self> {
        if !database_url.starts_with("postgresql://") && !database_url.starts_with("postgres://") {
            return Err(DatabaseError::Connection("Invalid PostgreSQL URL scheme".to_string()));
        }

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .test_before_acquire(config.test_before_acquire);

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = config.max_lifetime_seconds {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        let result = bind_all(sqlx::query(sql), params).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = bind_all(sqlx::query(sql), params).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>).collect())
    }

    async fn fetch_optional(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        let row = bind_all(sqlx::query(sql), params).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| Box::new(PostgresRow::new(r)) as Box<dyn DatabaseRow>))
    }

    async fn acquire_lock(&self, key: i64, timeout: Option<Duration>) -> DatabaseResult<Box<dyn MigrationLock>> {
        let started = Instant::now();
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DatabaseError::Lock(format!("Failed to acquire lock connection: {}", e)))?;

        loop {
            let acquired: bool = sqlx::query("SELECT pg_try_advisory_lock($1)")
                .bind(key)
                .fetch_one(&mut *conn)
                .await
                .and_then(|row| row.try_get(0))
                .map_err(|e| DatabaseError::Lock(format!("Advisory lock query failed: {}", e)))?;

            if acquired {
                debug!(key, waited_ms = started.elapsed().as_millis() as u64, "Advisory lock acquired");
                return Ok(Box::new(PostgresLock { conn: Some(conn), key }));
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(DatabaseError::LockTimeout(limit));
                }
            }

            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    async fn close(&self) -> DatabaseResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { tx: Some(tx) }
    }

    fn active(&mut self) -> DatabaseResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| DatabaseError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        let tx = self.active()?;
        let result = bind_all(sqlx::query(sql), params).execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn execute_script(&mut self, sql: &str) -> DatabaseResult<()> {
        let tx = self.active()?;
        // Unprepared, so the simple query protocol accepts several statements
        sqlx::Executor::execute(&mut **tx, sql).await?;
        Ok(())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>> {
        let tx = self.active()?;
        let rows = bind_all(sqlx::query(sql), params).fetch_all(&mut **tx).await?;
        Ok(rows.into_iter().map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>).collect())
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        let tx = self.active()?;
        let row = bind_all(sqlx::query(sql), params).fetch_optional(&mut **tx).await?;
        Ok(row.map(|r| Box::new(PostgresRow::new(r)) as Box<dyn DatabaseRow>))
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    async fn commit(mut self: Box<Self>) -> DatabaseResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DatabaseError::Transaction("Transaction already completed".to_string()))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> DatabaseResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DatabaseError::Transaction("Transaction already completed".to_string()))?;

        tx.rollback()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

/// Session advisory lock pinned to one pooled connection
struct PostgresLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

#[async_trait]
impl MigrationLock for PostgresLock {
    async fn release(mut self: Box<Self>) -> DatabaseResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let released: bool = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|e| DatabaseError::Lock(format!("Advisory unlock failed: {}", e)))?;

        if !released {
            warn!(key = self.key, "Advisory lock was not held at release");
        }
        Ok(())
    }
}

impl Drop for PostgresLock {
    fn drop(&mut self) {
        // The session holds the lock; closing the connection frees it.
        if let Some(conn) = self.conn.take() {
            warn!(key = self.key, "Advisory lock dropped without release, closing its connection");
            drop(conn.detach());
        }
    }
}

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_index(&self, index: usize) -> DatabaseResult<DatabaseValue> {
        postgres_value_to_database_value(&self.row, index)
    }

    fn get_by_name(&self, name: &str) -> DatabaseResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| DatabaseError::Column(format!("Column '{}' not found", name)))?;

        postgres_value_to_database_value(&self.row, index)
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Postgres, PgArguments>,
    params: &[DatabaseValue],
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    for param in params {
        query = bind_database_value(query, param);
    }
    query
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
    }
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> DatabaseResult<DatabaseValue> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| DatabaseError::Column(format!("Failed to read column {}: {}", index, e)))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();
    let column_error = |e: sqlx::Error| DatabaseError::Column(format!("Failed to get {} value: {}", type_name, e));

    match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(index).map(DatabaseValue::Bool).map_err(column_error),
        "INT2" => row
            .try_get::<i16, _>(index)
            .map(|v| DatabaseValue::Int32(v as i32))
            .map_err(column_error),
        "INT4" => row.try_get::<i32, _>(index).map(DatabaseValue::Int32).map_err(column_error),
        "INT8" => row.try_get::<i64, _>(index).map(DatabaseValue::Int64).map_err(column_error),
        "FLOAT4" => row
            .try_get::<f32, _>(index)
            .map(|v| DatabaseValue::Float64(v as f64))
            .map_err(column_error),
        "FLOAT8" => row.try_get::<f64, _>(index).map(DatabaseValue::Float64).map_err(column_error),
        "BYTEA" => row.try_get::<Vec<u8>, _>(index).map(DatabaseValue::Bytes).map_err(column_error),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(DatabaseValue::DateTime)
            .map_err(column_error),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|v| DatabaseValue::DateTime(v.and_utc()))
            .map_err(column_error),
        _ => row.try_get::<String, _>(index).map(DatabaseValue::String).map_err(column_error),
    }
}
