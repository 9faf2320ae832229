//! SQLite Backend Implementation
//!
//! SQLite implementation of the schema executor traits using sqlx. Used for
//! embedded deployments and as the engine behind the test suite.
//!
//! An in-memory database lives only as long as its connection, so
//! `sqlite::memory:` pools are pinned to a single connection that is never
//! recycled.
//!
//! SQLite has no advisory locks. The migration lock is a row in
//! [`LOCK_TABLE`] keyed by the lock key, so every pool and process opening the
//! same database file contends on it.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Pool, Row, Sqlite, TypeInfo, ValueRef};
use tracing::{debug, warn};

use super::core::*;
use crate::error::{DatabaseError, DatabaseResult};

/// Table holding one row per held migration lock
pub const LOCK_TABLE: &str = "quarry_migration_lock";

/// Interval between lock insert attempts
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

static NEXT_LOCK_TOKEN: AtomicU64 = AtomicU64::new(1);

/// SQLite connection pool implementation
pub struct SqlitePool {
    pool: Pool<Sqlite>,
}

impl SqlitePool {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Create a SQLite pool from a database URL, creating the file if missing
    pub async fn connect(database_url: &str, config: DatabasePoolConfig) -> DatabaseResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DatabaseError::Connection(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true);

        let pool_options = if is_in_memory(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            let mut pool_options = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .test_before_acquire(config.test_before_acquire);
            if let Some(idle_timeout) = config.idle_timeout_seconds {
                pool_options = pool_options.idle_timeout(Duration::from_secs(idle_timeout));
            }
            if let Some(max_lifetime) = config.max_lifetime_seconds {
                pool_options = pool_options.max_lifetime(Duration::from_secs(max_lifetime));
            }
            pool_options
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to create SQLite pool: {}", e)))?;

        Ok(Self::new(pool))
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> DatabaseResult<Self> {
        Self::connect("sqlite::memory:", DatabasePoolConfig::default()).await
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

#[async_trait]
impl DatabasePool for SqlitePool {
    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(SqliteTransaction::new(tx)))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        let result = bind_all(sqlx::query(sql), params).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = bind_all(sqlx::query(sql), params).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|row| Box::new(SqliteRowView::new(row)) as Box<dyn DatabaseRow>).collect())
    }

    async fn fetch_optional(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        let row = bind_all(sqlx::query(sql), params).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| Box::new(SqliteRowView::new(r)) as Box<dyn DatabaseRow>))
    }

    async fn acquire_lock(&self, key: i64, timeout: Option<Duration>) -> DatabaseResult<Box<dyn MigrationLock>> {
        let started = Instant::now();
        let lock_error = |e: sqlx::Error| DatabaseError::Lock(format!("Migration lock query failed: {}", e));

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (lock_key INTEGER PRIMARY KEY, owner TEXT NOT NULL, acquired_at TEXT NOT NULL)",
            LOCK_TABLE
        ))
        .execute(&self.pool)
        .await
        .map_err(lock_error)?;

        let owner = format!("{}-{}", std::process::id(), NEXT_LOCK_TOKEN.fetch_add(1, Ordering::Relaxed));
        let insert = format!(
            "INSERT OR IGNORE INTO {} (lock_key, owner, acquired_at) VALUES (?1, ?2, ?3)",
            LOCK_TABLE
        );

        loop {
            let inserted = sqlx::query(&insert)
                .bind(key)
                .bind(&owner)
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await
                .map_err(lock_error)?
                .rows_affected();

            if inserted == 1 {
                debug!(key, %owner, waited_ms = started.elapsed().as_millis() as u64, "Migration lock acquired");
                return Ok(Box::new(SqliteLock {
                    pool: Some(self.pool.clone()),
                    key,
                    owner,
                }));
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
        SqlDialect::SQLite
    }

    async fn close(&self) -> DatabaseResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Sqlite>) -> Self {
        Self { tx: Some(tx) }
    }

    fn active(&mut self) -> DatabaseResult<&mut sqlx::Transaction<'static, Sqlite>> {
        self.tx
            .as_mut()
            .ok_or_else(|| DatabaseError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        let tx = self.active()?;
        let result = bind_all(sqlx::query(sql), params).execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn execute_script(&mut self, sql: &str) -> DatabaseResult<()> {
        let tx = self.active()?;
        sqlx::Executor::execute(&mut **tx, sql).await?;
        Ok(())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Vec<Box<dyn DatabaseRow>>> {
        let tx = self.active()?;
        let rows = bind_all(sqlx::query(sql), params).fetch_all(&mut **tx).await?;
        Ok(rows.into_iter().map(|row| Box::new(SqliteRowView::new(row)) as Box<dyn DatabaseRow>).collect())
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        let tx = self.active()?;
        let row = bind_all(sqlx::query(sql), params).fetch_optional(&mut **tx).await?;
        Ok(row.map(|r| Box::new(SqliteRowView::new(r)) as Box<dyn DatabaseRow>))
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
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

/// Lock row owned by this process until released
struct SqliteLock {
    pool: Option<Pool<Sqlite>>,
    key: i64,
    owner: String,
}

fn delete_lock_sql() -> String {
    format!("DELETE FROM {} WHERE lock_key = ?1 AND owner = ?2", LOCK_TABLE)
}

#[async_trait]
impl MigrationLock for SqliteLock {
    async fn release(mut self: Box<Self>) -> DatabaseResult<()> {
        let Some(pool) = self.pool.take() else {
            return Ok(());
        };

        let deleted = sqlx::query(&delete_lock_sql())
            .bind(self.key)
            .bind(&self.owner)
            .execute(&pool)
            .await
            .map_err(|e| DatabaseError::Lock(format!("Failed to release migration lock: {}", e)))?
            .rows_affected();

        if deleted == 0 {
            warn!(key = self.key, owner = %self.owner, "Migration lock was not held at release");
        }
        Ok(())
    }
}

impl Drop for SqliteLock {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        warn!(key = self.key, owner = %self.owner, "Migration lock dropped without release");

        // Best effort; a row left behind by a crashed process must be deleted by hand.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let (key, owner) = (self.key, std::mem::take(&mut self.owner));
            handle.spawn(async move {
                if let Err(e) = sqlx::query(&delete_lock_sql()).bind(key).bind(owner).execute(&pool).await {
                    warn!(key, error = %e, "Failed to delete dropped migration lock");
                }
            });
        }
    }
}

/// SQLite row implementation
pub struct SqliteRowView {
    row: SqliteRow,
}

impl SqliteRowView {
    pub fn new(row: SqliteRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for SqliteRowView {
    fn get_by_index(&self, index: usize) -> DatabaseResult<DatabaseValue> {
        sqlite_value_to_database_value(&self.row, index)
    }

    fn get_by_name(&self, name: &str) -> DatabaseResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| DatabaseError::Column(format!("Column '{}' not found", name)))?;

        sqlite_value_to_database_value(&self.row, index)
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[DatabaseValue],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(Option::<String>::None),
            DatabaseValue::Bool(b) => query.bind(*b),
            DatabaseValue::Int32(i) => query.bind(*i),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::Float64(f) => query.bind(*f),
            DatabaseValue::String(s) => query.bind(s.clone()),
            DatabaseValue::Bytes(b) => query.bind(b.clone()),
            // Stored as RFC 3339 text so it reads back through DatabaseValue::as_datetime
            DatabaseValue::DateTime(dt) => query.bind(dt.to_rfc3339()),
        };
    }
    query
}

/// Convert a SQLite value to DatabaseValue using its storage class
fn sqlite_value_to_database_value(row: &SqliteRow, index: usize) -> DatabaseResult<DatabaseValue> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| DatabaseError::Column(format!("Failed to read column {}: {}", index, e)))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let storage_class = raw.type_info().name().to_uppercase();
    let column_error =
        |e: sqlx::Error| DatabaseError::Column(format!("Failed to get {} value: {}", storage_class, e));

    match storage_class.as_str() {
        "INTEGER" | "INT" | "INT8" | "BIGINT" | "BOOLEAN" | "NUMERIC" => row
            .try_get_unchecked::<i64, _>(index)
            .map(DatabaseValue::Int64)
            .map_err(column_error),
        "REAL" | "FLOAT" | "DOUBLE" => row
            .try_get_unchecked::<f64, _>(index)
            .map(DatabaseValue::Float64)
            .map_err(column_error),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(DatabaseValue::Bytes)
            .map_err(column_error),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(DatabaseValue::String)
            .map_err(column_error),
    }
}
