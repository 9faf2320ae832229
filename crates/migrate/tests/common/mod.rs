//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quarry_migrate::{
    DatabaseError, DatabasePool, DatabasePoolConfig, DatabaseResult, DatabaseTransaction, LedgerStore,
    MigrationConfig, MigrationOperation, MigrationRegistry, MigrationRunner, SqlitePool,
};

pub async fn memory_pool() -> Arc<dyn DatabasePool> {
    Arc::new(SqlitePool::in_memory().await.unwrap())
}

/// A pool of its own on a database file, as a separate process would open it
pub async fn file_pool(path: &Path) -> Arc<dyn DatabasePool> {
    let url = format!("sqlite://{}", path.display());
    Arc::new(SqlitePool::connect(&url, DatabasePoolConfig::default()).await.unwrap())
}

pub fn runner(registry: MigrationRegistry, pool: &Arc<dyn DatabasePool>) -> MigrationRunner {
    MigrationRunner::new(registry, Arc::clone(pool), MigrationConfig::default()).unwrap()
}

pub fn runner_with(registry: MigrationRegistry, pool: &Arc<dyn DatabasePool>, config: MigrationConfig) -> MigrationRunner {
    MigrationRunner::new(registry, Arc::clone(pool), config).unwrap()
}

pub async fn ledger(pool: &Arc<dyn DatabasePool>) -> LedgerStore {
    let ledger = LedgerStore::with_default_table(Arc::clone(pool)).unwrap();
    ledger.ensure_schema().await.unwrap();
    ledger
}

pub async fn table_exists(pool: &Arc<dyn DatabasePool>, table: &str) -> bool {
    pool.fetch_optional(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
        &[table.into()],
    )
    .await
    .unwrap()
    .is_some()
}

pub async fn count_rows(pool: &Arc<dyn DatabasePool>, table: &str) -> i64 {
    let row = pool
        .fetch_optional(&format!("SELECT COUNT(*) AS n FROM {}", table), &[])
        .await
        .unwrap()
        .unwrap();
    row.get_by_name("n").unwrap().as_i64().unwrap()
}

/// Counts invocations and optionally runs SQL
pub struct CountingOperation {
    calls: Arc<AtomicUsize>,
    sql: Option<String>,
}

impl CountingOperation {
    pub fn new(calls: &Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(Self {
            calls: Arc::clone(calls),
            sql: None,
        })
    }

    pub fn with_sql(calls: &Arc<AtomicUsize>, sql: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: Arc::clone(calls),
            sql: Some(sql.to_string()),
        })
    }
}

#[async_trait]
impl MigrationOperation for CountingOperation {
    async fn apply(&self, tx: &mut dyn DatabaseTransaction) -> DatabaseResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(sql) = &self.sql {
            tx.execute(sql, &[]).await?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "counting operation".to_string()
    }
}

pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Runs SQL, then fails
pub struct FailingOperation {
    sql: Option<String>,
}

impl FailingOperation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { sql: None })
    }

    pub fn after_sql(sql: &str) -> Arc<Self> {
        Arc::new(Self {
            sql: Some(sql.to_string()),
        })
    }
}

#[async_trait]
impl MigrationOperation for FailingOperation {
    async fn apply(&self, tx: &mut dyn DatabaseTransaction) -> DatabaseResult<()> {
        if let Some(sql) = &self.sql {
            tx.execute(sql, &[]).await?;
        }
        Err(DatabaseError::Query("operation failed".to_string()))
    }
}

/// Runs SQL, then sleeps
pub struct SlowOperation {
    sql: String,
    delay: Duration,
}

impl SlowOperation {
    pub fn new(sql: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            sql: sql.to_string(),
            delay,
        })
    }
}

#[async_trait]
impl MigrationOperation for SlowOperation {
    async fn apply(&self, tx: &mut dyn DatabaseTransaction) -> DatabaseResult<()> {
        tx.execute(&self.sql, &[]).await?;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Runs a multi-statement script in the migration scope
pub struct ScriptOperation {
    script: String,
}

impl ScriptOperation {
    pub fn new(script: &str) -> Arc<Self> {
        Arc::new(Self {
            script: script.to_string(),
        })
    }
}

#[async_trait]
impl MigrationOperation for ScriptOperation {
    async fn apply(&self, tx: &mut dyn DatabaseTransaction) -> DatabaseResult<()> {
        tx.execute_script(&self.script).await
    }
}
