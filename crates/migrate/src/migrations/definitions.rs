//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the fundamental types used throughout the migration system:
//! migration definitions and their operations, ledger records, runner
//! configuration and run summaries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::loader::split_sql_statements;
use crate::backends::DatabaseTransaction;
use crate::error::DatabaseResult;

/// Default name of the ledger table
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

/// Advisory lock key shared by every runner of a deployment ("quarry" in ASCII)
pub const DEFAULT_LOCK_KEY: i64 = 0x7175_6172_7279;

/// A unit of schema work executed inside a transactional scope
#[async_trait]
pub trait MigrationOperation: Send + Sync {
    /// Run the operation against the scope; any error rolls the scope back
    async fn apply(&self, tx: &mut dyn DatabaseTransaction) -> DatabaseResult<()>;

    /// Short label for logs
    fn describe(&self) -> String {
        "custom operation".to_string()
    }
}

/// Operation running a SQL script statement by statement
///
/// Each piece returned by [`split_sql_statements`] is sent as an unprepared
/// script, so an unsplittable script still runs as one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlOperation {
    sql: String,
}

impl SqlOperation {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

#[async_trait]
impl MigrationOperation for SqlOperation {
    async fn apply(&self, tx: &mut dyn DatabaseTransaction) -> DatabaseResult<()> {
        for statement in split_sql_statements(&self.sql, tx.dialect()) {
            tx.execute_script(&statement).await?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        let first_line = self.sql.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or("");
        format!("sql: {}", first_line)
    }
}

/// A registered migration
#[derive(Clone)]
pub struct MigrationDefinition {
    /// Opaque ordering key, unique within the ledger
    pub version: String,
    /// Human-readable name for the migration
    pub name: String,
    /// Forward operation
    pub up: Arc<dyn MigrationOperation>,
    /// Reverse operation, if the migration can be undone
    pub down: Option<Arc<dyn MigrationOperation>>,
}

impl MigrationDefinition {
    pub fn new(
        version: impl Into<String>,
        name: impl Into<String>,
        up: Arc<dyn MigrationOperation>,
        down: Option<Arc<dyn MigrationOperation>>,
    ) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
            up,
            down,
        }
    }

    /// Build a migration from SQL scripts; an empty down script means no Down
    pub fn sql(
        version: impl Into<String>,
        name: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> Self {
        let down = SqlOperation::new(down_sql);
        let down: Option<Arc<dyn MigrationOperation>> = if down.is_empty() {
            None
        } else {
            Some(Arc::new(down))
        };
        Self::new(version, name, Arc::new(SqlOperation::new(up_sql)), down)
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}

impl fmt::Debug for MigrationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDefinition")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("up", &self.up.describe())
            .field("down", &self.down.as_ref().map(|op| op.describe()))
            .finish()
    }
}

/// Migration status row persisted in the ledger table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: i64,
    pub version: String,
    pub name: String,
    pub executed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How `run_all` treats a version whose ledger record has `executed = false`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RolledBackPolicy {
    /// Run Up again and flip the record back to executed
    #[default]
    Reapply,
    /// Treat any ledger record as handled; rollback is one-way
    Skip,
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Table name for tracking migrations
    pub migrations_table: String,
    /// Key of the lock serialising concurrent runners
    pub lock_key: i64,
    /// Longest wait for the migration lock, `None` waits forever
    pub lock_timeout: Option<Duration>,
    /// Deadline for a single Up/Down operation, `None` disables it
    pub operation_timeout: Option<Duration>,
    /// Treatment of rolled back versions during `run_all`
    pub rolled_back_policy: RolledBackPolicy,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            lock_key: DEFAULT_LOCK_KEY,
            lock_timeout: Some(Duration::from_secs(30)),
            operation_timeout: None,
            rolled_back_policy: RolledBackPolicy::default(),
        }
    }
}

/// Result of running migrations
#[derive(Debug, Default)]
pub struct MigrationRunResult {
    /// Number of migrations that were applied
    pub applied_count: usize,
    /// Versions of migrations that were applied, in application order
    pub applied_migrations: Vec<String>,
    /// Number of migrations that were skipped (already handled)
    pub skipped_count: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Result of rolling back a migration
#[derive(Debug)]
pub struct RollbackResult {
    /// Version that was rolled back
    pub version: String,
    /// Whether a Down operation ran (false when only the flag was flipped)
    pub down_executed: bool,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    /// Apply the migration (run Up)
    Up,
    /// Rollback the migration (run Down)
    Down,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "up"),
            MigrationDirection::Down => write!(f, "down"),
        }
    }
}

/// State of a registered migration as seen by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// No ledger record
    Pending,
    /// Ledger record with `executed = true`
    Applied,
    /// Ledger record with `executed = false`
    RolledBack,
}

impl MigrationState {
    pub fn from_record(record: Option<&LedgerRecord>) -> Self {
        match record {
            None => MigrationState::Pending,
            Some(r) if r.executed => MigrationState::Applied,
            Some(_) => MigrationState::RolledBack,
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationState::Pending => write!(f, "pending"),
            MigrationState::Applied => write!(f, "applied"),
            MigrationState::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// One registry entry joined with its ledger record
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: String,
    pub name: String,
    pub state: MigrationState,
    pub reversible: bool,
    pub record: Option<LedgerRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_down_script_is_irreversible() {
        let migration = MigrationDefinition::sql("001_init", "create base tables", "CREATE TABLE a (id INTEGER);", "  \n");
        assert!(!migration.is_reversible());

        let migration = MigrationDefinition::sql("001_init", "create base tables", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
        assert!(migration.is_reversible());
    }

    #[test]
    fn state_follows_executed_flag() {
        let now = Utc::now();
        let mut record = LedgerRecord {
            id: 1,
            version: "001_init".to_string(),
            name: "create base tables".to_string(),
            executed: true,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(MigrationState::from_record(None), MigrationState::Pending);
        assert_eq!(MigrationState::from_record(Some(&record)), MigrationState::Applied);
        record.executed = false;
        assert_eq!(MigrationState::from_record(Some(&record)), MigrationState::RolledBack);
    }

    #[test]
    fn status_serializes_state_in_snake_case() {
        let status = MigrationStatus {
            version: "001_init".to_string(),
            name: "create base tables".to_string(),
            state: MigrationState::RolledBack,
            reversible: false,
            record: None,
        };

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["state"], "rolled_back");
        assert!(value["record"].is_null());
    }
}
