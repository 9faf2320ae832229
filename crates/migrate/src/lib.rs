//! # quarry-migrate: Schema migration version control
//!
//! Keeps a database schema in step with an ordered list of migrations.
//! A [`MigrationRegistry`] lists the migrations, the [`LedgerStore`] records
//! which of them have run, and the [`MigrationRunner`] applies the missing
//! ones inside transactional scopes opened on a [`DatabasePool`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use quarry_migrate::{MigrationConfig, MigrationRegistry, MigrationRunner, SqlitePool};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = MigrationRegistry::new();
//! registry.register_sql(
//!     "001_create_users",
//!     "create users",
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);",
//!     "DROP TABLE users;",
//! );
//!
//! let pool = Arc::new(SqlitePool::connect("sqlite://app.db", Default::default()).await?);
//! let runner = MigrationRunner::new(registry, pool, MigrationConfig::default())?;
//! let result = runner.run_all().await?;
//! println!("applied {} migrations", result.applied_count);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod migrations;
pub mod security;

// Re-export core traits and types
pub use backends::{
    connect, DatabaseBackendType, DatabasePool, DatabasePoolConfig, DatabaseRow, DatabaseTransaction, DatabaseValue,
    MigrationLock, PostgresPool, SqlDialect, SqlitePool,
};
pub use config::{ConfigError, LogFormat, MigrationSettings};
pub use error::{DatabaseError, DatabaseResult, MigrationError, MigrationResult};
pub use migrations::{
    LedgerRecord, LedgerStore, MigrationConfig, MigrationDefinition, MigrationOperation, MigrationRegistry,
    MigrationRunResult, MigrationRunner, MigrationState, MigrationStatus, RollbackResult, RolledBackPolicy,
    SqlOperation,
};
