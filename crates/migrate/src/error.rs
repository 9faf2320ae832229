//! Error types for the migration system
//!
//! `DatabaseError` is raised by the schema executor backends, `MigrationError`
//! by the ledger store and runner. Every migration failure carries the
//! version and name of the migration that produced it.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for executor operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Result type alias for ledger and runner operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Errors produced by the database backends
#[derive(Debug, Clone, Error)]
pub enum DatabaseError {
    /// Connection or pool error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Statement execution or fetch error
    #[error("Query error: {0}")]
    Query(String),

    /// Begin/commit/rollback error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Unique constraint violated by an insert
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Column missing or not convertible
    #[error("Column error: {0}")]
    Column(String),

    /// Migration lock not acquired before the deadline
    #[error("Timed out after {0:?} waiting for the migration lock")]
    LockTimeout(Duration),

    /// Migration lock acquisition or release failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Invalid input rejected before reaching the database
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseError::UniqueViolation(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Connection(err.to_string())
            }
            sqlx::Error::ColumnNotFound(name) => DatabaseError::Column(name.clone()),
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

/// Errors produced by the migration registry, ledger store and runner
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A transactional scope could not be opened
    #[error("Connection error: {0}")]
    Connection(#[source] DatabaseError),

    /// Version absent from the registry or the ledger
    #[error("Migration not found: {0}")]
    NotFound(String),

    /// Ledger already holds a record for the version
    #[error("Migration {version} is already recorded in the ledger")]
    Conflict { version: String },

    /// Ledger record is in the wrong state for the requested transition
    #[error("Migration {version} is not applied or already rolled back")]
    State { version: String },

    /// Up/Down operation or its ledger write failed
    #[error("Migration {version} ({name}) failed: {source}")]
    Execution {
        version: String,
        name: String,
        #[source]
        source: Box<MigrationError>,
    },

    /// Operation failed inside the executor
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Up/Down operation exceeded the configured deadline
    #[error("Migration {version} ({name}) timed out after {elapsed:?}")]
    Timeout {
        version: String,
        name: String,
        elapsed: Duration,
    },

    /// Migration lock could not be acquired
    #[error("Migration lock unavailable: {0}")]
    Lock(#[source] DatabaseError),

    /// Migration file could not be read or parsed
    #[error("Failed to load migrations: {0}")]
    Load(String),
}

impl MigrationError {
    /// Wrap an error with the identity of the migration that raised it
    pub fn execution(version: &str, name: &str, source: MigrationError) -> Self {
        MigrationError::Execution {
            version: version.to_string(),
            name: name.to_string(),
            source: Box::new(source),
        }
    }

    /// The innermost error, skipping migration identity wrappers
    pub fn root_cause(&self) -> &MigrationError {
        match self {
            MigrationError::Execution { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), MigrationError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.root_cause(), MigrationError::Conflict { .. })
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> Self {
        MigrationError::Load(err.to_string())
    }
}
