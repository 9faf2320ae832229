//! Database Backend Abstractions
//!
//! This module provides the schema executor abstraction and its
//! PostgreSQL and SQLite implementations, selected from the database URL.

use std::sync::Arc;

pub mod core;
pub mod postgres;
pub mod sqlite;

// Re-export core traits and types
pub use self::core::*;
pub use postgres::{PostgresPool, PostgresTransaction};
pub use sqlite::{SqlitePool, SqliteTransaction};

use crate::error::{DatabaseError, DatabaseResult};

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect database backend type from URL
    pub fn from_url(url: &str) -> DatabaseResult<Self> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(DatabaseBackendType::PostgreSQL)
        } else if url.starts_with("sqlite:") {
            Ok(DatabaseBackendType::SQLite)
        } else {
            Err(DatabaseError::Connection(format!(
                "Unable to detect database backend from URL: {}",
                redact_url(url)
            )))
        }
    }
}

/// Create a connection pool using the backend matching the URL scheme
pub async fn connect(database_url: &str, config: DatabasePoolConfig) -> DatabaseResult<Arc<dyn DatabasePool>> {
    match DatabaseBackendType::from_url(database_url)? {
        DatabaseBackendType::PostgreSQL => {
            let pool = PostgresPool::connect(database_url, config).await?;
            Ok(Arc::new(pool))
        }
        DatabaseBackendType::SQLite => {
            let pool = SqlitePool::connect(database_url, config).await?;
            Ok(Arc::new(pool))
        }
    }
}

/// Strip credentials from a database URL before it reaches a log line
pub fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}
