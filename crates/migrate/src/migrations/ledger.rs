//! Migration Ledger Store - Persisted record of applied migrations
//!
//! The store owns the ledger table. Reads go through the pool; every write
//! takes the caller's transaction so a ledger change commits or rolls back
//! together with the schema change that triggered it.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::definitions::{LedgerRecord, DEFAULT_MIGRATIONS_TABLE};
use crate::backends::{DatabasePool, DatabaseRow, DatabaseTransaction, DatabaseValue, SqlDialect};
use crate::error::{DatabaseError, MigrationError, MigrationResult};
use crate::security::{escape_identifier, validate_identifier};

const LEDGER_COLUMNS: &str = "id, version, name, executed, created_at, updated_at";

/// Ledger table access
pub struct LedgerStore {
    pool: Arc<dyn DatabasePool>,
    table: String,
    quoted_table: String,
    dialect: SqlDialect,
}

impl LedgerStore {
    /// Create a store over `table`, rejecting unsafe table names
    pub fn new(pool: Arc<dyn DatabasePool>, table: impl Into<String>) -> MigrationResult<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        let quoted_table = escape_identifier(&table);
        let dialect = pool.dialect();
        Ok(Self {
            pool,
            table,
            quoted_table,
            dialect,
        })
    }

    /// Create a store over the default `schema_migrations` table
    pub fn with_default_table(pool: Arc<dyn DatabasePool>) -> MigrationResult<Self> {
        Self::new(pool, DEFAULT_MIGRATIONS_TABLE)
    }

    /// Create the ledger table if it does not exist
    pub async fn ensure_schema(&self) -> MigrationResult<()> {
        let sql = self.create_table_sql();
        self.pool.execute(&sql, &[]).await?;
        debug!(table = %self.table, "Ledger table ensured");
        Ok(())
    }

    /// Look up the record for `version`
    pub async fn find(&self, version: &str) -> MigrationResult<Option<LedgerRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE version = {}",
            LEDGER_COLUMNS,
            self.quoted_table,
            self.placeholder(0)
        );
        let row = self.pool.fetch_optional(&sql, &[version.into()]).await?;
        row.map(|r| record_from_row(r.as_ref())).transpose()
    }

    /// Record `version` as executed
    ///
    /// Fails with [`MigrationError::Conflict`] when the version is already
    /// recorded.
    pub async fn insert(&self, tx: &mut dyn DatabaseTransaction, version: &str, name: &str) -> MigrationResult<()> {
        let sql = format!(
            "INSERT INTO {} (version, name, executed, created_at, updated_at) VALUES ({}, {}, {}, {}, {})",
            self.quoted_table,
            self.placeholder(0),
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3),
            self.placeholder(4)
        );
        let now = Utc::now();
        let params = [
            DatabaseValue::from(version),
            DatabaseValue::from(name),
            DatabaseValue::Bool(true),
            DatabaseValue::DateTime(now),
            DatabaseValue::DateTime(now),
        ];

        match tx.execute(&sql, &params).await {
            Ok(_) => Ok(()),
            Err(DatabaseError::UniqueViolation(_)) => Err(MigrationError::Conflict {
                version: version.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Flip the `executed` flag of an existing record
    pub async fn set_executed(&self, tx: &mut dyn DatabaseTransaction, version: &str, executed: bool) -> MigrationResult<()> {
        let sql = format!(
            "UPDATE {} SET executed = {}, updated_at = {} WHERE version = {}",
            self.quoted_table,
            self.placeholder(0),
            self.placeholder(1),
            self.placeholder(2)
        );
        let params = [
            DatabaseValue::Bool(executed),
            DatabaseValue::DateTime(Utc::now()),
            DatabaseValue::from(version),
        ];

        let affected = tx.execute(&sql, &params).await?;
        if affected == 0 {
            return Err(MigrationError::NotFound(format!("no ledger record for {}", version)));
        }
        Ok(())
    }

    /// Every ledger record ordered by version
    pub async fn list_all(&self) -> MigrationResult<Vec<LedgerRecord>> {
        let sql = format!("SELECT {} FROM {} ORDER BY version ASC, id ASC", LEDGER_COLUMNS, self.quoted_table);
        let rows = self.pool.fetch_all(&sql, &[]).await?;
        rows.iter().map(|row| record_from_row(row.as_ref())).collect()
    }

    fn placeholder(&self, index: usize) -> String {
        self.dialect.parameter_placeholder(index)
    }

    /// SQL to create the ledger table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id {},\n    \
                version {} NOT NULL UNIQUE,\n    \
                name {} NOT NULL,\n    \
                executed BOOLEAN NOT NULL DEFAULT {},\n    \
                created_at {},\n    \
                updated_at {}\n\
            )",
            self.quoted_table,
            self.dialect.auto_increment_primary_key(),
            self.dialect.string_type(),
            self.dialect.string_type(),
            self.dialect.boolean_literal(false),
            self.dialect.timestamp_type(),
            self.dialect.timestamp_type()
        )
    }
}

fn record_from_row(row: &dyn DatabaseRow) -> MigrationResult<LedgerRecord> {
    Ok(LedgerRecord {
        id: row.get_by_name("id")?.as_i64()?,
        version: row.get_by_name("version")?.into_string()?,
        name: row.get_by_name("name")?.into_string()?,
        executed: row.get_by_name("executed")?.as_bool()?,
        created_at: row.get_by_name("created_at")?.as_datetime()?,
        updated_at: row.get_by_name("updated_at")?.as_datetime()?,
    })
}
