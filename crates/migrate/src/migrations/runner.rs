//! Migration Runner - Executes migrations against the database
//!
//! Applies registered migrations in registration order, records them in the
//! ledger and rolls them back on request. Each migration runs in its own
//! transactional scope together with its ledger write; a failure rolls the
//! scope back and stops the run, so the next run resumes at the failed
//! migration. Every mutating call holds the migration lock for its duration.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::definitions::{
    LedgerRecord, MigrationConfig, MigrationDefinition, MigrationDirection, MigrationOperation, MigrationRunResult,
    MigrationState, MigrationStatus, RollbackResult, RolledBackPolicy,
};
use super::ledger::LedgerStore;
use super::registry::MigrationRegistry;
use crate::backends::{DatabasePool, DatabaseTransaction, MigrationLock};
use crate::error::{MigrationError, MigrationResult};

/// Migration runner that executes migrations against a database
pub struct MigrationRunner {
    registry: MigrationRegistry,
    pool: Arc<dyn DatabasePool>,
    ledger: LedgerStore,
    config: MigrationConfig,
}

impl MigrationRunner {
    /// Create a new migration runner
    ///
    /// Fails when the configured ledger table name is not a safe identifier.
    pub fn new(registry: MigrationRegistry, pool: Arc<dyn DatabasePool>, config: MigrationConfig) -> MigrationResult<Self> {
        let ledger = LedgerStore::new(Arc::clone(&pool), config.migrations_table.clone())?;
        Ok(Self {
            registry,
            pool,
            ledger,
            config,
        })
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Run all pending migrations
    pub async fn run_all(&self) -> MigrationResult<MigrationRunResult> {
        let lock = self.acquire_lock().await?;
        let result = self.run_all_locked().await;
        self.release_lock(lock).await;
        result
    }

    async fn run_all_locked(&self) -> MigrationResult<MigrationRunResult> {
        let start_time = Instant::now();
        self.ledger.ensure_schema().await?;

        let duplicates = self.registry.duplicate_versions();
        if !duplicates.is_empty() {
            warn!(versions = ?duplicates, "Duplicate migration versions registered, only the first occurrence runs");
        }

        let mut result = MigrationRunResult::default();
        let mut visited = HashSet::new();

        for migration in &self.registry {
            if !visited.insert(migration.version.as_str()) {
                result.skipped_count += 1;
                continue;
            }

            let reapply = match self.ledger.find(&migration.version).await? {
                None => false,
                Some(record) if record.executed => {
                    debug!(version = %migration.version, name = %migration.name, "Migration already applied");
                    result.skipped_count += 1;
                    continue;
                }
                Some(_) if self.config.rolled_back_policy == RolledBackPolicy::Skip => {
                    info!(version = %migration.version, name = %migration.name, "Skipping rolled back migration");
                    result.skipped_count += 1;
                    continue;
                }
                Some(_) => true,
            };

            self.apply(migration, reapply).await?;
            result.applied_migrations.push(migration.version.clone());
        }

        result.applied_count = result.applied_migrations.len();
        result.execution_time_ms = start_time.elapsed().as_millis();

        info!(
            applied = result.applied_count,
            skipped = result.skipped_count,
            elapsed_ms = result.execution_time_ms as u64,
            "Migration run complete"
        );
        Ok(result)
    }

    /// Apply a single migration and record it in the same scope
    async fn apply(&self, migration: &MigrationDefinition, reapply: bool) -> MigrationResult<()> {
        info!(version = %migration.version, name = %migration.name, reapply, "Applying migration");

        let mut tx = self.begin(migration).await?;
        let outcome = async {
            self.run_operation(migration.up.as_ref(), tx.as_mut(), migration).await?;
            if reapply {
                self.ledger.set_executed(tx.as_mut(), &migration.version, true).await
            } else {
                self.ledger.insert(tx.as_mut(), &migration.version, &migration.name).await
            }
        }
        .await;

        self.finish(tx, migration, MigrationDirection::Up, outcome).await
    }

    /// Roll back an applied migration
    ///
    /// Runs the Down operation, when the migration has one, and marks the
    /// ledger record as not executed. Version lookups happen before any
    /// ledger write.
    pub async fn rollback(&self, version: &str) -> MigrationResult<RollbackResult> {
        let migration = self
            .registry
            .get(version)
            .ok_or_else(|| MigrationError::NotFound(format!("{} is not registered", version)))?;

        let lock = self.acquire_lock().await?;
        let result = async {
            self.ledger.ensure_schema().await?;
            self.rollback_locked(migration).await
        }
        .await;
        self.release_lock(lock).await;
        result
    }

    /// Roll back the most recently recorded migration that is still applied
    ///
    /// Only versions known to the registry are considered. Returns `None`
    /// when nothing is applied.
    pub async fn rollback_latest(&self) -> MigrationResult<Option<RollbackResult>> {
        let lock = self.acquire_lock().await?;
        let result = self.rollback_latest_locked().await;
        self.release_lock(lock).await;
        result
    }

    async fn rollback_latest_locked(&self) -> MigrationResult<Option<RollbackResult>> {
        self.ledger.ensure_schema().await?;

        let latest = self
            .ledger
            .list_all()
            .await?
            .into_iter()
            .filter(|record| record.executed)
            .filter_map(|record| self.registry.get(&record.version).map(|migration| (record.id, migration)))
            .max_by_key(|(id, _)| *id);

        match latest {
            Some((_, migration)) => self.rollback_locked(migration).await.map(Some),
            None => {
                info!("No applied migrations to roll back");
                Ok(None)
            }
        }
    }

    async fn rollback_locked(&self, migration: &MigrationDefinition) -> MigrationResult<RollbackResult> {
        let start_time = Instant::now();

        let record = self
            .ledger
            .find(&migration.version)
            .await?
            .ok_or_else(|| MigrationError::NotFound(format!("{} has no ledger record", migration.version)))?;
        if !record.executed {
            return Err(MigrationError::State {
                version: migration.version.clone(),
            });
        }

        info!(version = %migration.version, name = %migration.name, "Rolling back migration");

        let mut tx = self.begin(migration).await?;
        let outcome = async {
            let down_executed = match &migration.down {
                Some(down) => {
                    self.run_operation(down.as_ref(), tx.as_mut(), migration).await?;
                    true
                }
                None => {
                    warn!(
                        version = %migration.version,
                        name = %migration.name,
                        "Migration has no down operation, only marking it as rolled back"
                    );
                    false
                }
            };
            self.ledger.set_executed(tx.as_mut(), &migration.version, false).await?;
            Ok::<_, MigrationError>(down_executed)
        }
        .await;

        let down_executed = self.finish(tx, migration, MigrationDirection::Down, outcome).await?;

        Ok(RollbackResult {
            version: migration.version.clone(),
            down_executed,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// All ledger records ordered by version
    pub async fn status(&self) -> MigrationResult<Vec<LedgerRecord>> {
        self.ledger.ensure_schema().await?;
        self.ledger.list_all().await
    }

    /// Registered migrations in registration order with their ledger state
    pub async fn plan(&self) -> MigrationResult<Vec<MigrationStatus>> {
        let mut records: HashMap<String, LedgerRecord> = self
            .status()
            .await?
            .into_iter()
            .map(|record| (record.version.clone(), record))
            .collect();

        let mut plan = Vec::with_capacity(self.registry.len());
        let mut visited = HashSet::new();
        for migration in &self.registry {
            if !visited.insert(migration.version.as_str()) {
                continue;
            }
            let record = records.remove(&migration.version);
            plan.push(MigrationStatus {
                version: migration.version.clone(),
                name: migration.name.clone(),
                state: MigrationState::from_record(record.as_ref()),
                reversible: migration.is_reversible(),
                record,
            });
        }
        Ok(plan)
    }

    async fn begin(&self, migration: &MigrationDefinition) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        let tx = self.pool.begin_transaction().await.map_err(MigrationError::Connection)?;
        debug!(version = %migration.version, "Transaction started");
        Ok(tx)
    }

    /// Commit the scope on success, roll it back on failure
    async fn finish<T>(
        &self,
        tx: Box<dyn DatabaseTransaction>,
        migration: &MigrationDefinition,
        direction: MigrationDirection,
        outcome: MigrationResult<T>,
    ) -> MigrationResult<T> {
        match outcome {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| MigrationError::execution(&migration.version, &migration.name, e.into()))?;
                debug!(version = %migration.version, %direction, "Transaction committed");
                info!(version = %migration.version, name = %migration.name, %direction, "Migration finished");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(version = %migration.version, error = %rollback_err, "Failed to roll back transaction");
                } else {
                    debug!(version = %migration.version, %direction, "Transaction rolled back");
                }
                let err = with_identity(migration, err);
                error!(version = %migration.version, name = %migration.name, %direction, error = %err, "Migration failed");
                Err(err)
            }
        }
    }

    /// Run one operation under the configured deadline
    async fn run_operation(
        &self,
        operation: &dyn MigrationOperation,
        tx: &mut dyn DatabaseTransaction,
        migration: &MigrationDefinition,
    ) -> MigrationResult<()> {
        debug!(version = %migration.version, operation = %operation.describe(), "Running operation");

        match self.config.operation_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation.apply(tx)).await {
                Ok(result) => result.map_err(MigrationError::from),
                Err(_) => Err(MigrationError::Timeout {
                    version: migration.version.clone(),
                    name: migration.name.clone(),
                    elapsed: limit,
                }),
            },
            None => operation.apply(tx).await.map_err(MigrationError::from),
        }
    }

    async fn acquire_lock(&self) -> MigrationResult<Box<dyn MigrationLock>> {
        debug!(key = self.config.lock_key, "Acquiring migration lock");
        let lock = self
            .pool
            .acquire_lock(self.config.lock_key, self.config.lock_timeout)
            .await
            .map_err(MigrationError::Lock)?;
        debug!(key = self.config.lock_key, "Migration lock acquired");
        Ok(lock)
    }

    async fn release_lock(&self, lock: Box<dyn MigrationLock>) {
        match lock.release().await {
            Ok(()) => debug!(key = self.config.lock_key, "Migration lock released"),
            Err(e) => warn!(key = self.config.lock_key, error = %e, "Failed to release migration lock"),
        }
    }
}

/// Attach the migration identity unless the error already carries it
fn with_identity(migration: &MigrationDefinition, err: MigrationError) -> MigrationError {
    match err {
        err @ (MigrationError::Timeout { .. } | MigrationError::Execution { .. }) => err,
        other => MigrationError::execution(&migration.version, &migration.name, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqlitePool;

    async fn runner(registry: MigrationRegistry) -> MigrationRunner {
        let pool: Arc<dyn DatabasePool> = Arc::new(SqlitePool::in_memory().await.unwrap());
        MigrationRunner::new(registry, pool, MigrationConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn rejects_invalid_table_name() {
        let pool: Arc<dyn DatabasePool> = Arc::new(SqlitePool::in_memory().await.unwrap());
        let config = MigrationConfig {
            migrations_table: "bad-name".to_string(),
            ..MigrationConfig::default()
        };
        assert!(MigrationRunner::new(MigrationRegistry::new(), pool, config).is_err());
    }

    #[tokio::test]
    async fn empty_registry_applies_nothing() {
        let runner = runner(MigrationRegistry::new()).await;
        let result = runner.run_all().await.unwrap();
        assert_eq!(result.applied_count, 0);
        assert_eq!(result.skipped_count, 0);
        assert!(runner.status().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn plan_reports_state_per_version() {
        let mut registry = MigrationRegistry::new();
        registry
            .register_sql("001_init", "create base tables", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;")
            .register_sql("002_seed", "seed rows", "INSERT INTO a (id) VALUES (1);", "");
        let runner = runner(registry).await;

        let plan = runner.plan().await.unwrap();
        assert!(plan.iter().all(|s| s.state == MigrationState::Pending));

        runner.run_all().await.unwrap();
        runner.rollback("001_init").await.unwrap();

        let plan = runner.plan().await.unwrap();
        assert_eq!(plan[0].state, MigrationState::RolledBack);
        assert!(plan[0].reversible);
        assert_eq!(plan[1].state, MigrationState::Applied);
        assert!(!plan[1].reversible);
    }

    #[test]
    fn timeout_keeps_its_own_identity() {
        let migration = MigrationDefinition::sql("001_init", "create base tables", "SELECT 1;", "");
        let err = with_identity(
            &migration,
            MigrationError::Timeout {
                version: "001_init".to_string(),
                name: "create base tables".to_string(),
                elapsed: std::time::Duration::from_millis(10),
            },
        );
        assert!(matches!(err, MigrationError::Timeout { .. }));

        let err = with_identity(&migration, MigrationError::NotFound("x".to_string()));
        assert!(matches!(err, MigrationError::Execution { .. }));
        assert!(err.is_not_found());
    }
}
