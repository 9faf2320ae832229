//! Migration Registry - Ordered catalog of known migrations
//!
//! Registration order is application order; versions are opaque and never
//! sorted here. Duplicate versions are accepted and reported through
//! [`MigrationRegistry::duplicate_versions`].

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::definitions::{MigrationDefinition, MigrationOperation};
use super::loader::load_migrations;
use crate::error::MigrationResult;

/// Ordered sequence of migration definitions
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    migrations: Vec<MigrationDefinition>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the `*.sql` files in `dir`, ordered by file stem
    pub fn from_dir(dir: impl AsRef<Path>) -> MigrationResult<Self> {
        let mut registry = Self::new();
        for file in load_migrations(dir.as_ref())? {
            registry.push(file.into_definition());
        }
        Ok(registry)
    }

    /// Append a migration
    pub fn register(
        &mut self,
        version: impl Into<String>,
        name: impl Into<String>,
        up: Arc<dyn MigrationOperation>,
        down: Option<Arc<dyn MigrationOperation>>,
    ) -> &mut Self {
        self.push(MigrationDefinition::new(version, name, up, down))
    }

    /// Append a migration built from SQL scripts
    pub fn register_sql(
        &mut self,
        version: impl Into<String>,
        name: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> &mut Self {
        self.push(MigrationDefinition::sql(version, name, up_sql, down_sql))
    }

    pub fn push(&mut self, migration: MigrationDefinition) -> &mut Self {
        self.migrations.push(migration);
        self
    }

    /// All migrations in registration order
    pub fn all(&self) -> std::slice::Iter<'_, MigrationDefinition> {
        self.migrations.iter()
    }

    /// First migration registered under `version`
    pub fn get(&self, version: &str) -> Option<&MigrationDefinition> {
        self.migrations.iter().find(|m| m.version == version)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Versions registered more than once, in order of their second appearance
    pub fn duplicate_versions(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for migration in &self.migrations {
            let version = migration.version.as_str();
            if !seen.insert(version) && !duplicates.contains(&version) {
                duplicates.push(version);
            }
        }
        duplicates
    }
}

impl<'a> IntoIterator for &'a MigrationRegistry {
    type Item = &'a MigrationDefinition;
    type IntoIter = std::slice::Iter<'a, MigrationDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.all()
    }
}
