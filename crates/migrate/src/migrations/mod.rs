//! Migration system
//!
//! - `definitions`: migration, ledger and run types
//! - `registry`: ordered catalog of migrations
//! - `loader`: SQL migration files on disk
//! - `ledger`: persisted record of applied migrations
//! - `runner`: applies and rolls back migrations

pub mod definitions;
pub mod ledger;
pub mod loader;
pub mod registry;
pub mod runner;

pub use definitions::*;
pub use ledger::LedgerStore;
pub use loader::{create_migration, load_migrations, parse_migration_file, split_sql_statements, MigrationFile};
pub use registry::MigrationRegistry;
pub use runner::MigrationRunner;
