//! Migration Loader - File system operations for migrations
//!
//! Handles creating, loading, and parsing SQL migration files:
//!
//! ```text
//! migrations/20240101_120000_create_todos.sql
//!
//! -- Migration: create todos
//! -- Up migration
//! CREATE TABLE todos (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
//! -- Down migration
//! DROP TABLE todos;
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

use super::definitions::MigrationDefinition;
use crate::backends::SqlDialect;
use crate::error::{MigrationError, MigrationResult};

/// A migration file parsed from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File stem, used as the migration version
    pub version: String,
    pub name: String,
    pub up_sql: String,
    pub down_sql: String,
    pub path: PathBuf,
}

impl MigrationFile {
    pub fn into_definition(self) -> MigrationDefinition {
        MigrationDefinition::sql(self.version, self.name, self.up_sql, self.down_sql)
    }
}

/// Load all `*.sql` migration files from `dir`, sorted by version
///
/// A missing directory yields no migrations.
pub fn load_migrations(dir: &Path) -> MigrationResult<Vec<MigrationFile>> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "Migrations directory does not exist");
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir)
        .map_err(|e| MigrationError::Load(format!("Failed to read migrations directory {}: {}", dir.display(), e)))?;

    let mut migrations = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| MigrationError::Load(format!("Failed to read directory entry: {}", e)))?
            .path();

        if path.extension().is_some_and(|ext| ext == "sql") {
            migrations.push(parse_migration_file(&path)?);
        }
    }

    migrations.sort_by(|a, b| a.version.cmp(&b.version));
    Ok(migrations)
}

/// Parse a single migration file
pub fn parse_migration_file(path: &Path) -> MigrationResult<MigrationFile> {
    let content = fs::read_to_string(path)
        .map_err(|e| MigrationError::Load(format!("Failed to read migration file {}: {}", path.display(), e)))?;

    let version = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| MigrationError::Load(format!("Invalid migration filename: {}", path.display())))?
        .to_string();

    let name = header_name(&content).unwrap_or_else(|| name_from_version(&version));
    if name.is_empty() {
        return Err(MigrationError::Load(format!(
            "Migration filename must follow format version_name: {}",
            path.display()
        )));
    }

    let (up_sql, down_sql) = parse_migration_content(&content);

    Ok(MigrationFile {
        version,
        name,
        up_sql,
        down_sql,
        path: path.to_path_buf(),
    })
}

/// Extract the `-- Migration: <name>` header, if present
fn header_name(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        line.trim()
            .strip_prefix("-- Migration:")
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    })
}

/// Derive a name from `YYYYMMDD_HHMMSS_name` or `prefix_name`
fn name_from_version(version: &str) -> String {
    let parts: Vec<&str> = version.split('_').collect();
    let words = if parts.len() >= 3 && parts[0].len() == 8 && parts[1].len() == 6 {
        &parts[2..]
    } else if parts.len() >= 2 {
        &parts[1..]
    } else {
        &[][..]
    };
    words.join(" ")
}

/// Split migration content into its Up and Down sections
pub fn parse_migration_content(content: &str) -> (String, String) {
    let mut up_sql = Vec::new();
    let mut down_sql = Vec::new();
    let mut current = None;

    for line in content.lines() {
        let trimmed = line.trim().to_lowercase();

        if let Some(comment) = trimmed.strip_prefix("--").map(str::trim) {
            if let Some(section) = section_marker(comment) {
                current = Some(section);
            }
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        match current {
            Some(Section::Up) => up_sql.push(line),
            Some(Section::Down) => down_sql.push(line),
            None => {}
        }
    }

    (up_sql.join("\n").trim().to_string(), down_sql.join("\n").trim().to_string())
}

#[derive(Clone, Copy)]
enum Section {
    Up,
    Down,
}

/// Recognise `-- up`, `-- Up migration`, `-- down`, `-- Down migration`
fn section_marker(comment: &str) -> Option<Section> {
    let mut words = comment.split_whitespace();
    let section = match words.next()? {
        "up" => Section::Up,
        "down" => Section::Down,
        _ => return None,
    };
    match words.next() {
        None | Some("migration") => Some(section),
        Some(_) => None,
    }
}

/// Split a SQL script into individual statements
///
/// A script the dialect parser rejects comes back as one batch, so bodies
/// such as `CREATE TRIGGER ... BEGIN ...; END;` reach the engine intact.
pub fn split_sql_statements(sql: &str, dialect: SqlDialect) -> Vec<String> {
    let script = sql.trim();
    if script.is_empty() {
        return Vec::new();
    }

    let parser_dialect = dialect.parser_dialect();
    match Parser::parse_sql(parser_dialect.as_ref(), script) {
        Ok(statements) => statements.into_iter().map(|stmt| format!("{};", stmt)).collect(),
        Err(e) => {
            warn!("SQL parsing failed, running the script as a single batch: {}", e);
            vec![script.to_string()]
        }
    }
}

/// Create a new timestamped migration file in `dir` and return its path
pub fn create_migration(dir: &Path, name: &str) -> MigrationResult<PathBuf> {
    let slug = name.trim().replace(' ', "_").to_lowercase();
    if slug.is_empty() {
        return Err(MigrationError::Load("Migration name cannot be empty".to_string()));
    }

    fs::create_dir_all(dir)
        .map_err(|e| MigrationError::Load(format!("Failed to create migrations directory: {}", e)))?;

    let version = format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), slug);
    let path = dir.join(format!("{}.sql", version));
    if path.exists() {
        return Err(MigrationError::Load(format!("Migration file already exists: {}", path.display())));
    }

    fs::write(&path, migration_template(name.trim(), &version))
        .map_err(|e| MigrationError::Load(format!("Failed to write migration file: {}", e)))?;

    Ok(path)
}

fn migration_template(name: &str, version: &str) -> String {
    format!(
        "-- Migration: {}\n\
         -- Version: {}\n\
         -- Created: {}\n\n\
         -- Up migration\n\n\n\
         -- Down migration\n\
         -- Leave empty if this migration cannot be rolled back\n\n",
        name,
        version,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_migration_content() {
        let content = "-- Migration: add indexes\n\
                       -- Up migration\n\
                       -- update statistics once the index exists\n\
                       CREATE INDEX idx_todos_title ON todos (title);\n\
                       -- Down migration\n\
                       DROP INDEX idx_todos_title;\n";

        let (up, down) = parse_migration_content(content);
        assert_eq!(up, "CREATE INDEX idx_todos_title ON todos (title);");
        assert_eq!(down, "DROP INDEX idx_todos_title;");
    }

    #[test]
    fn test_name_from_version() {
        assert_eq!(name_from_version("20240101_120000_create_users"), "create users");
        assert_eq!(name_from_version("001_init"), "init");
        assert_eq!(name_from_version("init"), "");
    }

    #[test]
    fn test_split_sql_statements() {
        let sql = "CREATE TABLE a (id INTEGER);\nCREATE TABLE b (id INTEGER);";
        let statements = split_sql_statements(sql, SqlDialect::SQLite);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE a"));
        assert!(statements[1].ends_with(';'));

        assert!(split_sql_statements("   ", SqlDialect::PostgreSQL).is_empty());
    }

    #[test]
    fn test_split_keeps_unparseable_sql_whole() {
        let statements = split_sql_statements("  FROBNICATE everything; FROBNICATE more\n", SqlDialect::SQLite);
        assert_eq!(statements, vec!["FROBNICATE everything; FROBNICATE more"]);
    }

    #[test]
    fn test_load_migrations_sorted_by_version() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("002_indexes.sql"),
            "-- Migration: add indexes\n-- Up migration\nCREATE INDEX i ON a (id);\n-- Down migration\nDROP INDEX i;",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("001_init.sql"),
            "-- Up migration\nCREATE TABLE a (id INTEGER);\n-- Down migration\n",
        )
        .unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "not a migration").unwrap();

        let migrations = load_migrations(temp_dir.path()).unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].version, "001_init");
        assert_eq!(migrations[0].name, "init");
        assert!(migrations[0].down_sql.is_empty());
        assert_eq!(migrations[1].version, "002_indexes");
        assert_eq!(migrations[1].name, "add indexes");
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let migrations = load_migrations(&temp_dir.path().join("absent")).unwrap();
        assert!(migrations.is_empty());
    }

    #[test]
    fn test_create_migration() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_migration(temp_dir.path(), "create users table").unwrap();

        let filename = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(filename.ends_with("_create_users_table.sql"));

        let parsed = parse_migration_file(&path).unwrap();
        assert_eq!(parsed.name, "create users table");
        assert!(parsed.up_sql.is_empty());
        assert!(parsed.down_sql.is_empty());
    }
}
