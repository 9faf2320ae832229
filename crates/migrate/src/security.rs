//! Identifier validation
//!
//! The ledger table name is configurable and interpolated into DDL and DML,
//! so it is checked here before any statement is built.

use crate::error::DatabaseError;

/// SQL keywords rejected as table names
static SQL_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "FROM", "WHERE", "JOIN", "UNION", "DROP", "CREATE",
    "ALTER", "GRANT", "REVOKE", "TRUNCATE", "TABLE", "INDEX", "USER", "ORDER", "GROUP",
];

/// Escape a SQL identifier by doubling quotes and wrapping it in double quotes
///
/// ```
/// use quarry_migrate::security::escape_identifier;
///
/// assert_eq!(escape_identifier("schema_migrations"), "\"schema_migrations\"");
/// assert_eq!(escape_identifier("table\"name"), "\"table\"\"name\"");
/// ```
pub fn escape_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Validate that an identifier is safe for use in SQL
pub fn validate_identifier(identifier: &str) -> Result<(), DatabaseError> {
    let Some(first) = identifier.chars().next() else {
        return Err(DatabaseError::Validation("Identifier cannot be empty".to_string()));
    };

    // PostgreSQL truncates identifiers at 63 bytes
    if identifier.len() > 63 {
        return Err(DatabaseError::Validation(format!(
            "Identifier '{}' is too long (max 63 characters)",
            identifier
        )));
    }

    if let Some(c) = identifier.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(DatabaseError::Validation(format!(
            "Identifier '{}' contains invalid character '{}'",
            identifier, c
        )));
    }

    if first.is_ascii_digit() {
        return Err(DatabaseError::Validation(format!(
            "Identifier '{}' cannot start with a number",
            identifier
        )));
    }

    if SQL_KEYWORDS.contains(&identifier.to_uppercase().as_str()) {
        return Err(DatabaseError::Validation(format!(
            "Identifier '{}' is a reserved SQL keyword",
            identifier
        )));
    }

    Ok(())
}
