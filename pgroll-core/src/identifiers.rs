//! Naming helpers for engine-generated identifiers.
//!
//! Every identifier the engine invents is prefixed `_pgroll_` and must
//! respect PostgreSQL's 63-byte identifier limit (see spec invariant 5).

use crate::error::{MigrateResult, MigrationError};

/// Max length of a PostgreSQL identifier, in bytes.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Prefix shared by every engine-generated identifier.
pub const ENGINE_PREFIX: &str = "_pgroll_";

/// Physical name of the shadow column created for `col` while it is being
/// migrated: `_pgroll_new_<col>`.
pub fn temporary_name(col: &str) -> String {
    format!("_pgroll_new_{col}")
}

/// Name of a duplicated constraint or index: `_pgroll_dup_<name>`.
pub fn duplication_name(name: &str) -> String {
    format!("_pgroll_dup_{name}")
}

/// Shared template for both the trigger and its backing function:
/// `_pgroll_trigger_<table>_<col>`.
pub fn trigger_name(table: &str, col: &str) -> String {
    format!("_pgroll_trigger_{table}_{col}")
}

/// Alias of [`trigger_name`] — trigger and trigger function share one name
/// in this engine, exactly as spec.md §4.3 requires.
pub fn trigger_function_name(table: &str, col: &str) -> String {
    trigger_name(table, col)
}

/// Validate that a user- or engine-supplied identifier fits within
/// PostgreSQL's limit. Called at Validate time so overlong identifiers are
/// rejected before any DDL is issued.
pub fn check_identifier_length(name: &str) -> MigrateResult<()> {
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrationError::InvalidIdentifierLength(name.to_string()));
    }
    Ok(())
}

/// Double-quote a PostgreSQL identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a PostgreSQL string literal, escaping embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Qualify a table name with a schema, quoting both parts.
pub fn quote_qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_and_duplication_names() {
        assert_eq!(temporary_name("age"), "_pgroll_new_age");
        assert_eq!(duplication_name("adults"), "_pgroll_dup_adults");
    }

    #[test]
    fn trigger_names_share_template() {
        assert_eq!(trigger_name("users", "email"), "_pgroll_trigger_users_email");
        assert_eq!(
            trigger_function_name("users", "email"),
            trigger_name("users", "email")
        );
    }

    #[test]
    fn rejects_overlong_identifiers() {
        let long = "a".repeat(64);
        assert!(check_identifier_length(&long).is_err());
        assert!(check_identifier_length("short_name").is_ok());
    }

    #[test]
    fn quoting_escapes_embedded_characters() {
        assert_eq!(quote_ident("has\"quote"), "\"has\"\"quote\"");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
        assert_eq!(quote_qualified("pgroll", "migrations"), "\"pgroll\".\"migrations\"");
    }
}
