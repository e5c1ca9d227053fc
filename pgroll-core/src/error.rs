//! Error types for the migration engine.

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur while validating, starting, completing or rolling
/// back a migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Referenced table does not exist in the schema model.
    #[error("table '{0}' does not exist")]
    TableDoesNotExist(String),

    /// Referenced column does not exist on a table.
    #[error("column '{column}' does not exist on table '{table}'")]
    ColumnDoesNotExist {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A constraint with this name already exists.
    #[error("constraint '{0}' already exists")]
    ConstraintAlreadyExists(String),

    /// Referenced constraint does not exist.
    #[error("constraint '{0}' does not exist")]
    ConstraintDoesNotExist(String),

    /// A required field was omitted from an operation.
    #[error("field '{field}' is required for operation '{op}'")]
    FieldRequired {
        /// Operation kind.
        op: String,
        /// Missing field name.
        field: String,
    },

    /// A generated or user-supplied identifier exceeds PostgreSQL's 63-byte limit.
    #[error("identifier '{0}' exceeds the 63-byte PostgreSQL identifier limit")]
    InvalidIdentifierLength(String),

    /// The migration document itself is structurally invalid.
    #[error("invalid migration: {0}")]
    InvalidMigration(String),

    /// `up` SQL was supplied where the operation forbids it.
    #[error("operation '{0}' does not accept 'up' SQL")]
    NoUpSqlAllowed(String),

    /// `down` SQL was supplied where the operation forbids it.
    #[error("operation '{0}' does not accept 'down' SQL")]
    NoDownSqlAllowed(String),

    /// A column change requires an explicit migration (up/down SQL) that was not given.
    #[error("column '{0}' requires an explicit up/down migration")]
    ColumnMigrationMissing(String),

    /// A column change supplies a migration where none is needed (pure rename).
    #[error("column '{0}' does not need a migration for a pure rename")]
    ColumnMigrationRedundant(String),

    /// An invalid `ON DELETE` behavior was requested for a foreign key.
    #[error("invalid ON DELETE setting '{0}'")]
    InvalidOnDeleteSetting(String),

    /// Backfill was requested on a table without a primary key.
    #[error("table '{0}' has no primary key; backfill requires one")]
    BackfillPkRequired(String),

    /// A database constraint was violated while executing DDL/DML.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The database connection lacked the privileges to perform an action.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The operation was cancelled via the caller's cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// A migration is already `in_progress`; only one may run at a time.
    #[error("migration '{0}' is already in progress")]
    MigrationAlreadyInProgress(String),

    /// `Complete`/`Rollback` was called but no migration is `in_progress`.
    #[error("no migration is in progress")]
    NoMigrationInProgress,

    /// Underlying database error, reported by the concrete executor.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error (migration file loading, config files, etc).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The SQL transformer hook rejected a snippet.
    #[error("SQL transform error: {0}")]
    Transform(String),

    /// General migration error not otherwise categorized.
    #[error("migration error: {0}")]
    Other(String),
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an "other" error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Validation errors are detected before any DDL is issued; this
    /// distinguishes them from execution/state errors for callers that
    /// want to short-circuit before touching the database.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::TableDoesNotExist(_)
                | Self::ColumnDoesNotExist { .. }
                | Self::ConstraintAlreadyExists(_)
                | Self::ConstraintDoesNotExist(_)
                | Self::FieldRequired { .. }
                | Self::InvalidIdentifierLength(_)
                | Self::InvalidMigration(_)
                | Self::NoUpSqlAllowed(_)
                | Self::NoDownSqlAllowed(_)
                | Self::ColumnMigrationMissing(_)
                | Self::ColumnMigrationRedundant(_)
                | Self::InvalidOnDeleteSetting(_)
                | Self::BackfillPkRequired(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_flagged() {
        assert!(MigrationError::BackfillPkRequired("t".into()).is_validation_error());
        assert!(!MigrationError::NoMigrationInProgress.is_validation_error());
        assert!(!MigrationError::database("boom").is_validation_error());
    }

    #[test]
    fn display_includes_identifiers() {
        let err = MigrationError::ColumnDoesNotExist {
            table: "users".into(),
            column: "age".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("users"));
        assert!(msg.contains("age"));
    }
}
