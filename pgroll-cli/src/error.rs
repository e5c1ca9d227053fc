//! CLI error types and result alias.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types. Each carries a `miette` diagnostic code so failures
/// print as a structured, colorized report.
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error (reading a migration file, writing config, etc).
    #[error("IO error: {0}")]
    #[diagnostic(code(pgroll::io))]
    Io(#[from] std::io::Error),

    /// Configuration error: missing/invalid `pgroll.toml` or environment.
    #[error("configuration error: {0}")]
    #[diagnostic(code(pgroll::config))]
    Config(String),

    /// A migration document failed validation, or a command argument did
    /// not match the current engine state (e.g. `complete` given the
    /// wrong migration name).
    #[error("validation error: {0}")]
    #[diagnostic(code(pgroll::validation))]
    Validation(String),

    /// Error surfaced by the core migration engine.
    #[error("migration error: {0}")]
    #[diagnostic(code(pgroll::migration))]
    Migration(#[from] pgroll_core::MigrationError),

    /// Error surfaced by the PostgreSQL backend.
    #[error("database error: {0}")]
    #[diagnostic(code(pgroll::database))]
    Database(#[from] pgroll_postgres::PgError),

    /// Malformed command invocation not already caught by clap.
    #[error("command error: {0}")]
    #[diagnostic(code(pgroll::command))]
    Command(String),
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("failed to parse TOML: {err}"))
    }
}

impl From<toml::ser::Error> for CliError {
    fn from(err: toml::ser::Error) -> Self {
        CliError::Config(format!("failed to serialize TOML: {err}"))
    }
}
