//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Zero-downtime schema migrations for PostgreSQL.
#[derive(Parser, Debug)]
#[command(name = "pgroll")]
#[command(version)]
#[command(about = "Zero-downtime schema migrations for PostgreSQL", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the config file.
    #[arg(long, global = true, default_value = "pgroll.toml")]
    pub config: PathBuf,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the internal migrations history table.
    Init(InitArgs),

    /// Validate a migration file without touching the database.
    Validate(ValidateArgs),

    /// Begin a migration: duplicate columns, spawn triggers, run the backfill.
    Start(StartArgs),

    /// Finalize the in-progress migration, dropping the old schema's artefacts.
    Complete(CompleteArgs),

    /// Abandon the in-progress migration, reversing everything `start` did.
    Rollback(RollbackArgs),

    /// Show the current and historical migration state.
    Status(StatusArgs),
}

/// Arguments for the `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Recreate the migrations history table even if it already exists.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the migration file (JSON or YAML).
    pub file: PathBuf,
}

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Path to the migration file (JSON or YAML).
    pub file: PathBuf,
}

/// Arguments for the `complete` command.
#[derive(Args, Debug)]
pub struct CompleteArgs {
    /// Name of the in-progress migration to finalize.
    pub name: String,
}

/// Arguments for the `rollback` command.
#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Name of the in-progress migration to abandon.
    pub name: String,
}

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show every migration on record, not just the one in progress.
    #[arg(long)]
    pub all: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn start_requires_a_file_argument() {
        let err = Cli::try_parse_from(["pgroll", "start"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_complete_with_a_migration_name() {
        let cli = Cli::try_parse_from(["pgroll", "complete", "add_email"]).unwrap();
        match cli.command {
            Command::Complete(args) => assert_eq!(args.name, "add_email"),
            other => panic!("expected Complete, got {other:?}"),
        }
    }
}
