//! `pgroll rollback` - abandon the in-progress migration.

use pgroll_core::MigrationHistoryRepository;

use crate::cli::RollbackArgs;
use crate::config::Config;
use crate::engine;
use crate::error::{CliError, CliResult};
use crate::output;

/// Run the rollback command.
pub async fn run(config: &Config, args: RollbackArgs) -> CliResult<()> {
    output::header("Rollback migration");

    let pool = engine::connect_pool(config).await?;
    let history = engine::history_repository(&pool, config);
    let current = history
        .current()
        .await?
        .ok_or_else(|| CliError::Validation("no migration is in progress".to_string()))?;

    if current.name != args.name {
        return Err(CliError::Validation(format!(
            "migration \"{}\" is in progress, not \"{}\"",
            current.name, args.name
        )));
    }

    let (_pool, orchestrator) = engine::connect(config).await?;
    orchestrator.rollback().await?;

    output::warn(&format!("\"{}\" rolled back", args.name));
    Ok(())
}
