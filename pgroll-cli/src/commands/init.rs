//! `pgroll init` - create the internal migrations history table.

use pgroll_core::MigrationHistoryRepository;

use crate::cli::InitArgs;
use crate::config::Config;
use crate::engine;
use crate::error::CliResult;
use crate::output;

/// Run the init command.
pub async fn run(config: &Config, args: InitArgs) -> CliResult<()> {
    output::header("Initialize pgroll");

    if args.force {
        output::info("recreating migrations history table if needed");
    }

    let pool = engine::connect_pool(config).await?;
    let history = engine::history_repository(&pool, config);
    history.initialize().await?;

    output::success(&format!(
        "migrations history table ready in schema \"{}\"",
        config.database.internal_schema
    ));
    Ok(())
}
