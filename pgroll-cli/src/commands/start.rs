//! `pgroll start` - begin a migration: duplicate columns, spawn triggers,
//! run the backfill, and publish its version schema's views.

use crate::cli::StartArgs;
use crate::config::Config;
use crate::engine;
use crate::error::CliResult;
use crate::output;

/// Run the start command.
pub async fn run(config: &Config, args: StartArgs) -> CliResult<()> {
    output::header("Start migration");

    let migration = engine::load_migration(&args.file)?;
    let version_schema = migration.version_schema();
    output::info(&format!(
        "starting \"{}\" (version schema \"{}\")",
        migration.name, version_schema
    ));

    let (_pool, orchestrator) = engine::connect(config).await?;
    orchestrator.start(&migration).await?;

    output::success(&format!(
        "\"{}\" started; clients may now read/write through schema \"{}\"",
        migration.name, version_schema
    ));
    output::list_item("run `pgroll complete` once traffic has drained from the old view");
    output::list_item("run `pgroll rollback` to abandon the migration instead");
    Ok(())
}
