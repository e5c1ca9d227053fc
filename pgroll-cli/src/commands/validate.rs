//! `pgroll validate` - check a migration file without touching the database.

use pgroll_core::operations;

use crate::cli::ValidateArgs;
use crate::config::Config;
use crate::engine;
use crate::error::CliResult;
use crate::output;

/// Run the validate command.
pub async fn run(config: &Config, args: ValidateArgs) -> CliResult<()> {
    output::header("Validate migration");

    let migration = engine::load_migration(&args.file)?;
    output::info(&format!("loaded migration \"{}\"", migration.name));

    let pool = engine::connect_pool(config).await?;
    let conn = pool.get().await?;
    let mut schema = pgroll_postgres::introspect_schema(&conn, &config.database.schema).await?;

    for spec in &migration.operations {
        operations::plan(&spec.0, &config.database.schema, &mut schema)?;
    }

    output::success(&format!(
        "\"{}\" is valid against schema \"{}\" ({} operation(s))",
        migration.name,
        config.database.schema,
        migration.operations.len()
    ));
    Ok(())
}
