//! Wiring from CLI [`Config`] to a running [`MigrationOrchestrator`].

use std::path::Path;

use pgroll_core::orchestrator::{MigrationConfig, MigrationOrchestrator};
use pgroll_core::Migration;
use pgroll_postgres::{PgConfig, PgExecutor, PgHistoryRepository, PgPool};

use crate::config::Config;
use crate::error::{CliError, CliResult};

/// Concrete orchestrator type every command runs against.
pub type Orchestrator = MigrationOrchestrator<PgHistoryRepository, PgExecutor>;

/// Connect to the database named by `config` and build an orchestrator
/// over it, along with the raw pool (commands that need ad-hoc queries,
/// e.g. `status`, use the pool directly).
pub async fn connect(config: &Config) -> CliResult<(PgPool, Orchestrator)> {
    let pool = connect_pool(config).await?;
    let history = history_repository(&pool, config);
    let executor = PgExecutor::new(pool.clone());
    let orchestrator_config =
        MigrationConfig::new(config.database.schema.clone()).with_backfill(config.backfill.into());
    let orchestrator = MigrationOrchestrator::new(orchestrator_config, history, executor);

    Ok((pool, orchestrator))
}

/// Open a connection pool to the database named by `config`, without
/// building an orchestrator. Used by commands that only need history
/// queries (`status`) or want to initialize the history table directly
/// (`init`).
pub async fn connect_pool(config: &Config) -> CliResult<PgPool> {
    let pg_config = PgConfig::from_url(config.database_url()?)?;
    Ok(PgPool::new(pg_config).await?)
}

/// Build a history repository over an already-open `pool`.
pub fn history_repository(pool: &PgPool, config: &Config) -> PgHistoryRepository {
    PgHistoryRepository::new(
        pool.clone(),
        config.database.internal_schema.clone(),
        &config.database.schema,
    )
}

/// Parse a migration document, choosing JSON or YAML by file extension
/// (`.yaml`/`.yml` for YAML, anything else for JSON).
pub fn load_migration(path: &Path) -> CliResult<Migration> {
    let content = std::fs::read_to_string(path)?;
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );
    let migration = if is_yaml {
        Migration::from_yaml(&content)
    } else {
        Migration::from_json(&content)
    };
    migration.map_err(CliError::from)
}
