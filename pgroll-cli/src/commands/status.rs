//! `pgroll status` - show the current and historical migration state.

use pgroll_core::history::MigrationStatus;
use pgroll_core::MigrationHistoryRepository;

use crate::cli::StatusArgs;
use crate::config::Config;
use crate::engine;
use crate::error::CliResult;
use crate::output;

/// Run the status command.
pub async fn run(config: &Config, args: StatusArgs) -> CliResult<()> {
    output::header("Migration status");

    let pool = engine::connect_pool(config).await?;
    let history = engine::history_repository(&pool, config);

    if args.all {
        let records = history.all().await?;
        if records.is_empty() {
            output::info("no migrations recorded");
            return Ok(());
        }
        for record in records {
            output::section(&record.name);
            output::kv("status", status_label(record.status));
            output::kv("version schema", &record.version_schema);
            output::kv("started", &record.started_at.to_rfc3339());
            if let Some(resolved_at) = record.resolved_at {
                output::kv("resolved", &resolved_at.to_rfc3339());
            }
            output::newline();
        }
    } else {
        match history.current().await? {
            Some(record) => {
                output::kv("name", &record.name);
                output::kv("status", status_label(record.status));
                output::kv("version schema", &record.version_schema);
                output::kv("started", &record.started_at.to_rfc3339());
            }
            None => output::info("no migration is in progress"),
        }
    }

    Ok(())
}

fn status_label(status: MigrationStatus) -> &'static str {
    match status {
        MigrationStatus::InProgress => "in progress",
        MigrationStatus::Complete => "complete",
        MigrationStatus::RolledBack => "rolled back",
    }
}
