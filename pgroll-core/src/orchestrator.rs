//! Migration Orchestrator — drives a migration through its three-phase
//! lifecycle: `Start`, then either `Complete` or `Rollback`.
//!
//! See spec §4.1. The orchestrator is generic over the database executor
//! and history repository so the same lifecycle logic works against any
//! backend that implements [`DbExecutor`]; `pgroll-postgres` supplies the
//! concrete PostgreSQL implementation.

use tracing::{info, warn};

use crate::backfill::BackfillConfig;
use crate::error::{MigrateResult, MigrationError};
use crate::history::{MigrationHistoryRepository, MigrationStatus};
use crate::migration::Migration;
use crate::operations::{self, OperationPlan};
use crate::schema::Schema;
use crate::transform::{IdentityTransformer, SqlTransformer};

/// Executes DDL/DML against the target database. Implementations decide
/// how statements are grouped into transactions; the orchestrator only
/// tells them which statements must run in isolation (outside any shared
/// transaction) via [`OperationPlan::is_isolated`].
#[async_trait::async_trait]
pub trait DbExecutor: Send + Sync {
    /// Run a batch of statements as a single transactional unit. Used for
    /// DDL that is safe to group (everything that isn't `is_isolated`).
    async fn execute_transactional(&self, statements: &[String]) -> MigrateResult<()>;

    /// Run one statement outside any transaction, for DDL that forbids
    /// transactional wrapping (e.g. `CREATE INDEX CONCURRENTLY`).
    async fn execute_isolated(&self, statement: &str) -> MigrateResult<()>;

    /// Run one backfill batch of at most `batch_size` rows. `cursor` holds
    /// the previous batch's last primary-key tuple (one entry per PK
    /// column), or all-`None` on the first call, when every row is
    /// eligible. Returns the cursor to resume from on the next call, or
    /// `None` once a batch comes back empty and the sweep is complete.
    async fn run_backfill_batch(
        &self,
        sql: &str,
        cursor: &[Option<String>],
        batch_size: i64,
    ) -> MigrateResult<Option<Vec<Option<String>>>>;

    /// Re-derive the current [`Schema`] from the live database via
    /// introspection.
    async fn introspect(&self, schema_name: &str) -> MigrateResult<Schema>;

    /// Create or replace the logical views backing the old and new
    /// schema versions, reflecting the current in-memory [`Schema`].
    async fn refresh_views(&self, schema: &Schema, old_version: &str, new_version: &str) -> MigrateResult<()>;
}

/// Tunables for one orchestrator instance.
#[derive(Clone)]
pub struct MigrationConfig {
    /// Physical schema the engine operates on.
    pub schema_name: String,
    /// Backfill batching/retry tuning.
    pub backfill: BackfillConfig,
    /// SQL transformer applied to every statement before execution.
    pub transformer: std::sync::Arc<dyn SqlTransformer>,
}

impl std::fmt::Debug for MigrationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationConfig")
            .field("schema_name", &self.schema_name)
            .field("backfill", &self.backfill)
            .finish()
    }
}

impl MigrationConfig {
    /// Configuration for `schema_name` with default backfill tuning and
    /// no SQL transformation.
    pub fn new(schema_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            backfill: BackfillConfig::default(),
            transformer: std::sync::Arc::new(IdentityTransformer),
        }
    }

    /// Override the backfill configuration.
    pub fn with_backfill(mut self, backfill: BackfillConfig) -> Self {
        self.backfill = backfill;
        self
    }

    /// Install a custom SQL transformer.
    pub fn with_transformer(mut self, transformer: std::sync::Arc<dyn SqlTransformer>) -> Self {
        self.transformer = transformer;
        self
    }
}

/// The version schema name a migration introduces: `<schema>_<name>`,
/// with whitespace folded to underscores so it is always a valid
/// identifier.
pub fn version_schema_name(migration_name: &str) -> String {
    migration_name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Drives migrations through `Start` → `Complete`/`Rollback`.
pub struct MigrationOrchestrator<H: MigrationHistoryRepository, E: DbExecutor> {
    config: MigrationConfig,
    history: H,
    executor: E,
}

impl<H: MigrationHistoryRepository, E: DbExecutor> MigrationOrchestrator<H, E> {
    /// Build an orchestrator from its dependencies.
    pub fn new(config: MigrationConfig, history: H, executor: E) -> Self {
        Self { config, history, executor }
    }

    /// Begin `migration`: validate it, plan every operation against the
    /// current schema, run each operation's `Start` DDL, and refresh the
    /// old/new version views. Fails if another migration is already
    /// `in_progress`, or if its version schema collides with one already
    /// recorded (spec §9 open question (a)).
    pub async fn start(&self, migration: &Migration) -> MigrateResult<Schema> {
        let _lock = self.history.acquire_lock().await?;

        if let Some(current) = self.history.current().await? {
            return Err(MigrationError::MigrationAlreadyInProgress(current.name));
        }

        let version_schema = migration.version_schema();
        if self.history.version_schema_in_use(&version_schema).await? {
            return Err(MigrationError::InvalidMigration(format!(
                "version schema '{version_schema}' is already in use by a prior migration"
            )));
        }

        let mut schema = self.executor.introspect(&self.config.schema_name).await?;
        let mut plans: Vec<OperationPlan> = Vec::with_capacity(migration.operations.len());
        for spec in &migration.operations {
            let planned = operations::plan(&spec.0, &self.config.schema_name, &mut schema)?;
            plans.push(planned);
        }

        if plans.len() > 1 && plans.iter().any(|p| p.solitary) {
            return Err(MigrationError::InvalidMigration(
                "an operation that must run alone (e.g. raw_sql without on_complete) cannot share a migration with other operations".into(),
            ));
        }

        self.run_plans(&plans, Phase::Start).await?;

        self.run_backfills(migration, &schema).await?;

        self.executor
            .refresh_views(&schema, &self.config.schema_name, &version_schema)
            .await?;

        let document = migration.to_json()?;
        self.history.record_start(&migration.name, &version_schema, &document).await?;
        info!(migration = %migration.name, version_schema = %version_schema, "migration started");

        Ok(schema)
    }

    /// Finalize the in-progress migration: replay its stored document to
    /// rebuild the operation plan, run each operation's `Complete` DDL,
    /// and drop the old version's view.
    pub async fn complete(&self) -> MigrateResult<()> {
        let _lock = self.history.acquire_lock().await?;
        let current = self.history.current().await?.ok_or(MigrationError::NoMigrationInProgress)?;
        if current.status != MigrationStatus::InProgress {
            return Err(MigrationError::NoMigrationInProgress);
        }

        let migration = Migration::from_json(&current.document)?;
        let mut schema = self.executor.introspect(&self.config.schema_name).await?;
        let mut plans = Vec::with_capacity(migration.operations.len());
        for spec in &migration.operations {
            plans.push(operations::plan(&spec.0, &self.config.schema_name, &mut schema)?);
        }
        self.run_plans(&plans, Phase::Complete).await?;

        self.history.record_complete(&current.name).await?;
        info!(migration = %current.name, "migration completed");
        Ok(())
    }

    /// Abandon the in-progress migration: replay its stored document to
    /// rebuild the operation plan, run each operation's rollback DDL (the
    /// inverse of `Start`), and drop the new version's view.
    pub async fn rollback(&self) -> MigrateResult<()> {
        let _lock = self.history.acquire_lock().await?;
        let current = self.history.current().await?.ok_or(MigrationError::NoMigrationInProgress)?;
        if current.status != MigrationStatus::InProgress {
            return Err(MigrationError::NoMigrationInProgress);
        }

        let migration = Migration::from_json(&current.document)?;
        let mut schema = self.executor.introspect(&self.config.schema_name).await?;
        let mut plans = Vec::with_capacity(migration.operations.len());
        for spec in &migration.operations {
            plans.push(operations::plan(&spec.0, &self.config.schema_name, &mut schema)?);
        }
        // Rollback statements are applied in reverse order, undoing the
        // most recently started operation first.
        plans.reverse();
        self.run_plans(&plans, Phase::Rollback).await?;

        self.history.record_rollback(&current.name).await?;
        warn!(migration = %current.name, "migration rolled back");
        Ok(())
    }

    async fn run_plans(&self, plans: &[OperationPlan], phase: Phase) -> MigrateResult<()> {
        let mut transactional = Vec::new();
        for plan in plans {
            let statements = match phase {
                Phase::Start => &plan.start_up,
                Phase::Complete => &plan.complete_up,
                Phase::Rollback => &plan.start_down,
            };
            if plan.is_isolated {
                for statement in statements {
                    let transformed = self.config.transformer.transform(statement)?;
                    self.executor.execute_isolated(&transformed).await?;
                }
            } else {
                for statement in statements {
                    transactional.push(self.config.transformer.transform(statement)?);
                }
            }
        }
        if !transactional.is_empty() {
            self.executor.execute_transactional(&transactional).await?;
        }
        Ok(())
    }

    async fn run_backfills(&self, migration: &Migration, schema: &Schema) -> MigrateResult<()> {
        for spec in &migration.operations {
            let Some(batch_plan) = operations::backfill_plan_for(&spec.0, &self.config.schema_name, schema)? else {
                continue;
            };
            // No cursor yet: bind every parameter to NULL so the plan's
            // `$1 IS NULL` branch includes every row on the first batch.
            let mut cursor: Vec<Option<String>> = vec![None; batch_plan.cursor_columns.len()];
            loop {
                match self.run_batch_with_retry(&batch_plan.update_sql, &cursor).await? {
                    Some(next_cursor) => cursor = next_cursor,
                    None => break,
                }
            }
        }
        Ok(())
    }

    async fn run_batch_with_retry(&self, sql: &str, cursor: &[Option<String>]) -> MigrateResult<Option<Vec<Option<String>>>> {
        let mut attempt = 0;
        loop {
            match self
                .executor
                .run_backfill_batch(sql, cursor, self.config.backfill.batch_size)
                .await
            {
                Ok(next_cursor) => return Ok(next_cursor),
                Err(MigrationError::Database(msg)) if attempt < self.config.backfill.max_retries => {
                    let delay = self.config.backfill.backoff_delay_ms(attempt);
                    warn!(attempt, delay_ms = delay, error = %msg, "retrying backfill batch");
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Start,
    Complete,
    Rollback,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::OperationSpec;
    use std::sync::Mutex;

    #[test]
    fn version_schema_name_folds_whitespace() {
        assert_eq!(version_schema_name("Add Users Email"), "add_users_email");
        assert_eq!(version_schema_name("fix-bug#42"), "fix_bug_42");
    }

    #[derive(Default)]
    struct MockHistory {
        current: Mutex<Option<MigrationRecord>>,
        completed: Mutex<Vec<String>>,
        rolled_back: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl MigrationHistoryRepository for MockHistory {
        async fn initialize(&self) -> MigrateResult<()> {
            Ok(())
        }

        async fn current(&self) -> MigrateResult<Option<MigrationRecord>> {
            Ok(self.current.lock().unwrap().clone())
        }

        async fn all(&self) -> MigrateResult<Vec<MigrationRecord>> {
            Ok(self.current.lock().unwrap().iter().cloned().collect())
        }

        async fn version_schema_in_use(&self, _version_schema: &str) -> MigrateResult<bool> {
            Ok(false)
        }

        async fn record_start(&self, name: &str, version_schema: &str, document: &str) -> MigrateResult<()> {
            *self.current.lock().unwrap() = Some(MigrationRecord {
                name: name.to_string(),
                version_schema: version_schema.to_string(),
                status: MigrationStatus::InProgress,
                document: document.to_string(),
                started_at: chrono::Utc::now(),
                resolved_at: None,
            });
            Ok(())
        }

        async fn record_complete(&self, name: &str) -> MigrateResult<()> {
            self.completed.lock().unwrap().push(name.to_string());
            *self.current.lock().unwrap() = None;
            Ok(())
        }

        async fn record_rollback(&self, name: &str) -> MigrateResult<()> {
            self.rolled_back.lock().unwrap().push(name.to_string());
            *self.current.lock().unwrap() = None;
            Ok(())
        }

        async fn acquire_lock(&self) -> MigrateResult<crate::history::MigrationLock> {
            Ok(crate::history::MigrationLock::new(1, || {}))
        }
    }

    struct NoopExecutor;

    #[async_trait::async_trait]
    impl DbExecutor for NoopExecutor {
        async fn execute_transactional(&self, _statements: &[String]) -> MigrateResult<()> {
            Ok(())
        }

        async fn execute_isolated(&self, _statement: &str) -> MigrateResult<()> {
            Ok(())
        }

        async fn run_backfill_batch(
            &self,
            _sql: &str,
            _cursor: &[Option<String>],
            _batch_size: i64,
        ) -> MigrateResult<Option<Vec<Option<String>>>> {
            Ok(None)
        }

        async fn introspect(&self, schema_name: &str) -> MigrateResult<Schema> {
            Ok(Schema::new(schema_name))
        }

        async fn refresh_views(&self, _schema: &Schema, _old_version: &str, _new_version: &str) -> MigrateResult<()> {
            Ok(())
        }
    }

    fn sample_migration() -> Migration {
        Migration {
            name: "add users email".into(),
            version_schema: None,
            operations: vec![OperationSpec(crate::migration::Operation::CreateTable(
                crate::migration::CreateTableOp {
                    name: "accounts".into(),
                    columns: vec![crate::migration::ColumnSpec {
                        name: "id".into(),
                        data_type: "bigint".into(),
                        nullable: false,
                        default: None,
                        comment: None,
                        pk: true,
                    }],
                },
            ))],
        }
    }

    #[tokio::test]
    async fn start_then_complete_clears_in_progress_state() {
        let orchestrator = MigrationOrchestrator::new(
            MigrationConfig::new("public"),
            MockHistory::default(),
            NoopExecutor,
        );
        orchestrator.start(&sample_migration()).await.unwrap();
        assert!(orchestrator.history.current().await.unwrap().is_some());

        orchestrator.complete().await.unwrap();
        assert!(orchestrator.history.current().await.unwrap().is_none());
        assert_eq!(orchestrator.history.completed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_start_while_in_progress_is_rejected() {
        let orchestrator = MigrationOrchestrator::new(
            MigrationConfig::new("public"),
            MockHistory::default(),
            NoopExecutor,
        );
        orchestrator.start(&sample_migration()).await.unwrap();
        let err = orchestrator.start(&sample_migration()).await.unwrap_err();
        assert!(matches!(err, MigrationError::MigrationAlreadyInProgress(_)));
    }

    #[tokio::test]
    async fn rollback_clears_in_progress_state() {
        let orchestrator = MigrationOrchestrator::new(
            MigrationConfig::new("public"),
            MockHistory::default(),
            NoopExecutor,
        );
        orchestrator.start(&sample_migration()).await.unwrap();
        orchestrator.rollback().await.unwrap();
        assert!(orchestrator.history.current().await.unwrap().is_none());
        assert_eq!(orchestrator.history.rolled_back.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn raw_sql_without_on_complete_rejects_sharing_a_migration() {
        let orchestrator = MigrationOrchestrator::new(
            MigrationConfig::new("public"),
            MockHistory::default(),
            NoopExecutor,
        );
        let migration = Migration {
            name: "raw plus create".into(),
            version_schema: None,
            operations: vec![
                OperationSpec(crate::migration::Operation::RawSql(crate::migration::RawSqlOp {
                    up: "ANALYZE accounts;".into(),
                    down: None,
                    on_complete: false,
                })),
                OperationSpec(crate::migration::Operation::CreateTable(crate::migration::CreateTableOp {
                    name: "accounts".into(),
                    columns: vec![crate::migration::ColumnSpec {
                        name: "id".into(),
                        data_type: "bigint".into(),
                        nullable: false,
                        default: None,
                        comment: None,
                        pk: true,
                    }],
                })),
            ],
        };
        let err = orchestrator.start(&migration).await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidMigration(_)));
        assert!(orchestrator.history.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn raw_sql_on_complete_defers_ddl_to_complete() {
        let orchestrator = MigrationOrchestrator::new(
            MigrationConfig::new("public"),
            MockHistory::default(),
            NoopExecutor,
        );
        let migration = Migration {
            name: "deferred raw sql".into(),
            version_schema: None,
            operations: vec![OperationSpec(crate::migration::Operation::RawSql(crate::migration::RawSqlOp {
                up: "CREATE TABLE x(id int);".into(),
                down: Some("DROP TABLE x;".into()),
                on_complete: true,
            }))],
        };
        orchestrator.start(&migration).await.unwrap();
        assert!(orchestrator.history.current().await.unwrap().is_some());
        orchestrator.complete().await.unwrap();
        assert!(orchestrator.history.current().await.unwrap().is_none());
    }
}
