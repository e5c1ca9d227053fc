//! PostgreSQL-backed [`MigrationHistoryRepository`]: one row per migration
//! in a table under a configurable internal schema, plus session-level
//! advisory locking to serialize `Start`/`Complete`/`Rollback` across
//! concurrent callers.

use chrono::{DateTime, Utc};
use pgroll_core::history::{advisory_lock_key, MigrationHistoryRepository, MigrationLock, MigrationRecord, MigrationStatus};
use pgroll_core::MigrateResult;
use tracing::{debug, warn};

use crate::error::PgError;
use crate::pool::PgPool;
use crate::row::PgRow;

fn conv(err: PgError) -> pgroll_core::MigrationError {
    err.into()
}

fn status_to_str(status: MigrationStatus) -> &'static str {
    match status {
        MigrationStatus::InProgress => "in_progress",
        MigrationStatus::Complete => "complete",
        MigrationStatus::RolledBack => "rolled_back",
    }
}

fn status_from_str(value: &str) -> pgroll_core::MigrateResult<MigrationStatus> {
    match value {
        "in_progress" => Ok(MigrationStatus::InProgress),
        "complete" => Ok(MigrationStatus::Complete),
        "rolled_back" => Ok(MigrationStatus::RolledBack),
        other => Err(pgroll_core::MigrationError::other(format!("unrecognized migration status '{other}'"))),
    }
}

/// Repository backed by a `<internal_schema>.migrations` table. The table
/// is created lazily by [`initialize`](Self::initialize), which callers
/// run once before issuing any other call.
pub struct PgHistoryRepository {
    pool: PgPool,
    internal_schema: String,
    lock_key: i64,
}

impl PgHistoryRepository {
    /// Track history for `schema_name` using `internal_schema` (`pgroll`
    /// by convention) to hold the migrations table. The advisory lock key
    /// is derived from `schema_name`, so repositories for different target
    /// schemas never contend with one another.
    pub fn new(pool: PgPool, internal_schema: impl Into<String>, schema_name: &str) -> Self {
        Self {
            pool,
            internal_schema: internal_schema.into(),
            lock_key: advisory_lock_key(schema_name),
        }
    }

    fn table(&self) -> String {
        format!("\"{}\".\"migrations\"", self.internal_schema)
    }

    fn record_from_row(row: &tokio_postgres::Row) -> MigrateResult<MigrationRecord> {
        let status: String = row.get_value("status").map_err(conv)?;
        Ok(MigrationRecord {
            name: row.get_value("name").map_err(conv)?,
            version_schema: row.get_value("version_schema").map_err(conv)?,
            status: status_from_str(&status)?,
            document: row.get_value("document").map_err(conv)?,
            started_at: row.get_value::<DateTime<Utc>>("started_at").map_err(conv)?,
            resolved_at: row.get_opt::<DateTime<Utc>>("resolved_at").map_err(conv)?,
        })
    }
}

#[async_trait::async_trait]
impl MigrationHistoryRepository for PgHistoryRepository {
    async fn initialize(&self) -> MigrateResult<()> {
        let conn = self.pool.get().await.map_err(conv)?;
        conn.batch_execute(&format!(
            "CREATE SCHEMA IF NOT EXISTS \"{schema}\"; \
             CREATE TABLE IF NOT EXISTS {table} ( \
               name text PRIMARY KEY, \
               version_schema text NOT NULL, \
               status text NOT NULL, \
               document text NOT NULL, \
               started_at timestamptz NOT NULL DEFAULT now(), \
               resolved_at timestamptz \
             );",
            schema = self.internal_schema,
            table = self.table(),
        ))
        .await
        .map_err(conv)?;
        Ok(())
    }

    async fn current(&self) -> MigrateResult<Option<MigrationRecord>> {
        let conn = self.pool.get().await.map_err(conv)?;
        let row = conn
            .query_opt(
                &format!("SELECT * FROM {} WHERE status = 'in_progress' LIMIT 1", self.table()),
                &[],
            )
            .await
            .map_err(conv)?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn all(&self) -> MigrateResult<Vec<MigrationRecord>> {
        let conn = self.pool.get().await.map_err(conv)?;
        let rows = conn
            .query(&format!("SELECT * FROM {} ORDER BY started_at DESC", self.table()), &[])
            .await
            .map_err(conv)?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn version_schema_in_use(&self, version_schema: &str) -> MigrateResult<bool> {
        let conn = self.pool.get().await.map_err(conv)?;
        let row = conn
            .query_opt(
                &format!("SELECT 1 FROM {} WHERE version_schema = $1", self.table()),
                &[&version_schema.to_string()],
            )
            .await
            .map_err(conv)?;
        Ok(row.is_some())
    }

    async fn record_start(&self, name: &str, version_schema: &str, document: &str) -> MigrateResult<()> {
        let conn = self.pool.get().await.map_err(conv)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (name, version_schema, status, document) VALUES ($1, $2, $3, $4)",
                self.table()
            ),
            &[
                &name.to_string(),
                &version_schema.to_string(),
                &status_to_str(MigrationStatus::InProgress).to_string(),
                &document.to_string(),
            ],
        )
        .await
        .map_err(conv)?;
        Ok(())
    }

    async fn record_complete(&self, name: &str) -> MigrateResult<()> {
        let conn = self.pool.get().await.map_err(conv)?;
        conn.execute(
            &format!("UPDATE {} SET status = $1, resolved_at = now() WHERE name = $2", self.table()),
            &[&status_to_str(MigrationStatus::Complete).to_string(), &name.to_string()],
        )
        .await
        .map_err(conv)?;
        Ok(())
    }

    async fn record_rollback(&self, name: &str) -> MigrateResult<()> {
        let conn = self.pool.get().await.map_err(conv)?;
        conn.execute(
            &format!("UPDATE {} SET status = $1, resolved_at = now() WHERE name = $2", self.table()),
            &[&status_to_str(MigrationStatus::RolledBack).to_string(), &name.to_string()],
        )
        .await
        .map_err(conv)?;
        Ok(())
    }

    async fn acquire_lock(&self) -> MigrateResult<MigrationLock> {
        let conn = self.pool.get().await.map_err(conv)?;
        conn.execute("SELECT pg_advisory_lock($1)", &[&self.lock_key])
            .await
            .map_err(conv)?;

        let lock_key = self.lock_key;
        debug!(lock_key, "acquired migration advisory lock");
        // pg_advisory_unlock must run on the same session that acquired the
        // lock, so the connection stays checked out (not returned to the
        // pool) until the release task runs. MigrationLock's release
        // callback is synchronous, so unlocking is handed to a detached
        // task that owns the connection for its remaining lifetime.
        let release = move || {
            tokio::spawn(async move {
                if let Err(err) = conn.execute("SELECT pg_advisory_unlock($1)", &[&lock_key]).await {
                    warn!(lock_key, error = %err, "failed to release migration advisory lock");
                }
            });
        };
        Ok(MigrationLock::new(lock_key, release))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_text_encoding() {
        for status in [MigrationStatus::InProgress, MigrationStatus::Complete, MigrationStatus::RolledBack] {
            assert_eq!(status_from_str(status_to_str(status)).unwrap(), status);
        }
    }

    #[test]
    fn status_from_str_rejects_unknown_values() {
        assert!(status_from_str("bogus").is_err());
    }
}
