//! Concrete [`DbExecutor`] backed by a PostgreSQL connection pool.
//!
//! Transactional statements run together in one transaction so a failure
//! midway leaves no partial DDL behind; isolated statements (`CREATE INDEX
//! CONCURRENTLY` and its `DROP` counterpart) run each on their own
//! connection, since PostgreSQL forbids wrapping them in a transaction
//! block.

use pgroll_core::orchestrator::DbExecutor;
use pgroll_core::schema::Schema;
use pgroll_core::MigrateResult;

use crate::concurrent_index::{create_index_concurrently, ConcurrentIndexConfig};
use crate::error::PgError;
use crate::introspect::introspect_schema;
use crate::pool::PgPool;
use crate::row::PgRow;

fn conv(err: PgError) -> pgroll_core::MigrationError {
    err.into()
}

/// Executes migration DDL/DML against a live PostgreSQL database via a
/// connection pool.
pub struct PgExecutor {
    pool: PgPool,
    concurrent_index: ConcurrentIndexConfig,
}

impl PgExecutor {
    /// Build an executor over `pool` using the default concurrent-index
    /// retry policy.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            concurrent_index: ConcurrentIndexConfig::default(),
        }
    }

    /// Override the concurrent-index build/verify retry policy.
    pub fn with_concurrent_index_config(mut self, config: ConcurrentIndexConfig) -> Self {
        self.concurrent_index = config;
        self
    }
}

#[async_trait::async_trait]
impl DbExecutor for PgExecutor {
    async fn execute_transactional(&self, statements: &[String]) -> MigrateResult<()> {
        if statements.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await.map_err(conv)?;
        let txn = conn.transaction().await.map_err(conv)?;
        for statement in statements {
            txn.execute(statement, &[]).await.map_err(conv)?;
        }
        txn.commit().await.map_err(conv)?;
        Ok(())
    }

    async fn execute_isolated(&self, statement: &str) -> MigrateResult<()> {
        let conn = self.pool.get().await.map_err(conv)?;
        let upper = statement.to_ascii_uppercase();
        if upper.contains("CREATE") && upper.contains("CONCURRENTLY") {
            let index_name = extract_concurrently_target(statement)
                .ok_or_else(|| pgroll_core::MigrationError::other("could not determine index name from isolated statement"))?;
            create_index_concurrently(&conn, statement, &index_name, &self.concurrent_index)
                .await
                .map_err(conv)?;
        } else {
            conn.batch_execute(statement).await.map_err(conv)?;
        }
        Ok(())
    }

    async fn run_backfill_batch(
        &self,
        sql: &str,
        cursor: &[Option<String>],
        batch_size: i64,
    ) -> MigrateResult<Option<Vec<Option<String>>>> {
        let conn = self.pool.get().await.map_err(conv)?;
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::with_capacity(cursor.len() + 1);
        for value in cursor {
            params.push(value);
        }
        params.push(&batch_size);

        let rows = conn.query(sql, &params).await.map_err(conv)?;
        if rows.is_empty() {
            return Ok(None);
        }
        let last = rows.last().expect("checked non-empty above");
        let mut next_cursor = Vec::with_capacity(last.columns().len());
        for column in last.columns() {
            let value: Option<String> = last.get_opt(column.name()).map_err(conv)?;
            next_cursor.push(value);
        }
        Ok(Some(next_cursor))
    }

    async fn introspect(&self, schema_name: &str) -> MigrateResult<Schema> {
        let conn = self.pool.get().await.map_err(conv)?;
        introspect_schema(&conn, schema_name).await
    }

    async fn refresh_views(&self, schema: &Schema, physical_schema: &str, version_schema: &str) -> MigrateResult<()> {
        let conn = self.pool.get().await.map_err(conv)?;
        conn.batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS \"{version_schema}\""))
            .await
            .map_err(conv)?;

        for table in schema.tables.values() {
            if table.dropped {
                continue;
            }
            let columns: Vec<String> = table
                .columns
                .values()
                .map(|col| format!("\"{}\" AS \"{}\"", col.physical_name, col.logical_name))
                .collect();
            if columns.is_empty() {
                continue;
            }
            let ddl = format!(
                "CREATE OR REPLACE VIEW \"{version_schema}\".\"{table_name}\" AS SELECT {columns} FROM \"{physical_schema}\".\"{physical_table}\"",
                table_name = table.name,
                columns = columns.join(", "),
                physical_table = table.physical_name,
            );
            conn.batch_execute(&ddl).await.map_err(conv)?;
        }
        Ok(())
    }
}

/// Pull the identifier immediately following `CONCURRENTLY` out of a
/// `CREATE [UNIQUE] INDEX CONCURRENTLY "name" ...` statement.
fn extract_concurrently_target(statement: &str) -> Option<String> {
    let marker = "CONCURRENTLY ";
    let pos = statement.find(marker)?;
    let rest = &statement[pos + marker.len()..];
    let rest = rest.trim_start();
    if !rest.starts_with('"') {
        return None;
    }
    let bytes = rest.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'"' {
                i += 2;
                continue;
            }
            break;
        }
        i += 1;
    }
    Some(rest[1..i].replace("\"\"", "\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_index_name_from_create_concurrently_statement() {
        let sql = "CREATE INDEX CONCURRENTLY \"idx_users_email\" ON \"public\".\"users\" (\"email\");";
        assert_eq!(extract_concurrently_target(sql).as_deref(), Some("idx_users_email"));
    }

    #[test]
    fn extracts_index_name_with_unique_keyword() {
        let sql = "CREATE UNIQUE INDEX CONCURRENTLY \"idx_users_email_unique\" ON \"public\".\"users\" (\"email\");";
        assert_eq!(extract_concurrently_target(sql).as_deref(), Some("idx_users_email_unique"));
    }

    #[test]
    fn returns_none_without_a_concurrently_clause() {
        assert_eq!(extract_concurrently_target("DROP TABLE \"users\";"), None);
    }
}
