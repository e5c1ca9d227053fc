//! `CREATE [UNIQUE] INDEX CONCURRENTLY` retry loop.
//!
//! A concurrent index build can be aborted by a conflicting lock or a
//! constraint violation encountered mid-scan, in which case PostgreSQL
//! leaves an `INVALID` index behind rather than rolling the DDL back (it
//! cannot, since it never ran in a transaction). The loop here detects
//! that, drops the wreckage, and retries.

use std::time::Duration;

use crate::connection::PgConnection;
use crate::error::{PgError, PgResult};
use crate::row::PgRow;

/// Tuning for the build-and-verify retry loop.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrentIndexConfig {
    /// Maximum number of create-then-verify attempts.
    pub max_attempts: u32,
    /// Delay between progress polls, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for ConcurrentIndexConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            poll_interval_ms: 500,
        }
    }
}

/// Run `create_sql` (a `CREATE [UNIQUE] INDEX CONCURRENTLY ...` statement),
/// wait for the build to finish, and verify `index_name` came out valid.
/// On an invalid build, drops the index and retries up to
/// `config.max_attempts` times.
pub async fn create_index_concurrently(
    conn: &PgConnection,
    create_sql: &str,
    index_name: &str,
    config: &ConcurrentIndexConfig,
) -> PgResult<()> {
    for attempt in 0..config.max_attempts {
        conn.batch_execute(create_sql).await?;
        wait_until_build_idle(conn, index_name, config.poll_interval_ms).await?;

        if index_is_valid(conn, index_name).await? {
            return Ok(());
        }

        tracing::warn!(index = %index_name, attempt, "concurrent index build left an invalid index, retrying");
        conn.batch_execute(&format!("DROP INDEX IF EXISTS \"{index_name}\"")).await?;
    }

    Err(PgError::query(format!(
        "failed to build a valid index '{index_name}' after {} attempts",
        config.max_attempts
    )))
}

async fn wait_until_build_idle(conn: &PgConnection, index_name: &str, poll_interval_ms: u64) -> PgResult<()> {
    loop {
        let in_progress = conn
            .query_opt(
                "SELECT 1 FROM pg_stat_progress_create_index p \
                 JOIN pg_class c ON c.oid = p.index_relid \
                 WHERE c.relname = $1",
                &[&index_name.to_string()],
            )
            .await?;
        if in_progress.is_none() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
    }
}

async fn index_is_valid(conn: &PgConnection, index_name: &str) -> PgResult<bool> {
    let row = conn
        .query_opt(
            "SELECT i.indisvalid AS valid FROM pg_index i \
             JOIN pg_class c ON c.oid = i.indexrelid \
             WHERE c.relname = $1",
            &[&index_name.to_string()],
        )
        .await?;
    match row {
        Some(row) => row.get_value("valid"),
        // The index was never created at all (e.g. CONCURRENTLY aborted
        // before pg_class got an entry) — treat as invalid, not an error.
        None => Ok(false),
    }
}
