//! Backfill Engine — batched no-op writes that run every existing row
//! through the synchronization triggers so old and new columns converge.
//!
//! See spec §4.4. This module only plans the work: it builds the SQL for
//! one batch and the keyset cursor to advance, and carries the retry
//! policy. Execution against a live connection lives in the concrete
//! executor crate, which loops `cursor = run_batch(cursor)` until a batch
//! comes back empty.

use crate::error::{MigrateResult, MigrationError};
use crate::identifiers::{quote_ident, quote_qualified};
use crate::schema::Table;

/// Tuning knobs for the backfill sweep. Exposed on the caller's migration
/// configuration rather than in the migration document itself, since batch
/// size and retry behavior are deployment concerns, not migration
/// semantics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackfillConfig {
    /// Rows touched per batch.
    pub batch_size: i64,
    /// Maximum retry attempts for a batch that fails with a retryable
    /// error (serialization failure or deadlock).
    pub max_retries: u32,
    /// Initial backoff before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Multiplier applied to the backoff after each retry.
    pub backoff_multiplier: f64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_retries: 5,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
        }
    }
}

impl BackfillConfig {
    /// Backoff delay before retry attempt `attempt` (0-indexed), in
    /// milliseconds.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let delay = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        delay.round() as u64
    }
}

/// PostgreSQL SQLSTATE codes the backfill loop retries rather than
/// aborting on: serialization failure and deadlock detected.
pub fn is_retryable_sqlstate(sqlstate: &str) -> bool {
    matches!(sqlstate, "40001" | "40P01")
}

/// The SQL and parameter shape for one backfill batch, plus the statement
/// used to read back the cursor to resume from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    /// No-op `UPDATE ... WHERE pk IN (SELECT ... LIMIT n)` statement.
    /// Takes the previous cursor values as its leading parameters (absent
    /// on the first batch) and the batch size as its final parameter.
    pub update_sql: String,
    /// `RETURNING` clause already embedded in `update_sql`; this is the
    /// ordered list of primary key columns it returns, needed by the
    /// caller to build the next cursor from the last returned row.
    pub cursor_columns: Vec<String>,
}

/// Build the batch plan for `table`. Requires a primary key; callers must
/// check `table.has_primary_key()` (or that the operation is rename-only,
/// which skips backfill entirely) before calling this.
pub fn plan_batch(schema: &str, table: &Table) -> MigrateResult<BatchPlan> {
    if !table.has_primary_key() {
        return Err(MigrationError::BackfillPkRequired(table.name.clone()));
    }

    let qualified_table = quote_qualified(schema, &table.physical_name);
    let pk_cols: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();
    let pk_tuple = format!("({})", pk_cols.join(", "));
    let first_pk = &pk_cols[0];

    // Cast each cursor parameter explicitly to its column's type: cursor
    // values cross the wire as text (the engine is type-erased above this
    // layer), and an untyped `$1` compared against a non-text column would
    // otherwise fail to parse on the server.
    let cursor_params: Vec<String> = table
        .primary_key
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let data_type = table.column(col).map(|c| c.data_type.as_str()).unwrap_or("text");
            format!("${}::{data_type}", i + 1)
        })
        .collect();
    // The first batch has no cursor yet; callers signal that by binding
    // every cursor parameter to SQL NULL, so the `$1 IS NULL` branch below
    // includes every row instead of filtering by a nonexistent previous key.
    let cursor_predicate = format!(
        "WHERE $1::{first_type} IS NULL OR {pk_tuple} > ({})",
        cursor_params.join(", "),
        first_type = table.column(&table.primary_key[0]).map(|c| c.data_type.as_str()).unwrap_or("text"),
    );
    let limit_param = pk_cols.len() + 1;

    let update_sql = format!(
        "UPDATE {qualified_table} SET {first_pk} = {first_pk} WHERE {pk_tuple} IN (\n\
         \x20 SELECT {pk_list} FROM {qualified_table}\n\
         \x20 {cursor_predicate}\n\
         \x20 ORDER BY {pk_list}\n\
         \x20 LIMIT ${limit_param}\n\
         ) RETURNING {pk_list};",
        pk_list = pk_cols.join(", "),
    );

    Ok(BatchPlan {
        update_sql,
        cursor_columns: table.primary_key.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn table_with_pk() -> Table {
        let mut table = Table::new("users");
        table.columns.insert("id".into(), Column::new("id", "bigint"));
        table.primary_key = vec!["id".into()];
        table
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = BackfillConfig::default();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let config = BackfillConfig::default();
        assert_eq!(config.backoff_delay_ms(0), 100);
        assert_eq!(config.backoff_delay_ms(1), 200);
        assert_eq!(config.backoff_delay_ms(2), 400);
    }

    #[test]
    fn retryable_sqlstates_are_serialization_and_deadlock() {
        assert!(is_retryable_sqlstate("40001"));
        assert!(is_retryable_sqlstate("40P01"));
        assert!(!is_retryable_sqlstate("23505"));
    }

    #[test]
    fn plan_requires_primary_key() {
        let table = Table::new("no_pk");
        let err = plan_batch("public", &table).unwrap_err();
        assert!(matches!(err, MigrationError::BackfillPkRequired(_)));
    }

    #[test]
    fn plan_uses_keyset_pagination_over_primary_key() {
        let table = table_with_pk();
        let plan = plan_batch("public", &table).unwrap();
        assert!(plan.update_sql.contains("WHERE (\"id\") IN"));
        assert!(plan.update_sql.contains("$1::bigint IS NULL OR (\"id\") > ($1::bigint)"));
        assert!(plan.update_sql.contains("LIMIT $2"));
        assert_eq!(plan.cursor_columns, vec!["id".to_string()]);
    }

    #[test]
    fn plan_supports_composite_primary_keys() {
        let mut table = Table::new("memberships");
        table.columns.insert("org_id".into(), Column::new("org_id", "bigint"));
        table.columns.insert("user_id".into(), Column::new("user_id", "bigint"));
        table.primary_key = vec!["org_id".into(), "user_id".into()];
        let plan = plan_batch("public", &table).unwrap();
        assert!(plan.update_sql.contains("(\"org_id\", \"user_id\") > ($1::bigint, $2::bigint)"));
        assert!(plan.update_sql.contains("LIMIT $3"));
    }
}
