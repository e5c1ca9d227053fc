//! Column Duplicator — builds the DDL that shadows a set of logical
//! columns on an existing table so that both the old and new physical
//! representations exist side by side during a migration.
//!
//! See spec §4.2. The naming rules (`_pgroll_new_<col>`,
//! `_pgroll_dup_<name>`) make the shadow set idempotent and
//! distinguishable from user objects.

use crate::identifiers::{duplication_name, quote_ident, temporary_name};
use crate::schema::{CheckConstraint, Column, Table, UniqueConstraint};

/// One DDL statement produced by the duplicator, paired with the inverse
/// statement that undoes it (used by `Rollback`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicationStatement {
    /// Forward DDL, issued at `Start`.
    pub up: String,
    /// Inverse DDL, issued at `Rollback`.
    pub down: String,
}

/// Build the full set of DDL statements needed to duplicate `columns` on
/// `table`. Order matches spec §4.2: add shadow columns, then mirror check
/// constraints, then mirror unique constraints, then copy comments.
pub fn duplicate_columns(table: &Table, columns: &[&str]) -> Vec<DuplicationStatement> {
    let mut statements = Vec::new();

    for &col_name in columns {
        if let Ok(column) = table.column(col_name) {
            statements.push(add_shadow_column(table, column));
            if let Some(comment) = &column.comment {
                statements.push(copy_comment(table, column, comment));
            }
        }
    }

    for check in table.check_constraints_covering(columns) {
        statements.push(duplicate_check_constraint(table, check, columns));
    }

    for unique in table.unique_constraints_covering(columns) {
        statements.push(duplicate_unique_constraint(table, unique, columns));
    }

    statements
}

fn add_shadow_column(table: &Table, column: &Column) -> DuplicationStatement {
    let shadow = temporary_name(&column.logical_name);
    let mut up = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(&table.physical_name),
        quote_ident(&shadow),
        column.data_type
    );
    if let Some(default) = &column.default {
        up.push_str(&format!(" DEFAULT {}", rewrite_expression(default, &[column.logical_name.as_str()])));
    }
    up.push(';');

    let down = format!(
        "ALTER TABLE {} DROP COLUMN IF EXISTS {};",
        quote_ident(&table.physical_name),
        quote_ident(&shadow)
    );

    DuplicationStatement { up, down }
}

fn copy_comment(table: &Table, column: &Column, comment: &str) -> DuplicationStatement {
    let shadow = temporary_name(&column.logical_name);
    let up = format!(
        "COMMENT ON COLUMN {}.{} IS '{}';",
        quote_ident(&table.physical_name),
        quote_ident(&shadow),
        comment.replace('\'', "''")
    );
    let down = format!(
        "COMMENT ON COLUMN {}.{} IS NULL;",
        quote_ident(&table.physical_name),
        quote_ident(&shadow)
    );
    DuplicationStatement { up, down }
}

fn duplicate_check_constraint(
    table: &Table,
    check: &CheckConstraint,
    duplicated: &[&str],
) -> DuplicationStatement {
    let name = duplication_name(&check.name);
    let expression = rewrite_expression(&check.expression, duplicated);
    let up = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({}) NOT VALID;",
        quote_ident(&table.physical_name),
        quote_ident(&name),
        expression
    );
    let down = format!(
        "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
        quote_ident(&table.physical_name),
        quote_ident(&name)
    );
    DuplicationStatement { up, down }
}

fn duplicate_unique_constraint(
    table: &Table,
    unique: &UniqueConstraint,
    duplicated: &[&str],
) -> DuplicationStatement {
    let name = duplication_name(&unique.name);
    let columns: Vec<String> = unique
        .columns
        .iter()
        .map(|c| {
            if duplicated.contains(&c.as_str()) {
                quote_ident(&temporary_name(c))
            } else {
                quote_ident(c)
            }
        })
        .collect();
    let up = format!(
        "CREATE UNIQUE INDEX CONCURRENTLY {} ON {} ({})",
        quote_ident(&name),
        quote_ident(&table.physical_name),
        columns.join(", ")
    );
    let down = format!("DROP INDEX CONCURRENTLY IF EXISTS {};", quote_ident(&name));
    DuplicationStatement { up, down }
}

/// Rewrite every bare or quoted reference to a duplicated column in `expr`
/// to point at its shadow name; untouched columns remain as literal
/// references, per spec §4.2 rule 2.
pub fn rewrite_expression(expr: &str, duplicated: &[&str]) -> String {
    let mut result = expr.to_string();
    for &col in duplicated {
        let quoted = format!("\"{col}\"");
        let shadow_quoted = format!("\"{}\"", temporary_name(col));
        result = result.replace(&quoted, &shadow_quoted);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CheckConstraint, Column, Table, UniqueConstraint};

    fn sample_table() -> Table {
        let mut table = Table::new("test_table");
        table.columns.insert("age".into(), Column::new("age", "integer"));
        table.columns.insert("city".into(), Column::new("city", "text"));
        table.columns.insert("name".into(), Column::new("name", "text"));
        table.columns.insert("nick".into(), Column::new("nick", "text"));
        table.columns.insert("email".into(), Column::new("email", "text"));
        table.check_constraints.push(CheckConstraint {
            name: "adults".into(),
            expression: "\"age\" > 18".into(),
            not_valid: false,
        });
        table.check_constraints.push(CheckConstraint {
            name: "new_york_adults".into(),
            expression: "\"city\" = 'New York' AND \"age\" > 21".into(),
            not_valid: false,
        });
        table.check_constraints.push(CheckConstraint {
            name: "different_nick".into(),
            expression: "\"name\" != \"nick\"".into(),
            not_valid: false,
        });
        table.unique_constraints.push(UniqueConstraint {
            name: "unique_email".into(),
            columns: vec!["email".into()],
        });
        table.unique_constraints.push(UniqueConstraint {
            name: "unique_name_nick".into(),
            columns: vec!["name".into(), "nick".into()],
        });
        table
    }

    /// Scenario S1 — duplicating `age` mirrors both checks that reference it.
    #[test]
    fn s1_duplicate_check_constraints_on_age() {
        let table = sample_table();
        let statements = duplicate_columns(&table, &["age"]);

        let check_ups: Vec<&str> = statements
            .iter()
            .map(|s| s.up.as_str())
            .filter(|s| s.contains("ADD CONSTRAINT"))
            .collect();

        assert!(check_ups.contains(&"ALTER TABLE \"test_table\" ADD CONSTRAINT \"_pgroll_dup_adults\" CHECK (\"_pgroll_new_age\" > 18) NOT VALID;"));
        assert!(check_ups.contains(&"ALTER TABLE \"test_table\" ADD CONSTRAINT \"_pgroll_dup_new_york_adults\" CHECK (\"city\" = 'New York' AND \"_pgroll_new_age\" > 21) NOT VALID;"));
        // different_nick does not reference age and must not be mirrored.
        assert!(!check_ups.iter().any(|s| s.contains("different_nick")));
    }

    /// Scenario S1 continued — duplicating {name, nick} together rewrites both references.
    #[test]
    fn s1_duplicate_check_constraints_on_name_and_nick() {
        let table = sample_table();
        let statements = duplicate_columns(&table, &["name", "nick"]);
        let check_up = statements
            .iter()
            .map(|s| s.up.as_str())
            .find(|s| s.contains("different_nick"))
            .expect("different_nick constraint mirrored");
        assert_eq!(
            check_up,
            "ALTER TABLE \"test_table\" ADD CONSTRAINT \"_pgroll_dup_different_nick\" CHECK (\"_pgroll_new_name\" != \"_pgroll_new_nick\") NOT VALID;"
        );
    }

    /// Scenario S2 — duplicating `name` alone mirrors the composite unique
    /// constraint with only `name` rewritten to its shadow form.
    #[test]
    fn s2_duplicate_unique_constraint() {
        let table = sample_table();
        let statements = duplicate_columns(&table, &["name"]);
        let index_up = statements
            .iter()
            .map(|s| s.up.as_str())
            .find(|s| s.starts_with("CREATE UNIQUE INDEX"))
            .expect("unique index mirrored");
        assert_eq!(
            index_up,
            "CREATE UNIQUE INDEX CONCURRENTLY \"_pgroll_dup_unique_name_nick\" ON \"test_table\" (\"_pgroll_new_name\", \"nick\")"
        );
    }

    #[test]
    fn shadow_column_preserves_default_rewritten() {
        let mut table = Table::new("accounts");
        table.columns.insert(
            "balance".into(),
            Column::new("balance", "integer").with_default("0"),
        );
        let statements = duplicate_columns(&table, &["balance"]);
        assert_eq!(
            statements[0].up,
            "ALTER TABLE \"accounts\" ADD COLUMN \"_pgroll_new_balance\" integer DEFAULT 0;"
        );
    }

    #[test]
    fn rollback_drops_shadow_column() {
        let table = sample_table();
        let statements = duplicate_columns(&table, &["email"]);
        let col_stmt = &statements[0];
        assert_eq!(
            col_stmt.down,
            "ALTER TABLE \"test_table\" DROP COLUMN IF EXISTS \"_pgroll_new_email\";"
        );
    }
}
