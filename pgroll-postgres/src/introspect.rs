//! Schema introspection: translate live `pg_catalog`/`information_schema`
//! state into a [`pgroll_core::Schema`]. Called at the start of every
//! orchestrator phase so planning always sees the true physical state,
//! never a stale cached copy.

use pgroll_core::schema::{CheckConstraint, Column, ForeignKey, Index, OnDelete, Schema, Table, UniqueConstraint};
use pgroll_core::MigrateResult;

use crate::connection::PgConnection;
use crate::error::PgError;
use crate::row::PgRow;

fn conv(err: PgError) -> pgroll_core::MigrationError {
    err.into()
}

/// Introspect every base table in `schema_name` and the columns,
/// constraints, and indexes defined on it.
pub async fn introspect_schema(conn: &PgConnection, schema_name: &str) -> MigrateResult<Schema> {
    let mut schema = Schema::new(schema_name);

    let table_rows = conn
        .query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
            &[&schema_name.to_string()],
        )
        .await
        .map_err(conv)?;

    for row in &table_rows {
        let table_name: String = row.get_value("table_name").map_err(conv)?;
        let mut table = Table::new(&table_name);
        load_columns(conn, schema_name, &mut table).await?;
        load_primary_key(conn, schema_name, &mut table).await?;
        load_unique_constraints(conn, schema_name, &mut table).await?;
        load_check_constraints(conn, schema_name, &mut table).await?;
        load_foreign_keys(conn, schema_name, &mut table).await?;
        load_indexes(conn, schema_name, &mut table).await?;
        schema.tables.insert(table_name, table);
    }

    Ok(schema)
}

async fn load_columns(conn: &PgConnection, schema_name: &str, table: &mut Table) -> MigrateResult<()> {
    let rows = conn
        .query(
            "SELECT column_name, \
                    CASE WHEN data_type = 'ARRAY' THEN udt_name || '[]' ELSE data_type END AS data_type, \
                    is_nullable = 'YES' AS nullable, \
                    column_default, \
                    col_description((quote_ident($1) || '.' || quote_ident($2))::regclass, ordinal_position) AS comment \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
            &[&schema_name.to_string(), &table.name.clone()],
        )
        .await
        .map_err(conv)?;

    for row in &rows {
        let name: String = row.get_value("column_name").map_err(conv)?;
        let data_type: String = row.get_value("data_type").map_err(conv)?;
        let nullable: bool = row.get_value("nullable").map_err(conv)?;
        let default: Option<String> = row.get_opt("column_default").map_err(conv)?;
        let comment: Option<String> = row.get_opt("comment").map_err(conv)?;

        let mut column = Column::new(&name, data_type);
        column.nullable = nullable;
        column.default = default;
        column.comment = comment;
        table.columns.insert(name, column);
    }
    Ok(())
}

async fn load_primary_key(conn: &PgConnection, schema_name: &str, table: &mut Table) -> MigrateResult<()> {
    let rows = conn
        .query(
            "SELECT a.attname::text AS column_name \
             FROM pg_index i \
             JOIN pg_class c ON c.oid = i.indrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord) ON true \
             JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum \
             WHERE n.nspname = $1 AND c.relname = $2 AND i.indisprimary \
             ORDER BY k.ord",
            &[&schema_name.to_string(), &table.name.clone()],
        )
        .await
        .map_err(conv)?;

    table.primary_key = rows
        .iter()
        .map(|row| row.get_value::<String>("column_name").map_err(conv))
        .collect::<MigrateResult<Vec<_>>>()?;
    Ok(())
}

async fn load_unique_constraints(conn: &PgConnection, schema_name: &str, table: &mut Table) -> MigrateResult<()> {
    let rows = conn
        .query(
            "SELECT con.conname::text AS name, \
                    array_agg(a.attname::text ORDER BY k.ord) AS columns \
             FROM pg_constraint con \
             JOIN pg_class c ON c.oid = con.conrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord) ON true \
             JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum \
             WHERE con.contype = 'u' AND n.nspname = $1 AND c.relname = $2 \
             GROUP BY con.conname",
            &[&schema_name.to_string(), &table.name.clone()],
        )
        .await
        .map_err(conv)?;

    for row in &rows {
        let name: String = row.get_value("name").map_err(conv)?;
        let columns: Vec<String> = row.get_value("columns").map_err(conv)?;
        table.unique_constraints.push(UniqueConstraint { name, columns });
    }
    Ok(())
}

async fn load_check_constraints(conn: &PgConnection, schema_name: &str, table: &mut Table) -> MigrateResult<()> {
    let rows = conn
        .query(
            "SELECT con.conname::text AS name, \
                    pg_get_constraintdef(con.oid) AS definition, \
                    con.convalidated AS valid \
             FROM pg_constraint con \
             JOIN pg_class c ON c.oid = con.conrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE con.contype = 'c' AND n.nspname = $1 AND c.relname = $2",
            &[&schema_name.to_string(), &table.name.clone()],
        )
        .await
        .map_err(conv)?;

    for row in &rows {
        let name: String = row.get_value("name").map_err(conv)?;
        let definition: String = row.get_value("definition").map_err(conv)?;
        let valid: bool = row.get_value("valid").map_err(conv)?;
        table.check_constraints.push(CheckConstraint {
            name,
            expression: strip_check_wrapper(&definition),
            not_valid: !valid,
        });
    }
    Ok(())
}

/// `pg_get_constraintdef` renders a check constraint as `CHECK (expr)`;
/// the engine stores the bare boolean expression.
fn strip_check_wrapper(definition: &str) -> String {
    definition
        .strip_prefix("CHECK (")
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(definition)
        .to_string()
}

async fn load_foreign_keys(conn: &PgConnection, schema_name: &str, table: &mut Table) -> MigrateResult<()> {
    let rows = conn
        .query(
            "SELECT tc.constraint_name::text AS name, \
                    kcu.column_name::text AS column_name, \
                    kcu.ordinal_position AS ord, \
                    ccu.table_name::text AS foreign_table, \
                    ccu.column_name::text AS foreign_column, \
                    rc.delete_rule::text AS delete_rule \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON kcu.constraint_name = tc.constraint_name AND kcu.constraint_schema = tc.constraint_schema \
             JOIN information_schema.referential_constraints rc \
               ON rc.constraint_name = tc.constraint_name AND rc.constraint_schema = tc.constraint_schema \
             JOIN information_schema.constraint_column_usage ccu \
               ON ccu.constraint_name = tc.constraint_name AND ccu.constraint_schema = tc.constraint_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND tc.table_name = $2 \
             ORDER BY tc.constraint_name, kcu.ordinal_position",
            &[&schema_name.to_string(), &table.name.clone()],
        )
        .await
        .map_err(conv)?;

    let validity_rows = conn
        .query(
            "SELECT con.conname::text AS name, con.convalidated AS valid \
             FROM pg_constraint con \
             JOIN pg_class c ON c.oid = con.conrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE con.contype = 'f' AND n.nspname = $1 AND c.relname = $2",
            &[&schema_name.to_string(), &table.name.clone()],
        )
        .await
        .map_err(conv)?;
    let mut validity = std::collections::HashMap::new();
    for row in &validity_rows {
        let name: String = row.get_value("name").map_err(conv)?;
        let valid: bool = row.get_value("valid").map_err(conv)?;
        validity.insert(name, valid);
    }

    // Rows arrive grouped by constraint name and ordered by the local
    // column's ordinal position; the foreign column for each row is
    // assumed to occupy the same position in the referenced key, which
    // holds for every foreign key the Operation Catalogue can create.
    let mut by_name: indexmap::IndexMap<String, ForeignKey> = indexmap::IndexMap::new();
    for row in &rows {
        let name: String = row.get_value("name").map_err(conv)?;
        let column_name: String = row.get_value("column_name").map_err(conv)?;
        let foreign_table: String = row.get_value("foreign_table").map_err(conv)?;
        let foreign_column: String = row.get_value("foreign_column").map_err(conv)?;
        let delete_rule: String = row.get_value("delete_rule").map_err(conv)?;

        let entry = by_name.entry(name.clone()).or_insert_with(|| ForeignKey {
            name: name.clone(),
            columns: Vec::new(),
            references_table: foreign_table.clone(),
            references_columns: Vec::new(),
            on_delete: OnDelete::parse(&delete_rule).unwrap_or(OnDelete::NoAction),
            not_valid: !*validity.get(&name).unwrap_or(&true),
        });
        entry.columns.push(column_name);
        entry.references_columns.push(foreign_column);
    }
    table.foreign_keys.extend(by_name.into_values());
    Ok(())
}

async fn load_indexes(conn: &PgConnection, schema_name: &str, table: &mut Table) -> MigrateResult<()> {
    let rows = conn
        .query(
            "SELECT c2.relname::text AS index_name, \
                    am.amname::text AS method, \
                    i.indisunique AS is_unique, \
                    pg_get_expr(i.indpred, i.indrelid) AS predicate, \
                    array_agg(a.attname::text ORDER BY k.ord) AS columns \
             FROM pg_index i \
             JOIN pg_class c2 ON c2.oid = i.indexrelid \
             JOIN pg_class c1 ON c1.oid = i.indrelid \
             JOIN pg_namespace n ON n.oid = c1.relnamespace \
             JOIN pg_am am ON am.oid = c2.relam \
             JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord) ON true \
             JOIN pg_attribute a ON a.attrelid = c1.oid AND a.attnum = k.attnum \
             WHERE n.nspname = $1 AND c1.relname = $2 \
               AND NOT i.indisprimary \
               AND NOT EXISTS (SELECT 1 FROM pg_constraint con WHERE con.conindid = i.indexrelid) \
             GROUP BY c2.relname, am.amname, i.indisunique, i.indpred, i.indrelid",
            &[&schema_name.to_string(), &table.name.clone()],
        )
        .await
        .map_err(conv)?;

    for row in &rows {
        let name: String = row.get_value("index_name").map_err(conv)?;
        let method: String = row.get_value("method").map_err(conv)?;
        let unique: bool = row.get_value("is_unique").map_err(conv)?;
        let predicate: Option<String> = row.get_opt("predicate").map_err(conv)?;
        let columns: Vec<String> = row.get_value("columns").map_err(conv)?;
        table.indexes.push(Index {
            name,
            columns,
            unique,
            method: Some(method).filter(|m| m != "btree"),
            predicate,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::strip_check_wrapper;

    #[test]
    fn strip_check_wrapper_unwraps_the_constraintdef_envelope() {
        assert_eq!(strip_check_wrapper("CHECK ((age > 18))"), "(age > 18)");
        assert_eq!(strip_check_wrapper("not a check"), "not a check");
    }
}
