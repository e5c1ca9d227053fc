//! Per-operation planning: turns a parsed [`Operation`](crate::migration::Operation)
//! into the DDL to run at each lifecycle phase, and mutates the in-memory
//! [`Schema`] to reflect its effect as it goes.
//!
//! Every operation answers the same four questions, gathered into an
//! [`OperationPlan`]: what DDL does `Start` run, what undoes it if the
//! migration is rolled back before `Complete`, what DDL does `Complete`
//! run to make the change permanent, and does any of this need to run
//! outside the shared migration transaction (`CREATE INDEX CONCURRENTLY`
//! and friends forbid transactional wrapping).

use crate::backfill;
use crate::duplicator;
use crate::error::{MigrateResult, MigrationError};
use crate::identifiers::{check_identifier_length, quote_ident, quote_qualified, temporary_name};
use crate::migration::*;
use crate::schema::{Column, ForeignKey, Index, OnDelete, Schema, Table, UniqueConstraint};
use crate::trigger;

/// The DDL an operation needs at each phase of its lifecycle, plus the
/// execution-mode flags the orchestrator uses to sequence it correctly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationPlan {
    /// DDL to run when the migration is started.
    pub start_up: Vec<String>,
    /// DDL that undoes `start_up`, run if the migration is rolled back
    /// before being completed.
    pub start_down: Vec<String>,
    /// DDL that finalizes the change, run when the migration is
    /// completed.
    pub complete_up: Vec<String>,
    /// Whether this operation's DDL must run outside the shared
    /// migration transaction (e.g. it uses `CONCURRENTLY`).
    pub is_isolated: bool,
    /// Whether this operation must be the only one in its migration
    /// (spec's `IsIsolated`): a migration containing it alongside any
    /// other operation is rejected at `Start`.
    pub solitary: bool,
    /// Whether the Backfill Engine must sweep existing rows for this
    /// operation before it can be completed.
    pub requires_backfill: bool,
    /// Whether the old/new version views need to be recreated after this
    /// operation's `Start` runs.
    pub requires_schema_refresh: bool,
}

/// Plan `op` against `schema`, mutating `schema` in place to reflect the
/// operation's effect on the logical model (as `Start` would leave it).
pub fn plan(op: &Operation, schema_name: &str, schema: &mut Schema) -> MigrateResult<OperationPlan> {
    for name in user_supplied_identifiers(op) {
        check_identifier_length(name)?;
    }
    match op {
        Operation::CreateTable(inner) => plan_create_table(inner, schema_name, schema),
        Operation::DropTable(inner) => plan_drop_table(inner, schema),
        Operation::RenameTable(inner) => plan_rename_table(inner, schema_name, schema),
        Operation::AddColumn(inner) => plan_add_column(inner, schema_name, schema),
        Operation::DropColumn(inner) => plan_drop_column(inner, schema_name, schema),
        Operation::AlterColumn(inner) => plan_alter_column(inner, schema_name, schema),
        Operation::SetReplicaIdentity(inner) => plan_set_replica_identity(inner, schema_name, schema),
        Operation::CreateConstraint(inner) => plan_create_constraint(inner, schema_name, schema),
        Operation::DropMultiColumnConstraint(inner) => plan_drop_multi_column_constraint(inner, schema_name, schema),
        Operation::RenameConstraint(inner) => plan_rename_constraint(inner, schema_name, schema),
        Operation::CreateIndex(inner) => plan_create_index(inner, schema_name, schema),
        Operation::DropIndex(inner) => plan_drop_index(inner, schema),
        Operation::RawSql(inner) => plan_raw_sql(inner),
    }
}

/// User-supplied identifiers an operation introduces or renames to, which
/// must be checked against PostgreSQL's 63-byte limit before any DDL is
/// planned (spec invariant 5). Identifiers that merely reference existing
/// objects are not re-checked here — they were already validated when
/// created.
fn user_supplied_identifiers(op: &Operation) -> Vec<&str> {
    match op {
        Operation::CreateTable(inner) => {
            let mut names = vec![inner.name.as_str()];
            names.extend(inner.columns.iter().map(|c| c.name.as_str()));
            names
        }
        Operation::DropTable(_) => Vec::new(),
        Operation::RenameTable(inner) => vec![inner.to.as_str()],
        Operation::AddColumn(inner) => vec![inner.column.name.as_str()],
        Operation::DropColumn(_) => Vec::new(),
        Operation::AlterColumn(inner) => inner.name.as_deref().into_iter().collect(),
        Operation::SetReplicaIdentity(_) => Vec::new(),
        Operation::CreateConstraint(inner) => vec![inner.name.as_str()],
        Operation::DropMultiColumnConstraint(_) => Vec::new(),
        Operation::RenameConstraint(inner) => vec![inner.to.as_str()],
        Operation::CreateIndex(inner) => vec![inner.name.as_str()],
        Operation::DropIndex(_) => Vec::new(),
        Operation::RawSql(_) => Vec::new(),
    }
}

fn plan_create_table(op: &CreateTableOp, schema_name: &str, schema: &mut Schema) -> MigrateResult<OperationPlan> {
    if schema.has_table(&op.name) {
        return Err(MigrationError::InvalidMigration(format!("table '{}' already exists", op.name)));
    }
    if op.columns.is_empty() {
        return Err(MigrationError::FieldRequired {
            op: "create_table".into(),
            field: "columns".into(),
        });
    }

    let mut table = Table::new(&op.name);
    let mut column_defs = Vec::new();
    for col in &op.columns {
        let mut def = format!("{} {}", quote_ident(&col.name), col.data_type);
        if !col.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &col.default {
            def.push_str(&format!(" DEFAULT {default}"));
        }
        column_defs.push(def);

        let mut column = Column::new(&col.name, &col.data_type);
        column.nullable = col.nullable;
        column.default = col.default.clone();
        column.comment = col.comment.clone();
        table.columns.insert(col.name.clone(), column);
        if col.pk {
            table.primary_key.push(col.name.clone());
        }
    }
    if !table.primary_key.is_empty() {
        column_defs.push(format!("PRIMARY KEY ({})", table.primary_key.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")));
    }

    let start_up = vec![format!(
        "CREATE TABLE {} ({});",
        quote_qualified(schema_name, &op.name),
        column_defs.join(", ")
    )];
    let start_down = vec![format!("DROP TABLE IF EXISTS {};", quote_qualified(schema_name, &op.name))];

    schema.tables.insert(op.name.clone(), table);

    Ok(OperationPlan {
        start_up,
        start_down,
        complete_up: Vec::new(),
        is_isolated: false,
        solitary: false,
        requires_backfill: false,
        requires_schema_refresh: true,
    })
}

fn plan_drop_table(op: &DropTableOp, schema: &mut Schema) -> MigrateResult<OperationPlan> {
    let table = schema.table_mut(&op.name)?;
    table.dropped = true;

    Ok(OperationPlan {
        start_up: Vec::new(),
        start_down: Vec::new(),
        complete_up: vec![format!("DROP TABLE IF EXISTS {};", quote_ident(&op.name))],
        is_isolated: false,
        solitary: false,
        requires_backfill: false,
        requires_schema_refresh: true,
    })
}

fn plan_rename_table(op: &RenameTableOp, schema_name: &str, schema: &mut Schema) -> MigrateResult<OperationPlan> {
    let mut table = schema
        .tables
        .shift_remove(&op.from)
        .ok_or_else(|| MigrationError::TableDoesNotExist(op.from.clone()))?;
    if schema.has_table(&op.to) {
        return Err(MigrationError::InvalidMigration(format!("table '{}' already exists", op.to)));
    }
    let old_physical = table.physical_name.clone();
    table.name = op.to.clone();
    schema.tables.insert(op.to.clone(), table);

    Ok(OperationPlan {
        start_up: Vec::new(),
        start_down: Vec::new(),
        complete_up: vec![format!(
            "ALTER TABLE {} RENAME TO {};",
            quote_qualified(schema_name, &old_physical),
            quote_ident(&op.to)
        )],
        is_isolated: false,
        solitary: false,
        requires_backfill: false,
        requires_schema_refresh: true,
    })
}

fn plan_add_column(op: &AddColumnOp, schema_name: &str, schema: &mut Schema) -> MigrateResult<OperationPlan> {
    let qualified_table = quote_qualified(schema_name, &op.table);
    let table = schema.table_mut(&op.table)?;
    if table.columns.contains_key(&op.column.name) {
        return Err(MigrationError::InvalidMigration(format!(
            "column '{}' already exists on table '{}'",
            op.column.name, op.table
        )));
    }

    let mut def = format!("{} {}", quote_ident(&op.column.name), op.column.data_type);
    if let Some(default) = &op.column.default {
        def.push_str(&format!(" DEFAULT {default}"));
    }
    let start_up = vec![format!("ALTER TABLE {qualified_table} ADD COLUMN {def};")];
    let start_down = vec![format!(
        "ALTER TABLE {qualified_table} DROP COLUMN IF EXISTS {};",
        quote_ident(&op.column.name)
    )];

    let mut column = Column::new(&op.column.name, &op.column.data_type);
    column.nullable = op.column.nullable;
    column.default = op.column.default.clone();
    column.comment = op.column.comment.clone();
    table.columns.insert(op.column.name.clone(), column);
    if op.column.pk {
        table.primary_key.push(op.column.name.clone());
    }

    Ok(OperationPlan {
        start_up,
        start_down,
        complete_up: Vec::new(),
        is_isolated: false,
        solitary: false,
        requires_backfill: op.up.is_some(),
        requires_schema_refresh: true,
    })
}

fn plan_drop_column(op: &DropColumnOp, schema_name: &str, schema: &mut Schema) -> MigrateResult<OperationPlan> {
    let qualified_table = quote_qualified(schema_name, &op.table);
    let table = schema.table_mut(&op.table)?;
    table.column(&op.column)?;

    Ok(OperationPlan {
        start_up: Vec::new(),
        start_down: Vec::new(),
        complete_up: vec![format!(
            "ALTER TABLE {qualified_table} DROP COLUMN IF EXISTS {};",
            quote_ident(&op.column)
        )],
        is_isolated: false,
        solitary: false,
        requires_backfill: false,
        requires_schema_refresh: true,
    })
}

fn plan_alter_column(op: &AlterColumnOp, schema_name: &str, schema: &mut Schema) -> MigrateResult<OperationPlan> {
    let qualified_table = quote_qualified(schema_name, &op.table);

    if op.is_rename_only() {
        if op.up.is_some() || op.down.is_some() {
            return Err(MigrationError::ColumnMigrationRedundant(op.column.clone()));
        }
        let table = schema.table_mut(&op.table)?;
        let mut column = table.columns.shift_remove(&op.column).ok_or_else(|| MigrationError::ColumnDoesNotExist {
            table: op.table.clone(),
            column: op.column.clone(),
        })?;
        let new_name = op.name.clone().expect("is_rename_only guarantees name is set");
        column.logical_name = new_name.clone();
        table.columns.insert(new_name, column);

        return Ok(OperationPlan {
            start_up: Vec::new(),
            start_down: Vec::new(),
            complete_up: Vec::new(),
            is_isolated: false,
            solitary: false,
            requires_backfill: false,
            requires_schema_refresh: true,
        });
    }

    if op.up.is_none() || op.down.is_none() {
        return Err(MigrationError::ColumnMigrationMissing(op.column.clone()));
    }

    let table = schema.table_mut(&op.table)?;
    let original = table.column(&op.column)?.clone();
    let new_logical = op.name.clone().unwrap_or_else(|| op.column.clone());
    let new_type = op.data_type.clone().unwrap_or_else(|| original.data_type.clone());
    let shadow_physical = temporary_name(&op.column);

    let mut duplication = duplicator::duplicate_columns(table, &[op.column.as_str()]);
    // duplicate_columns assumes the shadow column's type matches the original;
    // override it when this alteration retypes the column.
    if new_type != original.data_type {
        if let Some(stmt) = duplication.first_mut() {
            stmt.up = format!(
                "ALTER TABLE {qualified_table} ADD COLUMN {} {new_type};",
                quote_ident(&shadow_physical)
            );
        }
    }
    let trigger_pair = trigger::synthesize(
        schema_name,
        &table.physical_name,
        &op.column,
        &shadow_physical,
        op.up.as_deref(),
        op.down.as_deref(),
    );

    let mut start_up: Vec<String> = duplication.iter().map(|s| s.up.clone()).collect();
    start_up.push(trigger_pair.up.create.clone());
    start_up.push(trigger_pair.down.create.clone());
    let mut start_down: Vec<String> = vec![trigger_pair.up.drop.clone(), trigger_pair.down.drop.clone()];
    start_down.extend(duplication.iter().map(|s| s.down.clone()));

    let mut new_column = Column::new(&new_logical, &new_type);
    new_column.physical_name = shadow_physical.clone();
    new_column.nullable = op.nullable.unwrap_or(original.nullable);
    new_column.default = op.default.clone().or(original.default.clone());
    new_column.comment = original.comment.clone();
    table.columns.insert(new_logical, new_column);
    if new_logical_differs(&op.column, &op.name) {
        table.columns.shift_remove(&op.column);
    }

    Ok(OperationPlan {
        start_up,
        start_down,
        complete_up: vec![
            format!(
                "ALTER TABLE {qualified_table} DROP COLUMN IF EXISTS {};",
                quote_ident(&op.column)
            ),
            format!(
                "ALTER TABLE {qualified_table} RENAME COLUMN {} TO {};",
                quote_ident(&shadow_physical),
                quote_ident(op.name.as_deref().unwrap_or(&op.column))
            ),
            trigger_pair.up.drop,
            trigger_pair.down.drop,
        ],
        is_isolated: true,
        solitary: false,
        requires_backfill: true,
        requires_schema_refresh: true,
    })
}

fn new_logical_differs(original: &str, renamed: &Option<String>) -> bool {
    renamed.as_deref().is_some_and(|n| n != original)
}

fn plan_set_replica_identity(op: &SetReplicaIdentityOp, schema_name: &str, schema: &mut Schema) -> MigrateResult<OperationPlan> {
    schema.table(&op.table)?;
    let qualified_table = quote_qualified(schema_name, &op.table);
    let clause = match op.identity.to_ascii_lowercase().as_str() {
        "default" => "DEFAULT".to_string(),
        "full" => "FULL".to_string(),
        "nothing" => "NOTHING".to_string(),
        "index" => {
            let index = op.index.as_ref().ok_or_else(|| MigrationError::FieldRequired {
                op: "set_replica_identity".into(),
                field: "index".into(),
            })?;
            format!("USING INDEX {}", quote_ident(index))
        }
        other => return Err(MigrationError::InvalidMigration(format!("unknown replica identity '{other}'"))),
    };

    Ok(OperationPlan {
        start_up: vec![format!("ALTER TABLE {qualified_table} REPLICA IDENTITY {clause};")],
        start_down: vec![format!("ALTER TABLE {qualified_table} REPLICA IDENTITY DEFAULT;")],
        complete_up: Vec::new(),
        is_isolated: false,
        solitary: false,
        requires_backfill: false,
        requires_schema_refresh: false,
    })
}

fn plan_create_constraint(op: &CreateConstraintOp, schema_name: &str, schema: &mut Schema) -> MigrateResult<OperationPlan> {
    let qualified_table = quote_qualified(schema_name, &op.table);
    let columns: Vec<&str> = op.columns.iter().map(String::as_str).collect();
    let table_physical = {
        let table = schema.table(&op.table)?;
        for col in &columns {
            table.column(col)?;
        }
        table.physical_name.clone()
    };

    // Shadow every covered column so the new constraint can be built and
    // validated against a physical copy while the original columns keep
    // serving unconstrained old-view traffic (spec §4.5).
    let duplication = duplicator::duplicate_columns(schema.table(&op.table)?, &columns);
    let mut start_up: Vec<String> = duplication.iter().map(|s| s.up.clone()).collect();
    let mut start_down: Vec<String> = duplication.iter().map(|s| s.down.clone()).collect();

    let mut trigger_pairs = Vec::with_capacity(columns.len());
    for &col in &columns {
        let shadow = temporary_name(col);
        let up_expr = op.up.get(col).map(String::as_str);
        let down_expr = op.down.get(col).map(String::as_str);
        let pair = trigger::synthesize(schema_name, &table_physical, col, &shadow, up_expr, down_expr);
        start_up.push(pair.up.create.clone());
        start_up.push(pair.down.create.clone());
        trigger_pairs.push(pair);
    }

    let (constraint_up, constraint_down, finalize, is_isolated) = match op.kind.as_str() {
        "check" => {
            let expr = op.check.as_ref().ok_or_else(|| MigrationError::FieldRequired {
                op: "create_constraint".into(),
                field: "check".into(),
            })?;
            let rewritten = duplicator::rewrite_expression(expr, &columns);
            let up = format!(
                "ALTER TABLE {qualified_table} ADD CONSTRAINT {} CHECK ({rewritten}) NOT VALID;",
                quote_ident(&op.name)
            );
            let down = format!("ALTER TABLE {qualified_table} DROP CONSTRAINT IF EXISTS {};", quote_ident(&op.name));
            let finalize = vec![format!(
                "ALTER TABLE {qualified_table} VALIDATE CONSTRAINT {};",
                quote_ident(&op.name)
            )];
            (up, down, finalize, false)
        }
        "unique" => {
            let shadow_cols: Vec<String> = op.columns.iter().map(|c| quote_ident(&temporary_name(c))).collect();
            let up = format!(
                "CREATE UNIQUE INDEX CONCURRENTLY {} ON {qualified_table} ({});",
                quote_ident(&op.name),
                shadow_cols.join(", ")
            );
            let down = format!("DROP INDEX CONCURRENTLY IF EXISTS {};", quote_ident(&op.name));
            let finalize = vec![format!(
                "ALTER TABLE {qualified_table} ADD CONSTRAINT {} UNIQUE USING INDEX {};",
                quote_ident(&op.name),
                quote_ident(&op.name)
            )];
            (up, down, finalize, true)
        }
        "foreign_key" => {
            let reference = op.references.as_ref().ok_or_else(|| MigrationError::FieldRequired {
                op: "create_constraint".into(),
                field: "references".into(),
            })?;
            let on_delete = match &reference.on_delete {
                Some(value) => OnDelete::parse(value)?,
                None => OnDelete::NoAction,
            };
            let shadow_cols: Vec<String> = op.columns.iter().map(|c| quote_ident(&temporary_name(c))).collect();
            let ref_cols: Vec<String> = reference.columns.iter().map(|c| quote_ident(c)).collect();
            let up = format!(
                "ALTER TABLE {qualified_table} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} NOT VALID;",
                quote_ident(&op.name),
                shadow_cols.join(", "),
                quote_ident(&reference.table),
                ref_cols.join(", "),
                on_delete.as_sql()
            );
            let down = format!("ALTER TABLE {qualified_table} DROP CONSTRAINT IF EXISTS {};", quote_ident(&op.name));
            let finalize = vec![format!(
                "ALTER TABLE {qualified_table} VALIDATE CONSTRAINT {};",
                quote_ident(&op.name)
            )];
            (up, down, finalize, false)
        }
        other => {
            return Err(MigrationError::InvalidMigration(format!(
                "unknown constraint type '{other}'"
            )))
        }
    };
    start_up.push(constraint_up);
    // Rollback undoes this operation's own Start in reverse: drop the
    // constraint/index before the triggers it depends on, then the shadow
    // columns those triggers wrote into.
    start_down.splice(0..0, std::iter::once(constraint_down));
    let trigger_downs: Vec<String> = trigger_pairs
        .iter()
        .flat_map(|pair| [pair.up.drop.clone(), pair.down.drop.clone()])
        .collect();
    start_down.splice(1..1, trigger_downs.clone());

    let mut complete_up = Vec::new();
    for &col in &columns {
        let shadow = temporary_name(col);
        complete_up.push(format!("ALTER TABLE {qualified_table} DROP COLUMN IF EXISTS {};", quote_ident(col)));
        complete_up.push(format!(
            "ALTER TABLE {qualified_table} RENAME COLUMN {} TO {};",
            quote_ident(&shadow),
            quote_ident(col)
        ));
    }
    complete_up.extend(finalize);
    complete_up.extend(trigger_downs);

    // Reflect the shadow swap in the in-memory model: the new version's
    // columns now live at the shadow physical name until Complete renames
    // them back.
    let table = schema.table_mut(&op.table)?;
    for &col in &columns {
        let shadow = temporary_name(col);
        if let Ok(column) = table.column_mut(col) {
            column.physical_name = shadow;
        }
    }
    match op.kind.as_str() {
        "check" => table.check_constraints.push(crate::schema::CheckConstraint {
            name: op.name.clone(),
            expression: op.check.clone().unwrap_or_default(),
            not_valid: true,
        }),
        "unique" => table.unique_constraints.push(UniqueConstraint {
            name: op.name.clone(),
            columns: op.columns.clone(),
        }),
        "foreign_key" => {
            let reference = op.references.as_ref().expect("checked above");
            let on_delete = match &reference.on_delete {
                Some(value) => OnDelete::parse(value)?,
                None => OnDelete::NoAction,
            };
            table.foreign_keys.push(ForeignKey {
                name: op.name.clone(),
                columns: op.columns.clone(),
                references_table: reference.table.clone(),
                references_columns: reference.columns.clone(),
                on_delete,
                not_valid: true,
            });
        }
        _ => unreachable!("constraint kind validated above"),
    }

    Ok(OperationPlan {
        start_up,
        start_down,
        complete_up,
        is_isolated,
        solitary: false,
        requires_backfill: true,
        requires_schema_refresh: true,
    })
}

fn plan_drop_multi_column_constraint(
    op: &DropMultiColumnConstraintOp,
    schema_name: &str,
    schema: &mut Schema,
) -> MigrateResult<OperationPlan> {
    let qualified_table = quote_qualified(schema_name, &op.table);
    let owned_columns: Vec<String> = {
        let table = schema.table(&op.table)?;
        table
            .check_constraints
            .iter()
            .find(|c| c.name == op.name)
            .map(|c| covering_columns(&table.columns, &c.expression))
            .or_else(|| table.unique_constraints.iter().find(|c| c.name == op.name).map(|c| c.columns.clone()))
            .or_else(|| {
                table
                    .foreign_keys
                    .iter()
                    .find(|c| c.name == op.name)
                    .map(|c| c.columns.clone())
            })
            .ok_or_else(|| MigrationError::ConstraintDoesNotExist(op.name.clone()))?
    };
    let columns: Vec<&str> = owned_columns.iter().map(String::as_str).collect();
    let table_physical = schema.table(&op.table)?.physical_name.clone();

    let duplication = duplicator::duplicate_columns(schema.table(&op.table)?, &columns);
    let mut start_up: Vec<String> = duplication.iter().map(|s| s.up.clone()).collect();
    let mut start_down: Vec<String> = duplication.iter().map(|s| s.down.clone()).collect();

    let mut trigger_pairs = Vec::with_capacity(columns.len());
    for &col in &columns {
        let shadow = temporary_name(col);
        let up_expr = op.up.get(col).map(String::as_str);
        let down_expr = op.down.get(col).map(String::as_str);
        let pair = trigger::synthesize(schema_name, &table_physical, col, &shadow, up_expr, down_expr);
        start_up.push(pair.up.create.clone());
        start_up.push(pair.down.create.clone());
        trigger_pairs.push(pair);
    }
    let trigger_downs: Vec<String> = trigger_pairs
        .iter()
        .flat_map(|pair| [pair.up.drop.clone(), pair.down.drop.clone()])
        .collect();
    start_down.splice(0..0, trigger_downs.clone());

    let mut complete_up = vec![format!(
        "ALTER TABLE {qualified_table} DROP CONSTRAINT IF EXISTS {};",
        quote_ident(&op.name)
    )];
    for &col in &columns {
        let shadow = temporary_name(col);
        complete_up.push(format!("ALTER TABLE {qualified_table} DROP COLUMN IF EXISTS {};", quote_ident(col)));
        complete_up.push(format!(
            "ALTER TABLE {qualified_table} RENAME COLUMN {} TO {};",
            quote_ident(&shadow),
            quote_ident(col)
        ));
    }
    complete_up.extend(trigger_downs);

    let table = schema.table_mut(&op.table)?;
    table.check_constraints.retain(|c| c.name != op.name);
    table.unique_constraints.retain(|c| c.name != op.name);
    table.foreign_keys.retain(|c| c.name != op.name);
    for &col in &columns {
        let shadow = temporary_name(col);
        if let Ok(column) = table.column_mut(col) {
            column.physical_name = shadow;
        }
    }

    Ok(OperationPlan {
        start_up,
        start_down,
        complete_up,
        is_isolated: false,
        solitary: false,
        requires_backfill: true,
        requires_schema_refresh: true,
    })
}

/// Columns a check constraint's expression references, used when a
/// `drop_multi_column_constraint` target is a check constraint (which, unlike
/// unique/foreign-key constraints, does not carry an explicit column list).
fn covering_columns(columns: &indexmap::IndexMap<String, Column>, expression: &str) -> Vec<String> {
    columns
        .keys()
        .filter(|name| expression.contains(name.as_str()))
        .cloned()
        .collect()
}

fn plan_rename_constraint(op: &RenameConstraintOp, schema_name: &str, schema: &mut Schema) -> MigrateResult<OperationPlan> {
    let qualified_table = quote_qualified(schema_name, &op.table);
    let table = schema.table_mut(&op.table)?;
    let mut found = false;
    for c in &mut table.check_constraints {
        if c.name == op.from {
            c.name = op.to.clone();
            found = true;
        }
    }
    for c in &mut table.unique_constraints {
        if c.name == op.from {
            c.name = op.to.clone();
            found = true;
        }
    }
    for c in &mut table.foreign_keys {
        if c.name == op.from {
            c.name = op.to.clone();
            found = true;
        }
    }
    if !found {
        return Err(MigrationError::ConstraintDoesNotExist(op.from.clone()));
    }

    Ok(OperationPlan {
        start_up: vec![format!(
            "ALTER TABLE {qualified_table} RENAME CONSTRAINT {} TO {};",
            quote_ident(&op.from),
            quote_ident(&op.to)
        )],
        start_down: vec![format!(
            "ALTER TABLE {qualified_table} RENAME CONSTRAINT {} TO {};",
            quote_ident(&op.to),
            quote_ident(&op.from)
        )],
        complete_up: Vec::new(),
        is_isolated: false,
        solitary: false,
        requires_backfill: false,
        requires_schema_refresh: false,
    })
}

fn plan_create_index(op: &CreateIndexOp, schema_name: &str, schema: &mut Schema) -> MigrateResult<OperationPlan> {
    let qualified_table = quote_qualified(schema_name, &op.table);
    let table = schema.table_mut(&op.table)?;
    for col in &op.columns {
        table.column(col)?;
    }

    let unique_kw = if op.unique { "UNIQUE " } else { "" };
    let using = op.method.as_ref().map(|m| format!(" USING {m}")).unwrap_or_default();
    let columns: Vec<String> = op.columns.iter().map(|c| quote_ident(c)).collect();
    let predicate = op.predicate.as_ref().map(|p| format!(" WHERE {p}")).unwrap_or_default();

    let start_up = vec![format!(
        "CREATE {unique_kw}INDEX CONCURRENTLY {}{using} ON {qualified_table} ({}){predicate};",
        quote_ident(&op.name),
        columns.join(", ")
    )];
    let start_down = vec![format!("DROP INDEX CONCURRENTLY IF EXISTS {};", quote_ident(&op.name))];

    table.indexes.push(Index {
        name: op.name.clone(),
        columns: op.columns.clone(),
        unique: op.unique,
        method: op.method.clone(),
        predicate: op.predicate.clone(),
    });

    Ok(OperationPlan {
        start_up,
        start_down,
        complete_up: Vec::new(),
        is_isolated: true,
        solitary: false,
        requires_backfill: false,
        requires_schema_refresh: false,
    })
}

fn plan_drop_index(op: &DropIndexOp) -> MigrateResult<OperationPlan> {
    Ok(OperationPlan {
        start_up: Vec::new(),
        start_down: Vec::new(),
        complete_up: vec![format!("DROP INDEX CONCURRENTLY IF EXISTS {};", quote_ident(&op.name))],
        is_isolated: true,
        solitary: false,
        requires_backfill: false,
        requires_schema_refresh: false,
    })
}

fn plan_raw_sql(op: &RawSqlOp) -> MigrateResult<OperationPlan> {
    Ok(OperationPlan {
        start_up: if op.on_complete { Vec::new() } else { vec![op.up.clone()] },
        start_down: op.down.clone().into_iter().collect(),
        complete_up: if op.on_complete { vec![op.up.clone()] } else { Vec::new() },
        is_isolated: false,
        solitary: !op.on_complete,
        requires_backfill: false,
        requires_schema_refresh: false,
    })
}

/// Build the backfill plan for an operation, if it needs one, given the
/// post-`Start` schema state.
pub fn backfill_plan_for(op: &Operation, schema_name: &str, schema: &Schema) -> MigrateResult<Option<backfill::BatchPlan>> {
    let table_name = match op {
        Operation::AddColumn(inner) => &inner.table,
        Operation::AlterColumn(inner) => &inner.table,
        Operation::CreateConstraint(inner) => &inner.table,
        Operation::DropMultiColumnConstraint(inner) => &inner.table,
        _ => return Ok(None),
    };
    let table = schema.table(table_name)?;
    Ok(Some(backfill::plan_batch(schema_name, table)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_with_users() -> Schema {
        let mut schema = Schema::new("public");
        let mut table = Table::new("users");
        table.columns.insert("id".into(), Column::new("id", "bigint"));
        table.columns.insert("age".into(), Column::new("age", "integer"));
        table.primary_key = vec!["id".into()];
        schema.tables.insert("users".into(), table);
        schema
    }

    #[test]
    fn create_table_adds_table_to_schema_and_emits_ddl() {
        let mut schema = Schema::new("public");
        let op = Operation::CreateTable(CreateTableOp {
            name: "accounts".into(),
            columns: vec![ColumnSpec {
                name: "id".into(),
                data_type: "bigint".into(),
                nullable: false,
                default: None,
                comment: None,
                pk: true,
            }],
        });
        let planned = plan(&op, "public", &mut schema).unwrap();
        assert!(schema.has_table("accounts"));
        assert!(planned.start_up[0].contains("CREATE TABLE"));
        assert!(planned.start_up[0].contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn drop_table_marks_dropped_and_defers_ddl_to_complete() {
        let mut schema = schema_with_users();
        let op = Operation::DropTable(DropTableOp { name: "users".into() });
        let planned = plan(&op, "public", &mut schema).unwrap();
        assert!(schema.table("users").unwrap().dropped);
        assert!(planned.start_up.is_empty());
        assert!(planned.complete_up[0].contains("DROP TABLE"));
    }

    #[test]
    fn add_column_rejects_existing_column_name() {
        let mut schema = schema_with_users();
        let op = Operation::AddColumn(AddColumnOp {
            table: "users".into(),
            column: ColumnSpec {
                name: "age".into(),
                data_type: "integer".into(),
                nullable: true,
                default: None,
                comment: None,
                pk: false,
            },
            up: None,
        });
        let err = plan(&op, "public", &mut schema).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidMigration(_)));
    }

    #[test]
    fn add_column_without_up_does_not_require_backfill() {
        let mut schema = schema_with_users();
        let op = Operation::AddColumn(AddColumnOp {
            table: "users".into(),
            column: ColumnSpec {
                name: "nickname".into(),
                data_type: "text".into(),
                nullable: true,
                default: None,
                comment: None,
                pk: false,
            },
            up: None,
        });
        let planned = plan(&op, "public", &mut schema).unwrap();
        assert!(!planned.requires_backfill);
        assert!(schema.table("users").unwrap().columns.contains_key("nickname"));
    }

    #[test]
    fn alter_column_requires_both_up_and_down() {
        let mut schema = schema_with_users();
        let op = Operation::AlterColumn(AlterColumnOp {
            table: "users".into(),
            column: "age".into(),
            name: None,
            data_type: Some("bigint".into()),
            nullable: None,
            default: None,
            up: Some("age::bigint".into()),
            down: None,
        });
        let err = plan(&op, "public", &mut schema).unwrap_err();
        assert!(matches!(err, MigrationError::ColumnMigrationMissing(_)));
    }

    #[test]
    fn alter_column_retype_installs_triggers_and_requires_backfill() {
        let mut schema = schema_with_users();
        let op = Operation::AlterColumn(AlterColumnOp {
            table: "users".into(),
            column: "age".into(),
            name: None,
            data_type: Some("bigint".into()),
            nullable: None,
            default: None,
            up: Some("age::bigint".into()),
            down: Some("age::integer".into()),
        });
        let planned = plan(&op, "public", &mut schema).unwrap();
        assert!(planned.requires_backfill);
        assert!(planned.is_isolated);
        assert!(planned.start_up.iter().any(|s| s.contains("CREATE OR REPLACE FUNCTION")));
    }

    #[test]
    fn alter_column_pure_rename_mutates_schema_without_ddl() {
        let mut schema = schema_with_users();
        let op = Operation::AlterColumn(AlterColumnOp {
            table: "users".into(),
            column: "age".into(),
            name: Some("years_old".into()),
            data_type: None,
            nullable: None,
            default: None,
            up: None,
            down: None,
        });
        let planned = plan(&op, "public", &mut schema).unwrap();
        assert!(planned.start_up.is_empty());
        assert!(schema.table("users").unwrap().columns.contains_key("years_old"));
        assert!(!schema.table("users").unwrap().columns.contains_key("age"));
    }

    #[test]
    fn create_constraint_unique_duplicates_columns_and_requires_backfill() {
        let mut schema = schema_with_users();
        let op = Operation::CreateConstraint(CreateConstraintOp {
            table: "users".into(),
            name: "unique_age".into(),
            kind: "unique".into(),
            columns: vec!["age".into()],
            check: None,
            references: None,
            up: Default::default(),
            down: Default::default(),
        });
        let planned = plan(&op, "public", &mut schema).unwrap();
        assert!(planned.is_isolated);
        assert!(planned.requires_backfill);
        assert!(planned.start_up.iter().any(|s| s.contains("ADD COLUMN \"_pgroll_new_age\"")));
        assert!(planned
            .start_up
            .iter()
            .any(|s| s.contains("CREATE UNIQUE INDEX CONCURRENTLY") && s.contains("\"_pgroll_new_age\"")));
        assert!(planned.complete_up.iter().any(|s| s.contains("DROP COLUMN IF EXISTS \"age\"")));
        assert!(planned
            .complete_up
            .iter()
            .any(|s| s.contains("RENAME COLUMN \"_pgroll_new_age\" TO \"age\"")));
        assert!(planned.complete_up.iter().any(|s| s.contains("UNIQUE USING INDEX")));
        assert_eq!(
            schema.table("users").unwrap().column("age").unwrap().physical_name,
            "_pgroll_new_age"
        );
    }

    #[test]
    fn create_constraint_check_rewrites_shadow_columns_in_expression() {
        let mut schema = schema_with_users();
        let op = Operation::CreateConstraint(CreateConstraintOp {
            table: "users".into(),
            name: "adults".into(),
            kind: "check".into(),
            columns: vec!["age".into()],
            check: Some("\"age\" > 18".into()),
            references: None,
            up: Default::default(),
            down: Default::default(),
        });
        let planned = plan(&op, "public", &mut schema).unwrap();
        assert!(!planned.is_isolated);
        assert!(planned
            .start_up
            .iter()
            .any(|s| s.contains("CHECK (\"_pgroll_new_age\" > 18) NOT VALID")));
        assert!(planned
            .complete_up
            .iter()
            .any(|s| s.contains("VALIDATE CONSTRAINT \"adults\"")));
    }

    #[test]
    fn drop_multi_column_constraint_duplicates_columns_and_requires_backfill() {
        let mut schema = schema_with_users();
        schema.table_mut("users").unwrap().unique_constraints.push(UniqueConstraint {
            name: "unique_age".into(),
            columns: vec!["age".into()],
        });
        let op = Operation::DropMultiColumnConstraint(DropMultiColumnConstraintOp {
            table: "users".into(),
            name: "unique_age".into(),
            up: Default::default(),
            down: Default::default(),
        });
        let planned = plan(&op, "public", &mut schema).unwrap();
        assert!(planned.requires_backfill);
        assert!(!planned.is_isolated);
        assert!(planned.start_up.iter().any(|s| s.contains("ADD COLUMN \"_pgroll_new_age\"")));
        assert!(planned.complete_up[0].contains("DROP CONSTRAINT IF EXISTS \"unique_age\""));
        assert!(planned.complete_up.iter().any(|s| s.contains("RENAME COLUMN \"_pgroll_new_age\" TO \"age\"")));
        assert!(!schema.table("users").unwrap().unique_constraints.iter().any(|c| c.name == "unique_age"));
    }

    #[test]
    fn drop_multi_column_constraint_rejects_unknown_name() {
        let mut schema = schema_with_users();
        let op = Operation::DropMultiColumnConstraint(DropMultiColumnConstraintOp {
            table: "users".into(),
            name: "does_not_exist".into(),
            up: Default::default(),
            down: Default::default(),
        });
        let err = plan(&op, "public", &mut schema).unwrap_err();
        assert!(matches!(err, MigrationError::ConstraintDoesNotExist(_)));
    }

    #[test]
    fn drop_index_defers_to_complete_and_is_isolated() {
        let op = Operation::DropIndex(DropIndexOp { name: "idx_users_age".into() });
        let mut schema = schema_with_users();
        let planned = plan(&op, "public", &mut schema).unwrap();
        assert!(planned.start_up.is_empty());
        assert!(planned.is_isolated);
        assert!(planned.complete_up[0].contains("DROP INDEX CONCURRENTLY"));
    }

    #[test]
    fn overlong_column_name_rejected_before_any_ddl_is_planned() {
        let mut schema = schema_with_users();
        let op = Operation::AddColumn(AddColumnOp {
            table: "users".into(),
            column: ColumnSpec {
                name: "a".repeat(64),
                data_type: "text".into(),
                nullable: true,
                default: None,
                comment: None,
                pk: false,
            },
            up: None,
        });
        let err = plan(&op, "public", &mut schema).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidIdentifierLength(_)));
        assert!(!schema.table("users").unwrap().columns.contains_key(&"a".repeat(64)));
    }

    #[test]
    fn raw_sql_without_down_has_no_rollback_statement() {
        let op = Operation::RawSql(RawSqlOp {
            up: "ANALYZE users;".into(),
            down: None,
            on_complete: false,
        });
        let mut schema = schema_with_users();
        let planned = plan(&op, "public", &mut schema).unwrap();
        assert!(planned.start_down.is_empty());
        assert_eq!(planned.start_up, vec!["ANALYZE users;".to_string()]);
        assert!(planned.complete_up.is_empty());
        assert!(planned.solitary);
    }

    #[test]
    fn raw_sql_on_complete_defers_up_to_complete() {
        let op = Operation::RawSql(RawSqlOp {
            up: "CREATE TABLE x(id int);".into(),
            down: Some("DROP TABLE x;".into()),
            on_complete: true,
        });
        let mut schema = schema_with_users();
        let planned = plan(&op, "public", &mut schema).unwrap();
        assert!(planned.start_up.is_empty());
        assert_eq!(planned.complete_up, vec!["CREATE TABLE x(id int);".to_string()]);
        assert_eq!(planned.start_down, vec!["DROP TABLE x;".to_string()]);
        assert!(!planned.solitary);
    }
}
