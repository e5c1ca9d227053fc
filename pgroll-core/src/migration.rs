//! Migration document wire format: parsing, and the typed operation
//! catalogue it deserializes into.
//!
//! See spec §6. A migration document may write each operation in either
//! an anonymous envelope (`{"add_column": {...}}`) or a flat form with an
//! explicit `kind` field (`{"kind": "add_column", ...}`); both are
//! accepted on read, uniformly.

use std::collections::HashMap;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{MigrateResult, MigrationError};

/// A single migration document: a name and an ordered list of operations
/// applied together as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    /// Human-assigned migration name. Must be unique per database.
    pub name: String,
    /// SQL schema name under which this version's views are published.
    /// Defaults to a sanitized form of `name` when omitted.
    #[serde(default)]
    pub version_schema: Option<String>,
    /// Operations to apply, in order.
    pub operations: Vec<OperationSpec>,
}

impl Migration {
    /// The version schema this migration publishes its views under:
    /// the explicit `version_schema` if given, else `name` sanitized into
    /// a valid identifier.
    pub fn version_schema(&self) -> String {
        match &self.version_schema {
            Some(explicit) => explicit.clone(),
            None => crate::orchestrator::version_schema_name(&self.name),
        }
    }
}

impl Migration {
    /// Parse a migration document from JSON.
    pub fn from_json(data: &str) -> MigrateResult<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Parse a migration document from YAML.
    pub fn from_yaml(data: &str) -> MigrateResult<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Serialize to the canonical (flat, `kind`-tagged) JSON form.
    pub fn to_json(&self) -> MigrateResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A parsed operation, regardless of which wire form it was written in.
#[derive(Debug, Clone, Serialize)]
pub struct OperationSpec(pub Operation);

impl<'de> Deserialize<'de> for OperationSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let tagged = normalize_to_tagged_form(value).map_err(DeError::custom)?;
        let op: Operation = serde_json::from_value(tagged).map_err(DeError::custom)?;
        Ok(OperationSpec(op))
    }
}

/// Rewrite an envelope-form operation object (`{"add_column": {...}}`)
/// into the flat, internally-tagged form (`{"kind": "add_column", ...}`)
/// that [`Operation`]'s derived `Deserialize` expects. Objects already in
/// flat form (carrying a `kind` key) pass through unchanged.
fn normalize_to_tagged_form(value: Value) -> MigrateResult<Value> {
    let Value::Object(map) = value else {
        return Err(MigrationError::InvalidMigration(
            "operation must be a JSON/YAML object".into(),
        ));
    };

    if map.contains_key("kind") {
        return Ok(Value::Object(map));
    }

    if map.len() != 1 {
        return Err(MigrationError::InvalidMigration(
            "operation object must have exactly one key (envelope form) or a 'kind' field (flat form)"
                .into(),
        ));
    }

    let (kind, body) = map.into_iter().next().expect("len checked above");
    let mut fields = match body {
        Value::Object(inner) => inner,
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(MigrationError::InvalidMigration(format!(
                "operation body for '{kind}' must be an object, got {other}"
            )))
        }
    };
    fields.insert("kind".to_string(), Value::String(kind));
    Ok(Value::Object(fields))
}

/// One migration operation. Field names mirror spec.md §6's vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Create a new table.
    CreateTable(CreateTableOp),
    /// Drop an existing table.
    DropTable(DropTableOp),
    /// Rename a table.
    RenameTable(RenameTableOp),
    /// Add a column to an existing table.
    AddColumn(AddColumnOp),
    /// Drop a column from a table.
    DropColumn(DropColumnOp),
    /// Alter a column: rename, retype, change nullability, with optional
    /// up/down data migrations.
    AlterColumn(AlterColumnOp),
    /// Change a table's `REPLICA IDENTITY`.
    SetReplicaIdentity(SetReplicaIdentityOp),
    /// Add a check, unique, or foreign key constraint spanning one or
    /// more columns.
    CreateConstraint(CreateConstraintOp),
    /// Drop a constraint that spans multiple columns.
    DropMultiColumnConstraint(DropMultiColumnConstraintOp),
    /// Rename a constraint.
    RenameConstraint(RenameConstraintOp),
    /// Create an index.
    CreateIndex(CreateIndexOp),
    /// Drop an index.
    DropIndex(DropIndexOp),
    /// Escape hatch: raw up/down SQL run verbatim.
    RawSql(RawSqlOp),
}

/// A column definition as it appears in a migration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Logical column name.
    pub name: String,
    /// PostgreSQL type name.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Whether the column allows NULL. Defaults to `true`.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// `DEFAULT` expression, if any.
    #[serde(default)]
    pub default: Option<String>,
    /// Column comment, if any.
    #[serde(default)]
    pub comment: Option<String>,
    /// Whether this column is (part of) the table's primary key.
    #[serde(default)]
    pub pk: bool,
}

fn default_true() -> bool {
    true
}

/// `create_table` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTableOp {
    /// Table name.
    pub name: String,
    /// Columns, in declaration order.
    pub columns: Vec<ColumnSpec>,
}

/// `drop_table` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropTableOp {
    /// Table name.
    pub name: String,
}

/// `rename_table` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameTableOp {
    /// Current table name.
    pub from: String,
    /// New table name.
    pub to: String,
}

/// `add_column` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddColumnOp {
    /// Table to add the column to.
    pub table: String,
    /// The new column's definition.
    pub column: ColumnSpec,
    /// Optional backfill expression for existing rows; `NULL`/default is
    /// used if omitted.
    #[serde(default)]
    pub up: Option<String>,
}

/// `drop_column` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropColumnOp {
    /// Table to drop the column from.
    pub table: String,
    /// Column to drop.
    pub column: String,
    /// Expression to reconstruct the column's value on rollback.
    #[serde(default)]
    pub down: Option<String>,
}

/// `alter_column` operation — the richest operation, covering rename,
/// retype, nullability flips, and default changes, any combination of
/// which may be present at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlterColumnOp {
    /// Table containing the column.
    pub table: String,
    /// Column's current logical name.
    pub column: String,
    /// New logical name, if renaming.
    #[serde(default)]
    pub name: Option<String>,
    /// New PostgreSQL type, if retyping.
    #[serde(rename = "type", default)]
    pub data_type: Option<String>,
    /// New nullability, if changing.
    #[serde(default)]
    pub nullable: Option<bool>,
    /// New `DEFAULT` expression, if changing. `Some(None)` is not
    /// representable; omit the field to leave the default untouched.
    #[serde(default)]
    pub default: Option<String>,
    /// Expression computing the new column's value from the old row.
    /// Required unless the change is a pure rename.
    #[serde(default)]
    pub up: Option<String>,
    /// Expression computing the old column's value from the new row.
    /// Required unless the change is a pure rename.
    #[serde(default)]
    pub down: Option<String>,
}

impl AlterColumnOp {
    /// Whether this change is a pure rename: no type, nullability or
    /// default change, and hence no up/down migration is required or
    /// permitted.
    pub fn is_rename_only(&self) -> bool {
        self.name.is_some() && self.data_type.is_none() && self.nullable.is_none() && self.default.is_none()
    }
}

/// `set_replica_identity` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetReplicaIdentityOp {
    /// Table to alter.
    pub table: String,
    /// `"default"`, `"full"`, `"nothing"`, or `"index"`.
    pub identity: String,
    /// Index name, required when `identity` is `"index"`.
    #[serde(default)]
    pub index: Option<String>,
}

/// A foreign key reference, used by [`CreateConstraintOp`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Referenced table.
    pub table: String,
    /// Referenced columns, in order.
    pub columns: Vec<String>,
    /// `ON DELETE` behavior.
    #[serde(default)]
    pub on_delete: Option<String>,
}

/// `create_constraint` operation: check, unique, or foreign key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConstraintOp {
    /// Table to add the constraint to.
    pub table: String,
    /// Constraint name.
    pub name: String,
    /// `"check"`, `"unique"`, or `"foreign_key"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Columns the constraint spans.
    pub columns: Vec<String>,
    /// Check expression, required when `kind` is `"check"`.
    #[serde(default)]
    pub check: Option<String>,
    /// Foreign key target, required when `kind` is `"foreign_key"`.
    #[serde(default)]
    pub references: Option<ForeignKeyRef>,
    /// Per-column up migrations, keyed by logical column name, used while
    /// duplicating columns this constraint covers.
    #[serde(default)]
    pub up: HashMap<String, String>,
    /// Per-column down migrations.
    #[serde(default)]
    pub down: HashMap<String, String>,
}

/// `drop_multi_column_constraint` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropMultiColumnConstraintOp {
    /// Table the constraint is defined on.
    pub table: String,
    /// Constraint name.
    pub name: String,
    /// Per-column up migrations needed to reconstruct the constraint on
    /// rollback.
    #[serde(default)]
    pub up: HashMap<String, String>,
    /// Per-column down migrations.
    #[serde(default)]
    pub down: HashMap<String, String>,
}

/// `rename_constraint` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameConstraintOp {
    /// Table the constraint is defined on.
    pub table: String,
    /// Current constraint name.
    pub from: String,
    /// New constraint name.
    pub to: String,
}

/// `create_index` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateIndexOp {
    /// Table to index.
    pub table: String,
    /// Index name.
    pub name: String,
    /// Columns covered, in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
    /// Index access method, e.g. `"gin"`. Defaults to btree.
    #[serde(default)]
    pub method: Option<String>,
    /// Partial index predicate.
    #[serde(default)]
    pub predicate: Option<String>,
}

/// `drop_index` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropIndexOp {
    /// Index name.
    pub name: String,
}

/// `raw_sql` operation: an escape hatch for DDL the catalogue does not
/// model. Not isolated from the rest of the migration and never
/// backfilled; see spec §4.2 Non-goals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSqlOp {
    /// SQL run at `Start` (or at `Complete`, if `on_complete` is set).
    pub up: String,
    /// SQL run at `Rollback`. Omitting it makes the operation
    /// irreversible.
    #[serde(default)]
    pub down: Option<String>,
    /// Defer `up` to `Complete` instead of running it at `Start`. Useful
    /// for DDL that must not be visible through either version's view
    /// until the migration is finalized.
    #[serde(default)]
    pub on_complete: bool,
}
