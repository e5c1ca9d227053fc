//! In-memory representation of the live database schema.
//!
//! The [`Schema`] is the sole source of truth for planning: it is
//! re-derived from the database (via introspection, in `pgroll-postgres`)
//! at the start of each migration, then mutated in place as each
//! operation's `start` runs, so later operations in the same migration see
//! the effects of earlier ones.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// A PostgreSQL schema containing a set of tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schema {
    /// Schema name (e.g. `public`).
    pub name: String,
    /// Tables keyed by logical table name.
    pub tables: IndexMap<String, Table>,
}

impl Schema {
    /// Create an empty schema with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: IndexMap::new(),
        }
    }

    /// Look up a table by logical name.
    pub fn table(&self, name: &str) -> MigrateResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| MigrationError::TableDoesNotExist(name.to_string()))
    }

    /// Look up a table mutably by logical name.
    pub fn table_mut(&mut self, name: &str) -> MigrateResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| MigrationError::TableDoesNotExist(name.to_string()))
    }

    /// Whether a table with this logical name currently exists.
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

/// A table in the schema model. Columns carry both a logical name (as seen
/// through version views) and a physical name (the name on the underlying
/// table), which diverge while a column is mid-migration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Table {
    /// Logical table name, as referenced by operations and views.
    pub name: String,
    /// Physical table name on disk (usually equal to `name`).
    pub physical_name: String,
    /// Columns keyed by logical column name.
    pub columns: IndexMap<String, Column>,
    /// Indexes defined on this table.
    pub indexes: Vec<Index>,
    /// Unique constraints.
    pub unique_constraints: Vec<UniqueConstraint>,
    /// Check constraints.
    pub check_constraints: Vec<CheckConstraint>,
    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKey>,
    /// Primary key, as an ordered list of logical column names.
    pub primary_key: Vec<String>,
    /// Whether the table is hidden from the new logical view (drop_table/drop_column in flight).
    pub dropped: bool,
}

impl Table {
    /// Create a new, empty table.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            physical_name: name.clone(),
            name,
            columns: IndexMap::new(),
            indexes: Vec::new(),
            unique_constraints: Vec::new(),
            check_constraints: Vec::new(),
            foreign_keys: Vec::new(),
            primary_key: Vec::new(),
            dropped: false,
        }
    }

    /// Look up a column by logical name.
    pub fn column(&self, name: &str) -> MigrateResult<&Column> {
        self.columns.get(name).ok_or_else(|| MigrationError::ColumnDoesNotExist {
            table: self.name.clone(),
            column: name.to_string(),
        })
    }

    /// Look up a column mutably by logical name.
    pub fn column_mut(&mut self, name: &str) -> MigrateResult<&mut Column> {
        let table_name = self.name.clone();
        self.columns
            .get_mut(name)
            .ok_or(MigrationError::ColumnDoesNotExist {
                table: table_name,
                column: name.to_string(),
            })
    }

    /// Whether the table has at least one primary-key column (required by
    /// the Backfill Engine unless the operation is rename-only).
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Unique constraints that cover at least one of `cols`.
    pub fn unique_constraints_covering<'a>(&'a self, cols: &[&str]) -> Vec<&'a UniqueConstraint> {
        self.unique_constraints
            .iter()
            .filter(|u| u.columns.iter().any(|c| cols.contains(&c.as_str())))
            .collect()
    }

    /// Check constraints that cover at least one of `cols` by referencing
    /// it in their SQL expression.
    pub fn check_constraints_covering<'a>(&'a self, cols: &[&str]) -> Vec<&'a CheckConstraint> {
        self.check_constraints
            .iter()
            .filter(|c| cols.iter().any(|col| references_column(&c.expression, col)))
            .collect()
    }
}

/// Crude but effective column-reference detection used to decide which
/// check constraints need their expression rewritten when a column is
/// duplicated. Matches a quoted `"col"` or a bare word-boundary `col`.
pub fn references_column(expression: &str, column: &str) -> bool {
    let quoted = format!("\"{column}\"");
    if expression.contains(&quoted) {
        return true;
    }
    let bytes = expression.as_bytes();
    let col_bytes = column.as_bytes();
    let mut start = 0;
    while let Some(pos) = find_from(bytes, col_bytes, start) {
        let before_ok = pos == 0 || !is_ident_char(bytes[pos - 1]);
        let after = pos + col_bytes.len();
        let after_ok = after >= bytes.len() || !is_ident_char(bytes[after]);
        if before_ok && after_ok {
            return true;
        }
        start = pos + 1;
    }
    false
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'"'
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// A column in a table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    /// Logical name, as seen through views.
    pub logical_name: String,
    /// Physical column name on the underlying table (may be a shadow
    /// column name such as `_pgroll_new_age` while mid-migration).
    pub physical_name: String,
    /// PostgreSQL type name, e.g. `integer`, `text`.
    pub data_type: String,
    /// Whether the column allows NULL.
    pub nullable: bool,
    /// `DEFAULT` expression, if any.
    pub default: Option<String>,
    /// Column comment, if any.
    pub comment: Option<String>,
}

impl Column {
    /// Create a new nullable column with no default.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            physical_name: name.clone(),
            logical_name: name,
            data_type: data_type.into(),
            nullable: true,
            default: None,
            comment: None,
        }
    }

    /// Builder: mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Builder: set a DEFAULT expression.
    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }
}

/// An index on a table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Columns covered, in order.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    pub unique: bool,
    /// Index method (`btree`, `gin`, ...); `None` means the PostgreSQL default.
    pub method: Option<String>,
    /// Partial index predicate, if any.
    pub predicate: Option<String>,
}

/// A multi-column unique constraint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UniqueConstraint {
    /// Constraint name.
    pub name: String,
    /// Columns covered, in declaration order.
    pub columns: Vec<String>,
}

/// A check constraint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckConstraint {
    /// Constraint name.
    pub name: String,
    /// Raw SQL boolean expression.
    pub expression: String,
    /// Whether the constraint is currently `NOT VALID`.
    pub not_valid: bool,
}

/// A foreign key constraint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,
    /// Local columns, in order.
    pub columns: Vec<String>,
    /// Referenced table.
    pub references_table: String,
    /// Referenced columns, in order.
    pub references_columns: Vec<String>,
    /// `ON DELETE` behavior.
    pub on_delete: OnDelete,
    /// Whether the constraint is currently `NOT VALID`.
    pub not_valid: bool,
}

/// `ON DELETE` behaviors for a foreign key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// `NO ACTION` (the default).
    NoAction,
    /// `RESTRICT`.
    Restrict,
    /// `CASCADE`.
    Cascade,
    /// `SET NULL`.
    SetNull,
    /// `SET DEFAULT`.
    SetDefault,
}

impl OnDelete {
    /// Parse from the wire representation used in migration documents,
    /// rejecting anything not recognized by PostgreSQL.
    pub fn parse(value: &str) -> MigrateResult<Self> {
        match value.to_ascii_uppercase().replace('-', "_").as_str() {
            "NO_ACTION" => Ok(Self::NoAction),
            "RESTRICT" => Ok(Self::Restrict),
            "CASCADE" => Ok(Self::Cascade),
            "SET_NULL" => Ok(Self::SetNull),
            "SET_DEFAULT" => Ok(Self::SetDefault),
            other => Err(MigrationError::InvalidOnDeleteSetting(other.to_string())),
        }
    }

    /// Render as the SQL keyword(s).
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        let mut table = Table::new("test_table");
        table.columns.insert("age".into(), Column::new("age", "integer"));
        table.columns.insert("city".into(), Column::new("city", "text"));
        table.columns.insert("name".into(), Column::new("name", "text"));
        table.columns.insert("nick".into(), Column::new("nick", "text"));
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
        table
    }

    #[test]
    fn schema_table_lookup_errors_are_typed() {
        let schema = Schema::new("public");
        let err = schema.table("missing").unwrap_err();
        assert!(matches!(err, MigrationError::TableDoesNotExist(ref n) if n == "missing"));
    }

    #[test]
    fn check_constraints_covering_matches_quoted_references() {
        let table = sample_table();
        let covering = table.check_constraints_covering(&["age"]);
        let names: Vec<_> = covering.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["adults", "new_york_adults"]);
    }

    #[test]
    fn check_constraints_covering_name_pair() {
        let table = sample_table();
        let covering = table.check_constraints_covering(&["name", "nick"]);
        assert_eq!(covering.len(), 1);
        assert_eq!(covering[0].name, "different_nick");
    }

    #[test]
    fn references_column_does_not_match_substrings() {
        assert!(!references_column("\"ages\" > 18", "age"));
        assert!(references_column("age > 18", "age"));
    }

    #[test]
    fn on_delete_round_trips() {
        assert_eq!(OnDelete::parse("cascade").unwrap().as_sql(), "CASCADE");
        assert_eq!(OnDelete::parse("SET_NULL").unwrap().as_sql(), "SET NULL");
        assert!(OnDelete::parse("bogus").is_err());
    }

    #[test]
    fn table_requires_primary_key_for_backfill() {
        let table = sample_table();
        assert!(!table.has_primary_key());
    }
}
