//! Trigger Synthesizer — generates the pair of row-level triggers that
//! keep an old and new physical column pair in sync while a migration is
//! active.
//!
//! See spec §4.3. Two `BEFORE INSERT OR UPDATE` triggers are installed per
//! altered column:
//!
//! - **up** (old → new): fires on writes through the old view, assigns the
//!   result of the user's `up` SQL to the shadow column.
//! - **down** (new → old): fires on writes through the new view, assigns
//!   the result of `down` SQL to the original column.
//!
//! A per-session GUC flag prevents up → down → up recursion: each trigger
//! sets the flag before writing the paired column and returns immediately
//! if it finds the flag already set on entry.

use crate::identifiers::{quote_ident, quote_qualified, trigger_function_name, trigger_name};

/// Direction a synchronization trigger propagates writes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Old physical column → new (shadow) physical column.
    Up,
    /// New (shadow) physical column → old physical column.
    Down,
}

impl Direction {
    fn guc_key(self) -> &'static str {
        match self {
            Direction::Up => "pgroll.propagate_up",
            Direction::Down => "pgroll.propagate_down",
        }
    }

    /// The GUC the *other* direction's trigger must check, so that a
    /// write propagated by this trigger does not re-trigger itself.
    fn paired_guc_key(self) -> &'static str {
        match self {
            Direction::Up => "pgroll.propagate_down",
            Direction::Down => "pgroll.propagate_up",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

/// DDL statements to create and drop one synchronization trigger (and its
/// backing function).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDdl {
    /// Name shared by the trigger and its function.
    pub name: String,
    /// Statement(s) that create the function and the trigger.
    pub create: String,
    /// Statement that drops the trigger's function with `CASCADE`,
    /// removing the trigger along with it.
    pub drop: String,
}

/// Both triggers installed for one migrated column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPair {
    /// Old → new propagation trigger.
    pub up: TriggerDdl,
    /// New → old propagation trigger.
    pub down: TriggerDdl,
}

/// Build the up/down trigger pair for `table`, propagating writes between
/// `old_column` and `new_column` (the shadow column's physical name).
///
/// `up_expr`/`down_expr` are the user-supplied PL/pgSQL expressions,
/// evaluated with the row's old column values available as local
/// variables named for each column. `None` falls back to the identity
/// expression (`NEW.<old_column>`), used for rename-only changes per
/// spec §4.3.
pub fn synthesize(
    schema: &str,
    table: &str,
    old_column: &str,
    new_column: &str,
    up_expr: Option<&str>,
    down_expr: Option<&str>,
) -> TriggerPair {
    let up_name = trigger_name(table, &format!("{old_column}_up"));
    let down_name = trigger_name(table, &format!("{old_column}_down"));

    let up = build_trigger_ddl(
        schema,
        table,
        &up_name,
        Direction::Up,
        new_column,
        up_expr.unwrap_or(&format!("NEW.{}", quote_ident(old_column))),
    );
    let down = build_trigger_ddl(
        schema,
        table,
        &down_name,
        Direction::Down,
        old_column,
        down_expr.unwrap_or(&format!("NEW.{}", quote_ident(new_column))),
    );

    TriggerPair { up, down }
}

fn build_trigger_ddl(
    schema: &str,
    table: &str,
    name: &str,
    direction: Direction,
    target_column: &str,
    expr: &str,
) -> TriggerDdl {
    let function_name = trigger_function_name(table, &format!("{target_column}_{}", direction.suffix()));
    let qualified_function = quote_qualified(schema, &function_name);
    let qualified_table = quote_qualified(schema, table);
    let own_guc = direction.guc_key();
    let paired_guc = direction.paired_guc_key();

    let create = format!(
        "CREATE OR REPLACE FUNCTION {qualified_function}() RETURNS TRIGGER AS $$\n\
         BEGIN\n\
         \x20 IF current_setting('{paired_guc}', true) = 'on' THEN\n\
         \x20   RETURN NEW;\n\
         \x20 END IF;\n\
         \x20 PERFORM set_config('{own_guc}', 'on', true);\n\
         \x20 NEW.{target_column} := {expr};\n\
         \x20 PERFORM set_config('{own_guc}', 'off', true);\n\
         \x20 RETURN NEW;\n\
         END;\n\
         $$ LANGUAGE plpgsql;\n\
         CREATE TRIGGER {trigger_name} BEFORE INSERT OR UPDATE ON {qualified_table}\n\
         FOR EACH ROW EXECUTE FUNCTION {qualified_function}();",
        target_column = quote_ident(target_column),
        trigger_name = quote_ident(name),
    );

    let drop = format!("DROP FUNCTION IF EXISTS {qualified_function}() CASCADE;");

    TriggerDdl {
        name: name.to_string(),
        create,
        drop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_names_follow_the_shared_template() {
        let pair = synthesize("public", "users", "name", "_pgroll_new_name", None, None);
        assert_eq!(pair.up.name, "_pgroll_trigger_users_name_up");
        assert_eq!(pair.down.name, "_pgroll_trigger_users_name_down");
    }

    #[test]
    fn identity_expression_used_for_rename_only() {
        let pair = synthesize("public", "users", "title", "_pgroll_new_title", None, None);
        assert!(pair.up.create.contains("NEW.\"_pgroll_new_title\" := NEW.\"title\""));
        assert!(pair.down.create.contains("NEW.\"title\" := NEW.\"_pgroll_new_title\""));
    }

    #[test]
    fn custom_up_expression_is_embedded() {
        let pair = synthesize(
            "public",
            "users",
            "name",
            "_pgroll_new_name",
            Some("COALESCE(NEW.name, 'placeholder')"),
            None,
        );
        assert!(pair
            .up
            .create
            .contains("NEW.\"_pgroll_new_name\" := COALESCE(NEW.name, 'placeholder')"));
    }

    #[test]
    fn loop_prevention_checks_the_paired_guc() {
        let pair = synthesize("public", "users", "name", "_pgroll_new_name", None, None);
        assert!(pair.up.create.contains("current_setting('pgroll.propagate_down', true)"));
        assert!(pair.up.create.contains("set_config('pgroll.propagate_up'"));
        assert!(pair.down.create.contains("current_setting('pgroll.propagate_up', true)"));
        assert!(pair.down.create.contains("set_config('pgroll.propagate_down'"));
    }

    #[test]
    fn drop_uses_cascade_to_remove_trigger_with_function() {
        let pair = synthesize("public", "users", "name", "_pgroll_new_name", None, None);
        assert!(pair.up.drop.ends_with("CASCADE;"));
        assert!(pair.up.drop.contains("DROP FUNCTION IF EXISTS"));
    }
}
