//! PostgreSQL dialect.
//!
//! The most capable of the five: anonymous parameters, inferred output
//! types, ref-cursor parameters. Cursor commands must run inside a wrapping
//! transaction for the cursors to stay valid across FETCH round trips, so
//! [`Dialect::requires_wrapping_transaction`] answers true for them — and
//! strips the placeholder parameters, which exist only to request that
//! transaction.

use crate::{
    command::{ParamDirection, Parameter, SqlType},
    Command, Cursor, SqlValue,
};

use super::{assign_guid_as_string, assign_sized_value, Dialect, DialectKind};

#[derive(Debug)]
pub struct PostgreSqlDialect;

impl Dialect for PostgreSqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::PostgreSql
    }

    fn provider_name(&self) -> &'static str {
        "PostgreSql"
    }

    // pre-generated primary keys: nextval() first, inject into the insert
    fn sequence_value_before_insert(&self) -> bool {
        true
    }

    fn identity_retrieval_statement(&self, sequence: &str) -> String {
        format!("SELECT nextval('{sequence}')")
    }

    fn prefix_parameter_name(&self, raw_name: &str) -> String {
        format!(":{raw_name}")
    }

    fn deprefix_parameter_name(&self, db_param_name: &str) -> String {
        db_param_name
            .strip_prefix(':')
            .unwrap_or(db_param_name)
            .to_string()
    }

    fn set_value(&self, p: &mut Parameter, value: SqlValue) {
        // no native GUID parameter support
        if assign_guid_as_string(p, value.clone()) {
            return;
        }
        assign_sized_value(p, value);
    }

    fn get_value(&self, p: &Parameter) -> SqlValue {
        if p.ty == Some(SqlType::Guid) {
            if let SqlValue::Text(text) = &p.value {
                if let Ok(guid) = uuid::Uuid::parse_str(text) {
                    return SqlValue::Guid(guid);
                }
            }
        }
        p.value.clone()
    }

    fn set_direction(&self, p: &mut Parameter, direction: ParamDirection) {
        // Npgsql-style providers hand function return values back through
        // output parameters; a declared ReturnValue direction never fires
        p.direction = if direction == ParamDirection::ReturnValue {
            ParamDirection::Output
        } else {
            direction
        };
    }

    fn set_anonymous_parameter(&self, p: &mut Parameter) -> bool {
        p.name = String::new();
        true
    }

    fn ignores_output_types(&self) -> bool {
        true
    }

    fn set_cursor(&self, p: &mut Parameter, existing: Option<String>) -> bool {
        p.ty = Some(SqlType::Cursor);
        p.value = SqlValue::Cursor(match existing {
            Some(handle) => Cursor::handle(handle),
            None => Cursor::output(),
        });
        true
    }

    fn requires_wrapping_transaction(&self, cmd: &mut Command) -> bool {
        let had_cursors = cmd.params.iter().any(|p| self.is_cursor(p));
        if had_cursors {
            cmd.params.retain(|p| !self.is_cursor(p));
        }
        had_cursors
    }

    fn table_with_schema_query(&self) -> String {
        format!(
            "SELECT * FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = {} AND TABLE_SCHEMA = {}",
            self.prefix_parameter_name("0"),
            self.prefix_parameter_name("1")
        )
    }

    fn table_without_schema_query(&self) -> String {
        format!(
            "SELECT * FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = {}",
            self.prefix_parameter_name("0")
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn select_pattern_uses_limit() {
        let d = PostgreSqlDialect;
        assert_eq!(
            d.select_pattern(5, " WHERE a = :0", " ORDER BY a"),
            "SELECT {projection} FROM {source} WHERE a = :0 ORDER BY a LIMIT 5"
        );
        assert_eq!(
            d.select_pattern(0, "", ""),
            "SELECT {projection} FROM {source}"
        );
    }

    #[test]
    fn paging_pair_wraps_core_query() {
        let d = PostgreSqlDialect;
        let pair = d.build_paging_query_pair("films", " ORDER BY \"ID\"", "", 30, 2);
        assert_eq!(
            pair.count_query,
            "SELECT COUNT(*) FROM (SELECT * FROM films ORDER BY \"ID\") q"
        );
        assert_eq!(
            pair.main_query,
            "SELECT {projection} FROM films ORDER BY \"ID\" LIMIT 30 OFFSET 30"
        );
    }

    #[test]
    fn wrapping_transaction_strips_cursor_placeholders() {
        let d = PostgreSqlDialect;
        let mut cmd = Command::new("SELECT * FROM fn()");
        cmd.add_param(
            &d,
            SqlValue::Cursor(Cursor::output()),
            Some("c"),
            ParamDirection::Output,
            None,
        )
        .unwrap();
        cmd.add_param(&d, SqlValue::Int(1), Some("x"), ParamDirection::Input, None)
            .unwrap();

        assert!(d.requires_wrapping_transaction(&mut cmd));
        assert_eq!(cmd.params.len(), 1);
        assert_eq!(cmd.params[0].name, ":x");

        // idempotent once stripped
        assert!(!d.requires_wrapping_transaction(&mut cmd));
    }

    #[test]
    fn prefix_roundtrip() {
        let d = PostgreSqlDialect;
        assert_eq!(d.prefix_parameter_name("0"), ":0");
        assert_eq!(d.deprefix_parameter_name(":total"), "total");
    }

    #[test]
    fn guid_value_roundtrips_through_string_coercion() {
        let d = PostgreSqlDialect;
        let id = uuid::Uuid::new_v4();
        let mut cmd = Command::new("");
        cmd.add_param(&d, SqlValue::Guid(id), Some("id"), ParamDirection::InputOutput, None)
            .unwrap();
        assert_eq!(d.get_value(&cmd.params[0]), SqlValue::Guid(id));
    }
}
