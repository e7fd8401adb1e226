//! SQLite dialect.
//!
//! Introspection goes through the table-valued `pragma_table_info` function
//! rather than `INFORMATION_SCHEMA` (SQLite has none); the column-name and
//! default-value fields are `name` and `dflt_value`. Attached-database
//! schema qualification is not a thing here, so both introspection queries
//! are the same statement.

use crate::{command::Parameter, Row, SqlValue};

use super::{assign_sized_value, Dialect, DialectKind};

#[derive(Debug)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn provider_name(&self) -> &'static str {
        "Sqlite"
    }

    fn default_sequence_name(&self) -> &'static str {
        "last_insert_rowid()"
    }

    fn identity_retrieval_statement(&self, sequence: &str) -> String {
        if sequence.is_empty() {
            "SELECT last_insert_rowid()".to_string()
        } else {
            format!("SELECT {sequence}")
        }
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
        assign_sized_value(p, value);
    }

    fn column_name_of(&self, schema_row: &Row) -> Option<String> {
        schema_row
            .get("name")
            .and_then(|v| v.as_str().map(ToString::to_string))
    }

    fn default_expression_of(&self, schema_row: &Row) -> Option<String> {
        schema_row
            .get("dflt_value")
            .and_then(|v| v.as_str().map(ToString::to_string))
    }

    fn table_with_schema_query(&self) -> String {
        self.table_without_schema_query()
    }

    fn table_without_schema_query(&self) -> String {
        format!(
            "SELECT * FROM pragma_table_info({})",
            self.prefix_parameter_name("0")
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn identity_reads_back_rowid() {
        let d = SqliteDialect;
        assert!(!d.sequence_value_before_insert());
        assert_eq!(
            d.identity_retrieval_statement(d.default_sequence_name()),
            "SELECT last_insert_rowid()"
        );
    }

    #[test]
    fn schema_rows_use_pragma_field_names() {
        let d = SqliteDialect;
        let row = crate::row! { "cid" => 1, "name" => "title", "dflt_value" => "'untitled'" };
        assert_eq!(d.column_name_of(&row), Some("title".to_string()));
        assert_eq!(
            d.default_value_of(&row),
            Some(SqlValue::Text("untitled".into()))
        );
    }

    #[test]
    fn paging_pair_uses_limit_offset() {
        let d = SqliteDialect;
        let pair = d.build_paging_query_pair("films", " ORDER BY ID", "", 30, 2);
        assert_eq!(
            pair.main_query,
            "SELECT {projection} FROM films ORDER BY ID LIMIT 30 OFFSET 30"
        );
    }
}
