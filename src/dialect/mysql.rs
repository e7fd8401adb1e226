//! MySQL / MariaDB dialect.

use crate::{command::Parameter, SqlValue};

use super::{assign_sized_value, Dialect, DialectKind};

#[derive(Debug)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn provider_name(&self) -> &'static str {
        "MySql"
    }

    fn default_sequence_name(&self) -> &'static str {
        "LAST_INSERT_ID()"
    }

    fn identity_retrieval_statement(&self, sequence: &str) -> String {
        if sequence.is_empty() {
            "SELECT LAST_INSERT_ID()".to_string()
        } else {
            format!("SELECT {sequence}")
        }
    }

    fn prefix_parameter_name(&self, raw_name: &str) -> String {
        format!("@{raw_name}")
    }

    fn deprefix_parameter_name(&self, db_param_name: &str) -> String {
        db_param_name
            .strip_prefix('@')
            .unwrap_or(db_param_name)
            .to_string()
    }

    fn set_value(&self, p: &mut Parameter, value: SqlValue) {
        assign_sized_value(p, value);
    }

    fn table_with_schema_query(&self) -> String {
        format!(
            "SELECT * FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = {} AND TABLE_SCHEMA = {}",
            self.prefix_parameter_name("0"),
            self.prefix_parameter_name("1")
        )
    }

    // constrain to the connected database; other schemas can shadow the name
    fn table_without_schema_query(&self) -> String {
        format!(
            "SELECT * FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_NAME = {} AND TABLE_SCHEMA = DATABASE()",
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
        let d = MySqlDialect;
        assert_eq!(
            d.select_pattern(3, "", " ORDER BY id"),
            "SELECT {projection} FROM {source} ORDER BY id LIMIT 3"
        );
    }

    #[test]
    fn identity_reads_back_after_insert() {
        let d = MySqlDialect;
        assert!(!d.sequence_value_before_insert());
        assert_eq!(
            d.identity_retrieval_statement(d.default_sequence_name()),
            "SELECT LAST_INSERT_ID()"
        );
    }

    #[test]
    fn paging_pair_uses_limit_offset() {
        let d = MySqlDialect;
        let pair = d.build_paging_query_pair("films", " ORDER BY id", "", 10, 1);
        assert_eq!(
            pair.main_query,
            "SELECT {projection} FROM films ORDER BY id LIMIT 10 OFFSET 0"
        );
    }
}
