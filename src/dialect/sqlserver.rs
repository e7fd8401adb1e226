//! SQL Server dialect.

use crate::{command::Parameter, SqlValue};

use super::{assign_sized_value, Dialect, DialectKind, PagingQueryPair};

#[derive(Debug)]
pub struct SqlServerDialect;

impl Dialect for SqlServerDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::SqlServer
    }

    fn provider_name(&self) -> &'static str {
        "SqlServer"
    }

    // sentinel: anything non-empty triggers post-insert identity readback
    fn default_sequence_name(&self) -> &'static str {
        "SCOPE_IDENTITY()"
    }

    fn identity_retrieval_statement(&self, sequence: &str) -> String {
        if sequence.is_empty() {
            "SELECT SCOPE_IDENTITY()".to_string()
        } else {
            format!("SELECT {sequence}")
        }
    }

    fn select_pattern(&self, limit: usize, where_clause: &str, order_by_clause: &str) -> String {
        let top = if limit > 0 {
            format!("TOP {limit} ")
        } else {
            String::new()
        };
        format!("SELECT {top}{{projection}} FROM {{source}}{where_clause}{order_by_clause}")
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

    fn table_without_schema_query(&self) -> String {
        format!(
            "SELECT * FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = {}",
            self.prefix_parameter_name("0")
        )
    }

    fn build_paging_query_pair(
        &self,
        source: &str,
        order_by_clause: &str,
        where_clause: &str,
        page_size: usize,
        current_page: usize,
    ) -> PagingQueryPair {
        let core = self
            .select_pattern(0, where_clause, order_by_clause)
            .replace("{source}", source);
        let page_start = (current_page.saturating_sub(1)) * page_size;
        PagingQueryPair {
            // ORDER BY is not valid inside a counted subquery here
            count_query: format!("SELECT COUNT(*) FROM (SELECT * FROM {source}{where_clause}) q"),
            main_query: format!(
                "{core} OFFSET {page_start} ROWS FETCH NEXT {page_size} ROWS ONLY"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn select_pattern_uses_top() {
        let d = SqlServerDialect;
        assert_eq!(
            d.select_pattern(1, " WHERE a = @0", " ORDER BY a"),
            "SELECT TOP 1 {projection} FROM {source} WHERE a = @0 ORDER BY a"
        );
    }

    #[test]
    fn paging_uses_offset_fetch() {
        let d = SqlServerDialect;
        let pair = d.build_paging_query_pair("films", " ORDER BY ID", "", 30, 2);
        assert_eq!(
            pair.main_query,
            "SELECT {projection} FROM films ORDER BY ID OFFSET 30 ROWS FETCH NEXT 30 ROWS ONLY"
        );
        assert_eq!(pair.count_query, "SELECT COUNT(*) FROM (SELECT * FROM films) q");
    }

    #[test]
    fn identity_statement_defaults_to_scope_identity() {
        let d = SqlServerDialect;
        assert!(!d.sequence_value_before_insert());
        assert_eq!(
            d.identity_retrieval_statement(d.default_sequence_name()),
            "SELECT SCOPE_IDENTITY()"
        );
    }
}
