//! Oracle dialect.
//!
//! Sequenced primary keys (`seq.NEXTVAL` before the insert), ref-cursor
//! parameters, `FETCH FIRST` row limiting (12c+), and `USER_TAB_COLUMNS` /
//! `ALL_TAB_COLUMNS` introspection instead of `INFORMATION_SCHEMA`.

use crate::{
    command::{Parameter, SqlType},
    Cursor, Row, SqlValue,
};

use super::{assign_guid_as_string, assign_sized_value, Dialect, DialectKind, PagingQueryPair};

#[derive(Debug)]
pub struct OracleDialect;

impl Dialect for OracleDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Oracle
    }

    fn provider_name(&self) -> &'static str {
        "Oracle"
    }

    fn sequence_value_before_insert(&self) -> bool {
        true
    }

    fn identity_retrieval_statement(&self, sequence: &str) -> String {
        format!("SELECT {sequence}.NEXTVAL FROM DUAL")
    }

    fn select_pattern(&self, limit: usize, where_clause: &str, order_by_clause: &str) -> String {
        format!(
            "SELECT {{projection}} FROM {{source}}{where_clause}{order_by_clause}{}",
            if limit > 0 {
                format!(" FETCH FIRST {limit} ROWS ONLY")
            } else {
                String::new()
            }
        )
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

    fn set_cursor(&self, p: &mut Parameter, existing: Option<String>) -> bool {
        p.ty = Some(SqlType::Cursor);
        p.value = SqlValue::Cursor(match existing {
            Some(handle) => Cursor::handle(handle),
            None => Cursor::output(),
        });
        true
    }

    fn default_expression_of(&self, schema_row: &Row) -> Option<String> {
        schema_row
            .get_ignore_case("DATA_DEFAULT")
            .and_then(|v| v.as_str().map(ToString::to_string))
    }

    fn table_with_schema_query(&self) -> String {
        format!(
            "SELECT * FROM ALL_TAB_COLUMNS WHERE TABLE_NAME = {} AND OWNER = {}",
            self.prefix_parameter_name("0"),
            self.prefix_parameter_name("1")
        )
    }

    fn table_without_schema_query(&self) -> String {
        format!(
            "SELECT * FROM USER_TAB_COLUMNS WHERE TABLE_NAME = {}",
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
            count_query: format!(
                "SELECT COUNT(*) FROM ({}) q",
                core.replace("{projection}", "*")
            ),
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
    fn select_pattern_uses_fetch_first() {
        let d = OracleDialect;
        assert_eq!(
            d.select_pattern(1, "", " ORDER BY ID"),
            "SELECT {projection} FROM {source} ORDER BY ID FETCH FIRST 1 ROWS ONLY"
        );
    }

    #[test]
    fn sequences_generate_before_insert() {
        let d = OracleDialect;
        assert!(d.sequence_value_before_insert());
        assert_eq!(
            d.identity_retrieval_statement("films_seq"),
            "SELECT films_seq.NEXTVAL FROM DUAL"
        );
    }

    #[test]
    fn cursor_parameters_supported() {
        let d = OracleDialect;
        let mut p = Parameter {
            name: ":c".into(),
            value: SqlValue::Null,
            direction: crate::ParamDirection::Output,
            ty: None,
            size: None,
        };
        assert!(d.set_cursor(&mut p, None));
        assert!(d.is_cursor(&p));
    }

    #[test]
    fn introspection_reads_data_default() {
        let d = OracleDialect;
        let row = crate::row! { "COLUMN_NAME" => "NAME", "DATA_DEFAULT" => "'n/a'" };
        assert_eq!(d.column_name_of(&row), Some("NAME".to_string()));
        assert_eq!(
            d.default_value_of(&row),
            Some(SqlValue::Text("n/a".into()))
        );
    }
}
