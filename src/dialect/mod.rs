//! The per-dialect capability contract.
//!
//! Everything that differs between the five supported databases lives behind
//! [`Dialect`]: statement patterns, parameter naming, identity retrieval,
//! type coercions, cursor support, schema introspection queries and paging.
//! The table model and the parameter binder never special-case a database by
//! name; they only ask the dialect.

mod mysql;
mod oracle;
mod postgres;
mod sqlite;
mod sqlserver;

use std::fmt::Debug;

use chrono::{Local, Timelike};

use crate::{
    command::{ParamDirection, Parameter, SqlType},
    Command, Row, SqlValue,
};

pub use mysql::MySqlDialect;
pub use oracle::OracleDialect;
pub use postgres::PostgreSqlDialect;
pub use sqlite::SqliteDialect;
pub use sqlserver::SqlServerDialect;

/// Closed set of supported dialects, selected from the provider name carried
/// by the connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    SqlServer,
    PostgreSql,
    MySql,
    Oracle,
    Sqlite,
}

static SQL_SERVER: SqlServerDialect = SqlServerDialect;
static POSTGRE_SQL: PostgreSqlDialect = PostgreSqlDialect;
static MY_SQL: MySqlDialect = MySqlDialect;
static ORACLE: OracleDialect = OracleDialect;
static SQLITE: SqliteDialect = SqliteDialect;

impl DialectKind {
    /// Maps a provider identifier to a dialect. Accepts both short names
    /// ("postgres") and ADO-era provider ids ("npgsql",
    /// "system.data.sqlclient") so existing connection strings keep working.
    #[must_use]
    pub fn from_provider_name(provider_name: &str) -> Option<Self> {
        match provider_name.to_lowercase().as_str() {
            "sqlserver" | "mssql" | "system.data.sqlclient" | "microsoft.data.sqlclient" => {
                Some(Self::SqlServer)
            }
            "postgres" | "postgresql" | "npgsql" => Some(Self::PostgreSql),
            "mysql" | "mariadb" | "mysql.data.mysqlclient" | "devart.data.mysql" => {
                Some(Self::MySql)
            }
            "oracle" | "oracle.manageddataaccess.client" | "oracle.dataaccess.client" => {
                Some(Self::Oracle)
            }
            "sqlite" | "system.data.sqlite" | "microsoft.data.sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    #[must_use]
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            Self::SqlServer => &SQL_SERVER,
            Self::PostgreSql => &POSTGRE_SQL,
            Self::MySql => &MY_SQL,
            Self::Oracle => &ORACLE,
            Self::Sqlite => &SQLITE,
        }
    }
}

/// The count query and page query for one paged fetch. Two independent round
/// trips; the count can be stale relative to the page under concurrent
/// writers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingQueryPair {
    pub count_query: String,
    pub main_query: String,
}

pub trait Dialect: Send + Sync + Debug {
    fn kind(&self) -> DialectKind;

    /// Name used in capability error messages.
    fn provider_name(&self) -> &'static str;

    /// Sequence name assumed when the table binding does not specify one.
    /// Empty means "not sequenced" for this dialect.
    fn default_sequence_name(&self) -> &'static str {
        ""
    }

    /// Whether the identity/sequence value is obtained before the insert
    /// (pre-generated primary key) or read back after it (auto-increment).
    fn sequence_value_before_insert(&self) -> bool {
        false
    }

    /// Scalar statement yielding the generated primary-key value.
    fn identity_retrieval_statement(&self, sequence: &str) -> String;

    /// `SELECT {projection} FROM {source}...` pattern with the readied
    /// where/order-by clauses and the dialect-native limit syntax baked in.
    /// A `limit` of 0 means no limit.
    fn select_pattern(&self, limit: usize, where_clause: &str, order_by_clause: &str) -> String {
        format!(
            "SELECT {{projection}} FROM {{source}}{where_clause}{order_by_clause}{}",
            if limit > 0 {
                format!(" LIMIT {limit}")
            } else {
                String::new()
            }
        )
    }

    fn insert_pattern(&self) -> &'static str {
        "INSERT INTO {target} ({fields}) VALUES ({values})"
    }

    fn update_pattern(&self) -> &'static str {
        "UPDATE {target} SET {sets} "
    }

    fn delete_pattern(&self) -> &'static str {
        "DELETE FROM {target} "
    }

    fn count_pattern(&self) -> &'static str {
        "SELECT COUNT(*) FROM {source} "
    }

    /// `@name` or `:name`, whatever this dialect's drivers expect.
    fn prefix_parameter_name(&self, raw_name: &str) -> String;

    /// Inverse of [`Dialect::prefix_parameter_name`], for naming result
    /// parameters read back from a command.
    fn deprefix_parameter_name(&self, db_param_name: &str) -> String;

    /// Assigns a non-null value, applying per-dialect coercions (GUIDs as
    /// 36-char strings where the driver has no native GUID type, size hints
    /// for large strings and blobs). Nulls are handled in shared binder
    /// code, not here.
    fn set_value(&self, p: &mut Parameter, value: SqlValue) {
        assign_value(p, value);
    }

    /// Reads a result value back, undoing [`Dialect::set_value`] coercions.
    fn get_value(&self, p: &Parameter) -> SqlValue {
        p.value.clone()
    }

    /// Applies the direction, correcting provider quirks.
    fn set_direction(&self, p: &mut Parameter, direction: ParamDirection) {
        p.direction = direction;
    }

    /// Marks the parameter anonymous. False when the provider has no
    /// unnamed-parameter support, which must surface as an error upstream.
    fn set_anonymous_parameter(&self, p: &mut Parameter) -> bool {
        let _ = p;
        false
    }

    /// Whether the driver infers output parameter types regardless of any
    /// declared type. When true, a null output parameter needs no type hint.
    fn ignores_output_types(&self) -> bool {
        false
    }

    /// Types the parameter as a cursor, optionally carrying an existing
    /// cursor handle for call chaining. False when unsupported.
    fn set_cursor(&self, p: &mut Parameter, existing: Option<String>) -> bool {
        let _ = (p, existing);
        false
    }

    fn is_cursor(&self, p: &Parameter) -> bool {
        p.ty == Some(SqlType::Cursor)
    }

    /// True exactly when the command must run inside a wrapping transaction.
    /// The PostgreSQL implementation also strips cursor placeholder
    /// parameters from the command here; they exist only to request the
    /// transaction.
    fn requires_wrapping_transaction(&self, cmd: &mut Command) -> bool {
        let _ = cmd;
        false
    }

    /// Maps `sum`/`max`/`min`/`avg` (lower case) to the dialect's SQL
    /// function, or None when unsupported.
    fn aggregate_function(&self, aggregate: &str) -> Option<&'static str> {
        match aggregate {
            "sum" => Some("SUM"),
            "max" => Some("MAX"),
            "min" => Some("MIN"),
            "avg" => Some("AVG"),
            _ => None,
        }
    }

    /// Column name field of one schema-introspection row.
    fn column_name_of(&self, schema_row: &Row) -> Option<String> {
        schema_row
            .get_ignore_case("COLUMN_NAME")
            .and_then(|v| v.as_str().map(ToString::to_string))
    }

    /// Raw default-value expression of one schema-introspection row.
    fn default_expression_of(&self, schema_row: &Row) -> Option<String> {
        schema_row
            .get_ignore_case("COLUMN_DEFAULT")
            .and_then(|v| v.as_str().map(ToString::to_string))
    }

    /// Parsed per-column default, from the raw default expression.
    fn default_value_of(&self, schema_row: &Row) -> Option<SqlValue> {
        self.default_expression_of(schema_row)
            .and_then(|raw| parse_default_expression(&raw))
    }

    /// Hook for dialects whose introspection rows need reshaping.
    fn post_process_schema(&self, rows: Vec<Row>) -> Vec<Row> {
        rows
    }

    /// Introspection query for `schema.table`, parameters `0` (table) and
    /// `1` (schema).
    fn table_with_schema_query(&self) -> String;

    /// Introspection query for a bare table name, parameter `0`.
    fn table_without_schema_query(&self) -> String;

    /// Wraps the core select as a counted subquery and appends the
    /// dialect's paging syntax. `current_page` is 1-based.
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
            main_query: format!("{core} LIMIT {page_size} OFFSET {page_start}"),
        }
    }
}

/// Shared value assignment: records the value and its resolved type on the
/// parameter. Dialect overrides call this after their own coercions.
pub(crate) fn assign_value(p: &mut Parameter, value: SqlValue) {
    p.ty = value.sql_type();
    p.value = value;
}

/// String/blob size hints the way ADO providers expect them: large strings
/// switch to the unbounded marker to avoid truncation.
pub(crate) fn assign_sized_value(p: &mut Parameter, value: SqlValue) {
    match &value {
        SqlValue::Text(s) => {
            p.size = Some(if s.len() > 4000 { -1 } else { 4000 });
        }
        SqlValue::Bytes(b) => {
            p.size = Some(i32::try_from(b.len()).unwrap_or(-1));
        }
        _ => {}
    }
    assign_value(p, value);
}

/// GUID-as-string coercion for providers without a native GUID parameter
/// type.
pub(crate) fn assign_guid_as_string(p: &mut Parameter, value: SqlValue) -> bool {
    if let SqlValue::Guid(guid) = value {
        assign_value(p, SqlValue::Text(guid.to_string()));
        p.ty = Some(SqlType::Guid);
        p.size = Some(36);
        true
    } else {
        false
    }
}

/// Parses a schema default-value expression into a concrete value: known
/// date/time keywords, quoted string literals, numeric and boolean
/// literals. Parentheses are unwrapped. Unparseable expressions come back
/// as their bare text.
pub(crate) fn parse_default_expression(raw: &str) -> Option<SqlValue> {
    let mut text = raw.trim();
    if text.is_empty() {
        return None;
    }
    while text.starts_with('(') && text.ends_with(')') && text.len() >= 2 {
        text = text[1..text.len() - 1].trim();
    }
    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        return None;
    }

    let lowered = text.to_lowercase();
    match lowered.as_str() {
        "current_date" => {
            let today = Local::now().date_naive();
            return Some(SqlValue::DateTime(today.and_hms_opt(0, 0, 0)?));
        }
        "current_time" => {
            let now = Local::now().time();
            return Some(SqlValue::Text(format!(
                "{:02}:{:02}:{:02}",
                now.hour(),
                now.minute(),
                now.second()
            )));
        }
        "current_timestamp" | "now()" | "getdate()" | "sysdate" => {
            return Some(SqlValue::DateTime(Local::now().naive_local()));
        }
        "true" => return Some(SqlValue::Bool(true)),
        "false" => return Some(SqlValue::Bool(false)),
        _ => {}
    }

    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        return Some(SqlValue::Text(text[1..text.len() - 1].replace("''", "'")));
    }
    if let Ok(int) = text.parse::<i64>() {
        return Some(SqlValue::Int(int));
    }
    if let Ok(real) = text.parse::<f64>() {
        return Some(SqlValue::Real(real));
    }

    Some(SqlValue::Text(text.to_string()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn provider_names_resolve_to_dialects() {
        assert_eq!(
            DialectKind::from_provider_name("Npgsql"),
            Some(DialectKind::PostgreSql)
        );
        assert_eq!(
            DialectKind::from_provider_name("System.Data.SqlClient"),
            Some(DialectKind::SqlServer)
        );
        assert_eq!(
            DialectKind::from_provider_name("sqlite"),
            Some(DialectKind::Sqlite)
        );
        assert_eq!(DialectKind::from_provider_name("db2"), None);
    }

    #[test]
    fn default_expressions_parse() {
        assert_eq!(parse_default_expression(""), None);
        assert_eq!(parse_default_expression("NULL"), None);
        assert_eq!(parse_default_expression("((0))"), Some(SqlValue::Int(0)));
        assert_eq!(
            parse_default_expression("'it''s'"),
            Some(SqlValue::Text("it's".into()))
        );
        assert_eq!(parse_default_expression("2.5"), Some(SqlValue::Real(2.5)));
        assert!(matches!(
            parse_default_expression("(current_date)"),
            Some(SqlValue::DateTime(_))
        ));
        assert_eq!(
            parse_default_expression("nextval('films_id_seq')"),
            Some(SqlValue::Text("nextval('films_id_seq')".into()))
        );
    }

    #[test]
    fn aggregates_map_uniformly() {
        for kind in [
            DialectKind::SqlServer,
            DialectKind::PostgreSql,
            DialectKind::MySql,
            DialectKind::Oracle,
            DialectKind::Sqlite,
        ] {
            let d = kind.dialect();
            assert_eq!(d.aggregate_function("sum"), Some("SUM"));
            assert_eq!(d.aggregate_function("avg"), Some("AVG"));
            assert_eq!(d.aggregate_function("median"), None);
        }
    }
}
