//! Method-name query dispatch.
//!
//! The original surface let callers invent methods like
//! `FindByTitle(title: "x", orderby: "Year")` at runtime. Here that becomes
//! an explicit parse step: a method-name string plus named arguments turn
//! into a [`MethodCall`] — a tagged request against the closed set of query
//! operations — which [`crate::Table::invoke`] executes. Reserved argument
//! names `where`, `orderby`, `columns` and `args` shape the query; every
//! other name becomes an equality predicate ANDed into the WHERE clause and
//! bound as a named parameter. Arguments must be named; there is no
//! positional form to disambiguate against the reserved keys.

use crate::{builder::ready_where_clause, dialect::Dialect, DbError, SqlValue};

/// One named argument value: a single value or, for the `args` key, a list
/// of positional WHERE arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    One(SqlValue),
    Many(Vec<SqlValue>),
}

impl From<SqlValue> for ArgValue {
    fn from(value: SqlValue) -> Self {
        Self::One(value)
    }
}

impl From<Vec<SqlValue>> for ArgValue {
    fn from(values: Vec<SqlValue>) -> Self {
        Self::Many(values)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::One(SqlValue::Text(value.to_string()))
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::One(SqlValue::Text(value))
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::One(SqlValue::Int(value))
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        Self::One(SqlValue::Int(i64::from(value)))
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        Self::One(SqlValue::Real(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::One(SqlValue::Bool(value))
    }
}

/// Which of the closed query operations a parsed call routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodOp {
    FetchMany,
    FetchOne,
    Count,
    /// Carries the lower-case aggregate name (`sum`, `max`, `min`, `avg`).
    Aggregate(&'static str),
}

/// A parsed dynamic query request.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub op: MethodOp,
    /// Readied WHERE fragment (predicates plus any raw `where` argument).
    pub where_clause: String,
    /// Readied ORDER BY fragment; defaults to ascending primary key, or
    /// descending for `Last*` calls.
    pub order_by_clause: String,
    pub columns: String,
    /// Equality-predicate values, bound by column name.
    pub named_params: Vec<(String, SqlValue)>,
    /// Positional values for the raw `where` fragment.
    pub args: Vec<SqlValue>,
}

impl MethodCall {
    /// Parses a method name and its named arguments.
    ///
    /// # Errors
    ///
    /// * [`DbError::Shape`] for unnamed arguments, or reserved keys with
    ///   the wrong shape of value.
    pub fn parse(
        dialect: &dyn Dialect,
        primary_key: &str,
        method: &str,
        named_args: Vec<(String, ArgValue)>,
    ) -> Result<Self, DbError> {
        let mut columns = "*".to_string();
        let mut order_by_clause = format!(" ORDER BY {primary_key}");
        let mut where_predicates: Vec<String> = vec![];
        let mut named_params = vec![];
        let mut args = vec![];

        for (name, value) in named_args {
            if name.is_empty() {
                return Err(DbError::Shape(
                    "use named arguments for dynamic queries — the column name, orderby, \
                     columns, args, etc"
                        .to_string(),
                ));
            }
            match name.to_lowercase().as_str() {
                "orderby" => {
                    order_by_clause = format!(" ORDER BY {}", expect_text(&name, value)?);
                }
                "columns" => columns = expect_text(&name, value)?,
                "where" => {
                    // raw WHERE fragment; the keyword comes off so it can
                    // join the AND chain
                    let readied = ready_where_clause(&expect_text(&name, value)?);
                    let mut predicate = readied.trim_start();
                    if predicate.len() >= 5
                        && predicate.as_bytes()[..5].eq_ignore_ascii_case(b"where")
                    {
                        predicate = predicate[5..].trim_start();
                    }
                    where_predicates.push(format!("( {predicate} )"));
                }
                "args" => match value {
                    ArgValue::Many(values) => args = values,
                    ArgValue::One(value) => args = vec![value],
                },
                _ => {
                    let ArgValue::One(value) = value else {
                        return Err(DbError::Shape(format!(
                            "predicate argument '{name}' requires a single value"
                        )));
                    };
                    where_predicates.push(format!(
                        "{name} = {}",
                        dialect.prefix_parameter_name(&name)
                    ));
                    named_params.push((name, value));
                }
            }
        }

        let where_clause = if where_predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_predicates.join(" AND "))
        };

        let lowered = method.to_lowercase();
        let op = match lowered.as_str() {
            "count" => MethodOp::Count,
            "sum" => MethodOp::Aggregate("sum"),
            "max" => MethodOp::Aggregate("max"),
            "min" => MethodOp::Aggregate("min"),
            "avg" => MethodOp::Aggregate("avg"),
            _ => {
                let just_one = ["First", "Last", "Get", "Find", "Single"]
                    .iter()
                    .any(|prefix| method.starts_with(prefix));
                // pk sort is the default; Last* reverses it
                if method.starts_with("Last") {
                    order_by_clause.push_str(" DESC");
                }
                if just_one {
                    MethodOp::FetchOne
                } else {
                    MethodOp::FetchMany
                }
            }
        };

        Ok(Self {
            op,
            where_clause,
            order_by_clause,
            columns,
            named_params,
            args,
        })
    }
}

fn expect_text(name: &str, value: ArgValue) -> Result<String, DbError> {
    match value {
        ArgValue::One(SqlValue::Text(text)) => Ok(text),
        _ => Err(DbError::Shape(format!(
            "argument '{name}' requires a string value"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dialect::DialectKind;

    fn parse(method: &str, named: Vec<(String, ArgValue)>) -> Result<MethodCall, DbError> {
        MethodCall::parse(DialectKind::PostgreSql.dialect(), "ID", method, named)
    }

    #[test]
    fn plain_name_fetches_many_ordered_by_pk() {
        let call = parse("Films", vec![]).unwrap();
        assert_eq!(call.op, MethodOp::FetchMany);
        assert_eq!(call.order_by_clause, " ORDER BY ID");
        assert_eq!(call.where_clause, "");
    }

    #[test]
    fn single_prefixes_fetch_one_and_last_reverses() {
        for method in ["FirstFilm", "GetFilm", "FindFilm", "SingleFilm"] {
            let call = parse(method, vec![]).unwrap();
            assert_eq!(call.op, MethodOp::FetchOne, "{method}");
            assert_eq!(call.order_by_clause, " ORDER BY ID");
        }
        let call = parse("LastFilm", vec![]).unwrap();
        assert_eq!(call.op, MethodOp::FetchOne);
        assert_eq!(call.order_by_clause, " ORDER BY ID DESC");
    }

    #[test]
    fn other_named_arguments_become_anded_predicates() {
        let call = parse(
            "FindBy",
            vec![
                ("rental_duration".to_string(), 5i64.into()),
                ("rating".to_string(), "PG".into()),
            ],
        )
        .unwrap();
        assert_eq!(
            call.where_clause,
            " WHERE rental_duration = :rental_duration AND rating = :rating"
        );
        assert_eq!(call.named_params.len(), 2);
    }

    #[test]
    fn reserved_keys_shape_the_query() {
        let call = parse(
            "Films",
            vec![
                ("orderby".to_string(), "title DESC".into()),
                ("columns".to_string(), "title, rating".into()),
                ("where".to_string(), "WHERE rental_duration > :0".into()),
                ("args".to_string(), vec![SqlValue::Int(3)].into()),
            ],
        )
        .unwrap();
        assert_eq!(call.order_by_clause, " ORDER BY title DESC");
        assert_eq!(call.columns, "title, rating");
        assert_eq!(call.where_clause, " WHERE ( rental_duration > :0 )");
        assert_eq!(call.args, vec![SqlValue::Int(3)]);
    }

    #[test]
    fn predicates_combine_with_raw_where() {
        let call = parse(
            "Films",
            vec![
                ("rating".to_string(), "PG".into()),
                ("where".to_string(), "rental_duration > :0".into()),
            ],
        )
        .unwrap();
        assert_eq!(
            call.where_clause,
            " WHERE rating = :rating AND ( rental_duration > :0 )"
        );
    }

    #[test]
    fn unnamed_arguments_are_rejected() {
        let err = parse("Films", vec![(String::new(), 5i64.into())]).unwrap_err();
        assert!(matches!(err, DbError::Shape(_)));
    }

    #[test]
    fn aggregates_route_by_name() {
        assert_eq!(parse("Count", vec![]).unwrap().op, MethodOp::Count);
        assert_eq!(parse("Sum", vec![]).unwrap().op, MethodOp::Aggregate("sum"));
        assert_eq!(parse("avg", vec![]).unwrap().op, MethodOp::Aggregate("avg"));
    }
}
