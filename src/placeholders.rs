//! Rewrites dialect-prefixed named placeholders into the positional form a
//! wire driver actually binds.
//!
//! Statement text carries `@name` / `:name` references produced by the
//! dialect (or written by the caller in raw fragments). rusqlite and the
//! MySQL protocol bind `?` by position; the PostgreSQL protocol binds
//! `$1..$n`. Only tokens matching a parameter actually bound on the command
//! are rewritten, so casts (`::int`), system variables (`@@version`) and
//! string contents that merely look like placeholders survive untouched. A
//! name referenced twice is bound twice — positional protocols have no
//! other way to express reuse.

use std::sync::LazyLock;

use regex::Regex;

use crate::{dialect::Dialect, Command, DbError, Parameter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`, bound left to right (SQLite, MySQL).
    QuestionMark,
    /// `$1`..`$n` (PostgreSQL).
    DollarNumber,
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[:@][A-Za-z0-9_]+").expect("Invalid Regex"));

/// Statement text rewritten for positional binding plus the parameters in
/// bind order.
#[derive(Debug)]
pub struct PositionalQuery<'a> {
    pub sql: String,
    pub params: Vec<&'a Parameter>,
}

/// Rewrites `cmd.text` for a positional-binding driver.
///
/// Commands carrying anonymous parameters skip rewriting entirely: their
/// text already addresses parameters positionally, and the parameters bind
/// in command order. Mixing anonymous and named parameters in one command
/// is unsupported.
///
/// # Errors
///
/// * [`DbError::Shape`] when anonymous and named parameters are mixed.
pub fn positional<'a>(
    cmd: &'a Command,
    dialect: &dyn Dialect,
    style: PlaceholderStyle,
) -> Result<PositionalQuery<'a>, DbError> {
    let anonymous = cmd.params.iter().filter(|p| p.name.is_empty()).count();
    if anonymous > 0 {
        if anonymous != cmd.params.len() {
            return Err(DbError::Shape(
                "anonymous parameters cannot be mixed with named parameters in one command"
                    .to_string(),
            ));
        }
        return Ok(PositionalQuery {
            sql: cmd.text.clone(),
            params: cmd.params.iter().collect(),
        });
    }

    let sql = &cmd.text;
    let mut out = String::with_capacity(sql.len());
    let mut params: Vec<&Parameter> = vec![];
    let mut last = 0;

    for m in PLACEHOLDER.find_iter(sql) {
        let prev = sql[..m.start()].chars().next_back();
        let standalone = prev.is_none_or(|c| {
            !(c.is_ascii_alphanumeric() || c == '_' || c == ':' || c == '@')
        });
        if !standalone {
            continue;
        }
        let raw_name = dialect.deprefix_parameter_name(m.as_str());
        let Some(param) = cmd
            .params
            .iter()
            .find(|p| dialect.deprefix_parameter_name(&p.name) == raw_name)
        else {
            continue;
        };

        out.push_str(&sql[last..m.start()]);
        params.push(param);
        match style {
            PlaceholderStyle::QuestionMark => out.push('?'),
            PlaceholderStyle::DollarNumber => {
                out.push('$');
                out.push_str(&params.len().to_string());
            }
        }
        last = m.end();
    }
    out.push_str(&sql[last..]);

    Ok(PositionalQuery { sql: out, params })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{command::ParamDirection, dialect::DialectKind, SqlValue};

    #[test]
    fn named_parameters_rewrite_in_reference_order() {
        let d = DialectKind::PostgreSql.dialect();
        let mut cmd = Command::new("SELECT * FROM films WHERE rating = :1 AND title = :0");
        cmd.add_args(d, &[SqlValue::Text("x".into()), SqlValue::Text("PG".into())])
            .unwrap();

        let q = positional(&cmd, d, PlaceholderStyle::DollarNumber).unwrap();
        assert_eq!(q.sql, "SELECT * FROM films WHERE rating = $1 AND title = $2");
        assert_eq!(q.params[0].value, SqlValue::Text("PG".into()));
        assert_eq!(q.params[1].value, SqlValue::Text("x".into()));
    }

    #[test]
    fn casts_and_unknown_tokens_survive() {
        let d = DialectKind::PostgreSql.dialect();
        let mut cmd = Command::new("SELECT :0::int, ':literal', :unbound FROM t WHERE a = :0");
        cmd.add_args(d, &[SqlValue::Int(7)]).unwrap();

        let q = positional(&cmd, d, PlaceholderStyle::DollarNumber).unwrap();
        assert_eq!(q.sql, "SELECT $1::int, ':literal', :unbound FROM t WHERE a = $2");
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn question_mark_style_duplicates_reused_names() {
        let d = DialectKind::MySql.dialect();
        let mut cmd = Command::new("SELECT * FROM t WHERE a = @0 OR b = @0");
        cmd.add_args(d, &[SqlValue::Int(1)]).unwrap();

        let q = positional(&cmd, d, PlaceholderStyle::QuestionMark).unwrap();
        assert_eq!(q.sql, "SELECT * FROM t WHERE a = ? OR b = ?");
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn mysql_system_variables_untouched() {
        let d = DialectKind::MySql.dialect();
        let mut cmd = Command::new("SELECT @@version, @0");
        cmd.add_args(d, &[SqlValue::Int(1)]).unwrap();

        let q = positional(&cmd, d, PlaceholderStyle::QuestionMark).unwrap();
        assert_eq!(q.sql, "SELECT @@version, ?");
    }

    #[test]
    fn anonymous_commands_pass_through() {
        let d = DialectKind::PostgreSql.dialect();
        let mut cmd = Command::new("SELECT * FROM fn($1, $2)");
        cmd.add_param(d, SqlValue::Int(1), Some(""), ParamDirection::Input, None)
            .unwrap();
        cmd.add_param(d, SqlValue::Int(2), Some(""), ParamDirection::Input, None)
            .unwrap();

        let q = positional(&cmd, d, PlaceholderStyle::DollarNumber).unwrap();
        assert_eq!(q.sql, "SELECT * FROM fn($1, $2)");
        assert_eq!(q.params.len(), 2);
    }
}
