//! SQL assembly from dialect patterns and caller fragments.
//!
//! Callers hand over raw WHERE/ORDER BY fragments; readying guarantees the
//! final statement is well formed whether or not the fragment carried its
//! keyword. Statement builders walk dynamic rows and bind positional
//! parameters in lockstep with the text they emit.

use crate::{
    command::ParamDirection,
    dialect::Dialect,
    Command, DbError, Row, SqlValue,
};

/// Readies a raw WHERE fragment: trimmed, prefixed with ` WHERE ` when the
/// keyword is missing, exactly one leading space when present. Empty and
/// whitespace-only input yields the empty string. Idempotent.
#[must_use]
pub fn ready_where_clause(raw: &str) -> String {
    ready_clause(raw, "WHERE")
}

/// Readies a raw ORDER BY fragment; same rules as
/// [`ready_where_clause`].
#[must_use]
pub fn ready_order_by_clause(raw: &str) -> String {
    ready_clause(raw, "ORDER BY")
}

fn ready_clause(raw: &str, op: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let has_keyword = trimmed.len() >= op.len()
        && trimmed.as_bytes()[..op.len()].eq_ignore_ascii_case(op.as_bytes());
    if has_keyword {
        format!(" {trimmed}")
    } else {
        format!(" {op} {trimmed}")
    }
}

/// Fills the `{projection}` / `{source}` placeholders of a select or count
/// pattern.
#[must_use]
pub fn fill_pattern(pattern: &str, projection: &str, source: &str) -> String {
    pattern
        .replace("{projection}", projection)
        .replace("{source}", source)
}

/// Builds an INSERT command from the row's fields in their given order, one
/// auto-named positional parameter per field.
///
/// # Errors
///
/// * [`DbError::Shape`] when the row has no fields.
pub fn build_insert_command(
    dialect: &dyn Dialect,
    table_name: &str,
    row: &Row,
) -> Result<Command, DbError> {
    let mut cmd = Command::new("");
    let mut field_names = Vec::with_capacity(row.columns.len());
    let mut value_params = Vec::with_capacity(row.columns.len());

    for (name, value) in &row.columns {
        field_names.push(name.clone());
        value_params.push(dialect.prefix_parameter_name(&cmd.params.len().to_string()));
        cmd.add_param(dialect, value.clone(), None, ParamDirection::Input, None)?;
    }

    if field_names.is_empty() {
        return Err(DbError::Shape(
            "cannot build an insert command from a row with no fields set".to_string(),
        ));
    }

    cmd.text = dialect
        .insert_pattern()
        .replace("{target}", table_name)
        .replace("{fields}", &field_names.join(", "))
        .replace("{values}", &value_params.join(", "));
    Ok(cmd)
}

/// Builds an UPDATE command for rows matching the primary key value.
///
/// # Errors
///
/// * [`DbError::Shape`] when no settable fields remain.
pub fn build_update_command(
    dialect: &dyn Dialect,
    table_name: &str,
    primary_key: &str,
    row: &Row,
    key: SqlValue,
) -> Result<Command, DbError> {
    build_update_where_command(
        dialect,
        table_name,
        primary_key,
        row,
        &pk_predicate(dialect, primary_key),
        &[key],
    )
}

/// Builds an UPDATE command against an arbitrary WHERE fragment with
/// positional arguments. The primary-key field itself is never emitted as a
/// SET clause; null values are emitted as literal `field = NULL` rather
/// than bound, so SET-clause null typing never depends on the driver.
/// Set-value parameter numbering continues after the WHERE arguments.
///
/// # Errors
///
/// * [`DbError::Shape`] when no settable fields remain.
pub fn build_update_where_command(
    dialect: &dyn Dialect,
    table_name: &str,
    primary_key: &str,
    row: &Row,
    where_clause: &str,
    args: &[SqlValue],
) -> Result<Command, DbError> {
    let mut cmd = Command::new("");
    cmd.add_args(dialect, args)?;

    let mut set_fragments = vec![];
    for (name, value) in &row.columns {
        if name.eq_ignore_ascii_case(primary_key) {
            continue;
        }
        if value.is_null() {
            set_fragments.push(format!("{name} = NULL"));
        } else {
            set_fragments.push(format!(
                "{name} = {}",
                dialect.prefix_parameter_name(&cmd.params.len().to_string())
            ));
            cmd.add_param(dialect, value.clone(), None, ParamDirection::Input, None)?;
        }
    }

    if set_fragments.is_empty() {
        return Err(DbError::Shape(
            "no settable fields — could not define any name/value pairs".to_string(),
        ));
    }

    cmd.text = format!(
        "{}{}",
        dialect
            .update_pattern()
            .replace("{target}", table_name)
            .replace("{sets}", &set_fragments.join(", ")),
        ready_where_clause(where_clause).trim_start()
    );
    Ok(cmd)
}

/// Builds a DELETE command: by key when one is given (single positional
/// parameter on the primary key), otherwise by the raw WHERE fragment and
/// its arguments.
///
/// # Errors
///
/// * If binding an argument fails.
pub fn build_delete_command(
    dialect: &dyn Dialect,
    table_name: &str,
    primary_key: &str,
    where_clause: &str,
    key: Option<SqlValue>,
    args: &[SqlValue],
) -> Result<Command, DbError> {
    let base = dialect.delete_pattern().replace("{target}", table_name);
    let mut cmd = Command::new("");

    if let Some(key) = key {
        cmd.text = format!("{base}{}", ready_where_clause(&pk_predicate(dialect, primary_key)).trim_start());
        cmd.add_args(dialect, &[key])?;
    } else {
        cmd.text = format!("{base}{}", ready_where_clause(where_clause).trim_start());
        cmd.add_args(dialect, args)?;
    }
    Ok(cmd)
}

/// `PrimaryKey = <first positional parameter>`.
#[must_use]
pub fn pk_predicate(dialect: &dyn Dialect, primary_key: &str) -> String {
    format!("{primary_key} = {}", dialect.prefix_parameter_name("0"))
}

/// Ceiling division for paging. 1000 records at 30 per page is 34 pages.
#[must_use]
pub const fn total_pages(total_records: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        0
    } else {
        total_records.div_ceil(page_size)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{dialect::DialectKind, row};

    const ALL_DIALECTS: [DialectKind; 5] = [
        DialectKind::SqlServer,
        DialectKind::PostgreSql,
        DialectKind::MySql,
        DialectKind::Oracle,
        DialectKind::Sqlite,
    ];

    #[test]
    fn readying_is_idempotent() {
        for fragment in [
            "rental_duration = :0",
            "WHERE rental_duration = :0",
            "  where rental_duration = :0  ",
            "",
            "   ",
        ] {
            let once = ready_where_clause(fragment);
            assert_eq!(ready_where_clause(&once), once, "fragment: {fragment:?}");
        }

        assert_eq!(ready_where_clause("a = 1"), " WHERE a = 1");
        assert_eq!(ready_where_clause("WHERE a = 1"), " WHERE a = 1");
        assert_eq!(ready_where_clause(""), "");
        assert_eq!(ready_order_by_clause("name DESC"), " ORDER BY name DESC");
        assert_eq!(ready_order_by_clause("order by name"), " order by name");
    }

    #[test]
    fn insert_rejects_empty_row_on_every_dialect() {
        for kind in ALL_DIALECTS {
            let err = build_insert_command(kind.dialect(), "films", &Row::new()).unwrap_err();
            assert!(matches!(err, DbError::Shape(_)), "dialect: {kind:?}");
        }
    }

    #[test]
    fn insert_builds_lockstep_field_and_value_lists() {
        let d = DialectKind::SqlServer.dialect();
        let cmd =
            build_insert_command(d, "films", &row! { "title" => "x", "rental_duration" => 5 })
                .unwrap();
        assert_eq!(
            cmd.text,
            "INSERT INTO films (title, rental_duration) VALUES (@0, @1)"
        );
        assert_eq!(cmd.params.len(), 2);
        assert_eq!(cmd.params[0].value, SqlValue::Text("x".into()));
        assert_eq!(cmd.params[1].value, SqlValue::Int(5));
    }

    #[test]
    fn update_never_sets_the_primary_key() {
        for kind in ALL_DIALECTS {
            let d = kind.dialect();
            let cmd = build_update_command(
                d,
                "films",
                "ID",
                &row! { "ID" => 7, "title" => "x" },
                SqlValue::Int(7),
            )
            .unwrap();
            let set_section = cmd.text.split("WHERE").next().unwrap();
            assert!(
                !set_section.contains("ID ="),
                "dialect {kind:?} leaked a pk SET clause: {}",
                cmd.text
            );
            assert!(cmd.text.contains("SET title ="), "dialect {kind:?}: {}", cmd.text);
        }
    }

    #[test]
    fn update_emits_literal_null_and_continues_numbering() {
        let d = DialectKind::PostgreSql.dialect();
        let cmd = build_update_where_command(
            d,
            "films",
            "ID",
            &row! { "title" => "x", "description" => SqlValue::Null },
            "rating = :0",
            &[SqlValue::Text("PG".into())],
        )
        .unwrap();
        assert_eq!(
            cmd.text,
            "UPDATE films SET title = :1, description = NULL WHERE rating = :0"
        );
        assert_eq!(cmd.params.len(), 2);
        assert_eq!(cmd.params[0].name, ":0");
        assert_eq!(cmd.params[1].name, ":1");
    }

    #[test]
    fn update_with_only_pk_fields_is_a_shape_error() {
        let d = DialectKind::Sqlite.dialect();
        let err = build_update_command(d, "films", "ID", &row! { "ID" => 7 }, SqlValue::Int(7))
            .unwrap_err();
        assert!(matches!(err, DbError::Shape(_)));
    }

    #[test]
    fn delete_by_key_binds_single_parameter() {
        let d = DialectKind::MySql.dialect();
        let cmd =
            build_delete_command(d, "films", "ID", "", Some(SqlValue::Int(3)), &[]).unwrap();
        assert_eq!(cmd.text, "DELETE FROM films WHERE ID = @0");
        assert_eq!(cmd.params.len(), 1);
    }

    #[test]
    fn delete_by_where_uses_caller_args() {
        let d = DialectKind::PostgreSql.dialect();
        let cmd = build_delete_command(
            d,
            "films",
            "ID",
            "rating = :0",
            None,
            &[SqlValue::Text("R".into())],
        )
        .unwrap();
        assert_eq!(cmd.text, "DELETE FROM films WHERE rating = :0");
        assert_eq!(cmd.params.len(), 1);
    }

    #[test]
    fn paging_arithmetic_rounds_up() {
        assert_eq!(total_pages(1000, 30), 34);
        assert_eq!(total_pages(60, 10), 6);
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
    }
}
