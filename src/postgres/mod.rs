//! PostgreSQL driver binding over tokio-postgres.
//!
//! Two things set this binding apart from the others. Procedure commands
//! render as `SELECT * FROM fn(...)` — function results and output
//! parameters come back as result columns, the way the wire protocol wants
//! it. And row-returning commands whose results carry `refcursor` columns
//! swap in the [`DereferencingReader`], which walks every returned cursor
//! as a successive result set, fetching in batches. Cursors are only valid
//! inside their containing transaction; a fetch that lands outside one is
//! re-raised with the actual cause spelled out.

use std::{collections::VecDeque, pin::Pin, sync::Arc};

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_postgres::{
    error::SqlState,
    types::{to_sql_checked, FromSql, IsNull, ToSql, Type},
    Client, NoTls, RowStream,
};
use uuid::Uuid;

use crate::{
    command::ParamDirection,
    dialect::DialectKind,
    driver::{Connection, Driver, RowReader},
    placeholders::{positional, PlaceholderStyle},
    Command, Cursor, DbError, Parameter, Row, SqlValue,
};

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Error)]
pub enum PostgresDatabaseError {
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
    #[error("Type Not Found: '{type_name}'")]
    TypeNotFound { type_name: String },
    #[error(
        "cursor dereference failed — ref cursors are only valid inside their containing \
         transaction; chained cursor calls must share one caller-scoped connection and \
         transaction: {0}"
    )]
    CursorOutsideTransaction(tokio_postgres::Error),
}

impl From<PostgresDatabaseError> for DbError {
    fn from(value: PostgresDatabaseError) -> Self {
        Self::Postgres(value)
    }
}

/// How many rows one `FETCH` round trip pulls while dereferencing. Large
/// enough to drain small cursors in one trip without asking the server to
/// buffer a huge result.
pub const DEFAULT_DEREFERENCE_FETCH_SIZE: u32 = 10_000;

/// Opens tokio-postgres connections. Accepts libpq-style strings and URLs
/// directly, plus `Host=...;Database=...;User Id=...` attribute strings.
#[derive(Debug)]
pub struct PostgresDriver {
    pub dereference_fetch_size: u32,
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self {
            dereference_fetch_size: DEFAULT_DEREFERENCE_FETCH_SIZE,
        }
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn open(&self, connection_string: &str) -> Result<Box<dyn Connection>, DbError> {
        let config = to_config_string(connection_string);
        let (client, connection) = tokio_postgres::connect(&config, NoTls)
            .await
            .map_err(PostgresDatabaseError::from)?;
        let handle = tokio::spawn(connection);

        Ok(Box::new(PostgresConnection {
            client: Arc::new(client),
            handle,
            fetch_size: self.dereference_fetch_size,
        }))
    }
}

/// Maps ADO-flavored attribute strings onto libpq keys; URL and libpq
/// forms pass through untouched.
fn to_config_string(connection_string: &str) -> String {
    if connection_string.contains("://") || !connection_string.contains(';') {
        return connection_string.to_string();
    }

    let mut parts = vec![];
    for segment in connection_string.split(';') {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let key = match key.trim().to_lowercase().as_str() {
            "host" | "server" | "data source" => "host",
            "database" | "dbname" | "initial catalog" => "dbname",
            "user" | "user id" | "username" | "uid" => "user",
            "password" | "pwd" => "password",
            "port" => "port",
            other => {
                log::warn!("ignoring unrecognized connection string attribute '{other}'");
                continue;
            }
        };
        if value.contains(' ') {
            parts.push(format!("{key}='{value}'"));
        } else {
            parts.push(format!("{key}={value}"));
        }
    }
    parts.join(" ")
}

struct PostgresConnection {
    client: Arc<Client>,
    handle: JoinHandle<Result<(), tokio_postgres::Error>>,
    fetch_size: u32,
}

impl Drop for PostgresConnection {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Dynamic value wrapper binding whichever concrete encoding the declared
/// parameter type asks for.
#[derive(Debug)]
struct PgValue(SqlValue);

impl ToSql for PgValue {
    #[allow(clippy::cast_possible_truncation)]
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match &self.0 {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(value) => value.to_sql(ty, out),
            SqlValue::Int(value) => match ty.name() {
                "int2" => (*value as i16).to_sql(ty, out),
                "int4" => (*value as i32).to_sql(ty, out),
                _ => value.to_sql(ty, out),
            },
            SqlValue::UInt(value) => match ty.name() {
                "int2" => (*value as i16).to_sql(ty, out),
                "int4" => (*value as i32).to_sql(ty, out),
                _ => (*value as i64).to_sql(ty, out),
            },
            SqlValue::Real(value) => match ty.name() {
                "float4" => (*value as f32).to_sql(ty, out),
                _ => value.to_sql(ty, out),
            },
            SqlValue::Text(value) => match ty.name() {
                // dialect-coerced GUID strings hitting a real uuid column
                "uuid" => Uuid::parse_str(value)?.to_sql(ty, out),
                _ => value.to_sql(ty, out),
            },
            SqlValue::Bytes(value) => value.as_slice().to_sql(ty, out),
            SqlValue::DateTime(value) => match ty.name() {
                "date" => value.date().to_sql(ty, out),
                "timestamptz" => {
                    DateTime::<Utc>::from_naive_utc_and_offset(*value, Utc).to_sql(ty, out)
                }
                _ => value.to_sql(ty, out),
            },
            SqlValue::Guid(value) => value.to_sql(ty, out),
            // a cursor handle travels as its name
            SqlValue::Cursor(cursor) => match cursor.name() {
                Some(name) => name.to_string().to_sql(&Type::TEXT, out),
                None => Ok(IsNull::Yes),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// A refcursor value: the cursor's name as text.
struct CursorName(String);

impl<'a> FromSql<'a> for CursorName {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        ty.name() == "refcursor"
    }
}

fn column_value(row: &tokio_postgres::Row, i: usize) -> Result<SqlValue, PostgresDatabaseError> {
    let ty = row.columns()[i].type_();
    let type_error = |_| PostgresDatabaseError::TypeNotFound {
        type_name: ty.name().to_string(),
    };

    Ok(match ty.name() {
        "bool" => row
            .try_get::<_, Option<bool>>(i)
            .map_err(type_error)?
            .map_or(SqlValue::Null, SqlValue::Bool),
        "int2" => row
            .try_get::<_, Option<i16>>(i)
            .map_err(type_error)?
            .map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v))),
        "int4" => row
            .try_get::<_, Option<i32>>(i)
            .map_err(type_error)?
            .map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v))),
        "int8" | "oid" => row
            .try_get::<_, Option<i64>>(i)
            .map_err(|_| PostgresDatabaseError::TypeNotFound {
                type_name: ty.name().to_string(),
            })
            .or_else(|_| {
                row.try_get::<_, Option<u32>>(i)
                    .map(|v| v.map(i64::from))
                    .map_err(type_error)
            })?
            .map_or(SqlValue::Null, SqlValue::Int),
        "float4" => row
            .try_get::<_, Option<f32>>(i)
            .map_err(type_error)?
            .map_or(SqlValue::Null, |v| SqlValue::Real(f64::from(v))),
        "float8" => row
            .try_get::<_, Option<f64>>(i)
            .map_err(type_error)?
            .map_or(SqlValue::Null, SqlValue::Real),
        "text" | "varchar" | "bpchar" | "name" | "unknown" | "citext" => row
            .try_get::<_, Option<String>>(i)
            .map_err(type_error)?
            .map_or(SqlValue::Null, SqlValue::Text),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(i)
            .map_err(type_error)?
            .map_or(SqlValue::Null, SqlValue::DateTime),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(i)
            .map_err(type_error)?
            .map_or(SqlValue::Null, |v| SqlValue::DateTime(v.naive_utc())),
        "date" => row
            .try_get::<_, Option<NaiveDate>>(i)
            .map_err(type_error)?
            .and_then(|v| v.and_hms_opt(0, 0, 0))
            .map_or(SqlValue::Null, SqlValue::DateTime),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(i)
            .map_err(type_error)?
            .map_or(SqlValue::Null, SqlValue::Bytes),
        "uuid" => row
            .try_get::<_, Option<Uuid>>(i)
            .map_err(type_error)?
            .map_or(SqlValue::Null, SqlValue::Guid),
        "refcursor" => row
            .try_get::<_, Option<CursorName>>(i)
            .map_err(type_error)?
            .map_or(SqlValue::Null, |v| SqlValue::Cursor(Cursor::handle(v.0))),
        other => {
            return Err(PostgresDatabaseError::TypeNotFound {
                type_name: other.to_string(),
            })
        }
    })
}

fn from_row(row: &tokio_postgres::Row) -> Result<Row, PostgresDatabaseError> {
    let mut columns = vec![];
    for (i, column) in row.columns().iter().enumerate() {
        columns.push((column.name().to_string(), column_value(row, i)?));
    }
    Ok(Row { columns })
}

/// Renders a command for the wire: procedure commands become function
/// selects with their bindable arguments in order; plain commands go
/// through placeholder rewriting.
fn render(cmd: &Command) -> Result<(String, Vec<PgValue>), DbError> {
    if cmd.is_procedure {
        let mut values = vec![];
        let mut placeholders = vec![];
        for p in &cmd.params {
            let bindable = match (&p.value, p.direction) {
                // output-cursor placeholders are not arguments; handles
                // passed for chaining are
                (SqlValue::Cursor(cursor), _) => cursor.name().is_some(),
                (_, ParamDirection::Input | ParamDirection::InputOutput) => true,
                _ => false,
            };
            if bindable {
                values.push(PgValue(p.value.clone()));
                placeholders.push(format!("${}", values.len()));
            }
        }
        Ok((
            format!("SELECT * FROM {}({})", cmd.text, placeholders.join(", ")),
            values,
        ))
    } else {
        let query = positional(
            cmd,
            DialectKind::PostgreSql.dialect(),
            PlaceholderStyle::DollarNumber,
        )?;
        let values = query
            .params
            .iter()
            .map(|p| PgValue(p.value.clone()))
            .collect();
        Ok((query.sql, values))
    }
}

impl PostgresConnection {
    async fn query_rows(&self, cmd: &Command) -> Result<Vec<Row>, DbError> {
        let (sql, values) = render(cmd)?;
        log::trace!("postgres query: {sql}");
        let statement = self
            .client
            .prepare(&sql)
            .await
            .map_err(PostgresDatabaseError::from)?;
        let stream = self
            .client
            .query_raw(&statement, values)
            .await
            .map_err(PostgresDatabaseError::from)?;
        let rows: Vec<tokio_postgres::Row> = stream
            .try_collect()
            .await
            .map_err(PostgresDatabaseError::from)?;
        rows.iter()
            .map(|row| from_row(row).map_err(DbError::from))
            .collect()
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&mut self, cmd: &Command) -> Result<u64, DbError> {
        let (sql, values) = render(cmd)?;
        log::trace!("postgres execute: {sql}");
        let statement = self
            .client
            .prepare(&sql)
            .await
            .map_err(PostgresDatabaseError::from)?;
        Ok(self
            .client
            .execute_raw(&statement, values)
            .await
            .map_err(PostgresDatabaseError::from)?)
    }

    async fn execute_scalar(&mut self, cmd: &Command) -> Result<Option<SqlValue>, DbError> {
        let rows = self.query_rows(cmd).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.columns.into_iter().next())
            .map(|(_, value)| value))
    }

    async fn query(&mut self, cmd: &Command) -> Result<Box<dyn RowReader>, DbError> {
        let (sql, values) = render(cmd)?;
        log::trace!("postgres query: {sql}");
        let statement = self
            .client
            .prepare(&sql)
            .await
            .map_err(PostgresDatabaseError::from)?;
        let dereference = statement
            .columns()
            .iter()
            .any(|c| c.type_().name() == "refcursor");
        let stream = self
            .client
            .query_raw(&statement, values)
            .await
            .map_err(PostgresDatabaseError::from)?;

        if dereference {
            // 1x1, 1xN, Nx1 and NxM cursor layouts all flatten to a cursor
            // list; non-cursor columns of a mixed result are not
            // representable this way and are skipped
            let rows: Vec<tokio_postgres::Row> = stream
                .try_collect()
                .await
                .map_err(PostgresDatabaseError::from)?;
            let mut cursors = VecDeque::new();
            for row in &rows {
                for (i, column) in row.columns().iter().enumerate() {
                    if column.type_().name() == "refcursor" {
                        if let SqlValue::Cursor(cursor) = column_value(row, i)? {
                            if let Some(name) = cursor.name() {
                                cursors.push_back(name.to_string());
                            }
                        }
                    }
                }
            }
            let reader =
                DereferencingReader::start(self.client.clone(), cursors, self.fetch_size).await?;
            Ok(Box::new(reader))
        } else {
            Ok(Box::new(PgRowReader {
                stream: Box::pin(stream),
            }))
        }
    }

    async fn call_procedure(&mut self, cmd: &Command) -> Result<Row, DbError> {
        let dialect = DialectKind::PostgreSql.dialect();
        let outputs = cmd.output_parameters(dialect);
        let first = self.query_rows(cmd).await?.into_iter().next();

        let mut result = Row::new();
        let Some(first) = first else {
            for (name, _) in outputs {
                result.set(&name, SqlValue::Null);
            }
            return Ok(result);
        };

        let any_name_matches = outputs
            .iter()
            .any(|(name, _)| first.get_ignore_case(name).is_some());

        for (index, (name, param)) in outputs.into_iter().enumerate() {
            let value = if any_name_matches {
                first.get_ignore_case(&name).unwrap_or(SqlValue::Null)
            } else {
                // no named result columns — map back by position
                first
                    .columns
                    .get(index)
                    .map_or(SqlValue::Null, |(_, value)| value.clone())
            };
            let coerced = dialect.get_value(&Parameter {
                value,
                ..param.clone()
            });
            result.set(&name, coerced);
        }
        Ok(result)
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(PostgresDatabaseError::from)?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(PostgresDatabaseError::from)?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(PostgresDatabaseError::from)?;
        Ok(())
    }
}

struct PgRowReader {
    stream: Pin<Box<RowStream>>,
}

#[async_trait]
impl RowReader for PgRowReader {
    async fn next_row(&mut self) -> Result<Option<Row>, DbError> {
        match self.stream.next().await {
            Some(row) => Ok(Some(from_row(
                &row.map_err(PostgresDatabaseError::from)?,
            )?)),
            None => Ok(None),
        }
    }

    async fn next_result(&mut self) -> Result<bool, DbError> {
        Ok(false)
    }
}

/// Walks ref cursors returned by a query as successive result sets,
/// fetching each in batches and closing it before moving on.
struct DereferencingReader {
    client: Arc<Client>,
    cursors: VecDeque<String>,
    current: Option<String>,
    batch: VecDeque<Row>,
    last_batch_len: usize,
    fetch_size: u32,
}

impl DereferencingReader {
    async fn start(
        client: Arc<Client>,
        cursors: VecDeque<String>,
        fetch_size: u32,
    ) -> Result<Self, DbError> {
        let mut reader = Self {
            client,
            cursors,
            current: None,
            batch: VecDeque::new(),
            last_batch_len: 0,
            fetch_size,
        };
        reader.advance_cursor().await?;
        Ok(reader)
    }

    async fn advance_cursor(&mut self) -> Result<bool, DbError> {
        if let Some(done) = self.current.take() {
            // cursor names can contain quotes; keep them from breaking us
            let close = format!("CLOSE \"{}\"", done.replace('"', "\"\""));
            self.client
                .batch_execute(&close)
                .await
                .map_err(map_cursor_error)?;
        }
        match self.cursors.pop_front() {
            Some(next) => {
                self.current = Some(next);
                self.fetch_batch().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fetch_batch(&mut self) -> Result<(), DbError> {
        let Some(cursor) = self.current.clone() else {
            return Ok(());
        };
        let fetch = format!(
            "FETCH {} FROM \"{}\"",
            self.fetch_size,
            cursor.replace('"', "\"\"")
        );
        let rows = self
            .client
            .query(&fetch, &[])
            .await
            .map_err(map_cursor_error)?;
        self.last_batch_len = rows.len();
        self.batch = rows
            .iter()
            .map(from_row)
            .collect::<Result<VecDeque<_>, _>>()?;
        Ok(())
    }
}

#[async_trait]
impl RowReader for DereferencingReader {
    async fn next_row(&mut self) -> Result<Option<Row>, DbError> {
        loop {
            if let Some(row) = self.batch.pop_front() {
                return Ok(Some(row));
            }
            // a short batch means the cursor ran dry; a full one may or
            // may not have more behind it
            if self.current.is_none() || self.last_batch_len < self.fetch_size as usize {
                return Ok(None);
            }
            self.fetch_batch().await?;
        }
    }

    async fn next_result(&mut self) -> Result<bool, DbError> {
        self.advance_cursor().await
    }
}

fn map_cursor_error(error: tokio_postgres::Error) -> DbError {
    if error.code() == Some(&SqlState::INVALID_CURSOR_NAME) {
        PostgresDatabaseError::CursorOutsideTransaction(error).into()
    } else {
        PostgresDatabaseError::from(error).into()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn ado_attribute_strings_map_to_libpq_keys() {
        assert_eq!(
            to_config_string("Host=localhost;Database=films;User Id=postgres;Password=pw"),
            "host=localhost dbname=films user=postgres password=pw"
        );
        assert_eq!(
            to_config_string("postgres://u:p@localhost/films"),
            "postgres://u:p@localhost/films"
        );
        assert_eq!(to_config_string("host=localhost user=u"), "host=localhost user=u");
    }

    #[test]
    fn procedure_commands_render_as_function_selects() {
        let dialect = DialectKind::PostgreSql.dialect();

        let mut cmd = Command::procedure("film_counts");
        cmd.add_param(dialect, SqlValue::Int(5), Some("len"), ParamDirection::Input, None)
            .unwrap();
        cmd.add_param(
            dialect,
            SqlValue::Cursor(Cursor::output()),
            Some("c"),
            ParamDirection::Output,
            None,
        )
        .unwrap();
        cmd.add_param(
            dialect,
            SqlValue::Cursor(Cursor::handle("c_1".into())),
            Some("prior"),
            ParamDirection::Input,
            None,
        )
        .unwrap();

        let (sql, values) = render(&cmd).unwrap();
        assert_eq!(sql, "SELECT * FROM film_counts($1, $2)");
        // the output-cursor placeholder is not an argument; the chained
        // handle is
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn plain_commands_rewrite_named_placeholders() {
        let dialect = DialectKind::PostgreSql.dialect();
        let mut cmd = Command::new("SELECT * FROM films WHERE rental_duration = :0");
        cmd.add_args(dialect, &[SqlValue::Int(5)]).unwrap();

        let (sql, values) = render(&cmd).unwrap();
        assert_eq!(sql, "SELECT * FROM films WHERE rental_duration = $1");
        assert_eq!(values.len(), 1);
    }
}
