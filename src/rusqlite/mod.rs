//! SQLite driver binding over rusqlite.
//!
//! rusqlite is synchronous; calls run inline behind the async seam, the way
//! a single-file embedded database wants to be driven. Each
//! [`Driver::open`] produces one dedicated connection — note that a
//! `:memory:` data source is private to its connection, so state does not
//! survive across calls that each open their own connection. Use a file
//! path (or a caller-scoped connection) when state must persist.
//!
//! Multi-statement scalar batches (insert plus identity readback) walk
//! [`rusqlite::Batch`], binding parameters to the statements that declare
//! them and returning the last scalar produced. SQLite has no stored
//! procedures and no output parameters; both surface as capability errors.

use async_trait::async_trait;
use rusqlite::{types::Value, Batch, Connection as SqliteConnection, Statement};
use thiserror::Error;

use crate::{
    dialect::DialectKind,
    driver::{BufferedReader, Connection, Driver, RowReader},
    placeholders::{positional, PlaceholderStyle, PositionalQuery},
    Command, DbError, Parameter, Row, SqlValue,
};

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Error)]
pub enum RusqliteDatabaseError {
    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
    #[error("Value out of range for SQLite: {0}")]
    OutOfRange(u64),
}

impl From<RusqliteDatabaseError> for DbError {
    fn from(value: RusqliteDatabaseError) -> Self {
        Self::Rusqlite(value)
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Rusqlite(RusqliteDatabaseError::Rusqlite(value))
    }
}

/// Opens rusqlite connections from `Data Source=...` connection strings.
#[derive(Debug, Default)]
pub struct RusqliteDriver;

#[async_trait]
impl Driver for RusqliteDriver {
    async fn open(&self, connection_string: &str) -> Result<Box<dyn Connection>, DbError> {
        let path = data_source(connection_string);
        let connection = if path == ":memory:" {
            SqliteConnection::open_in_memory()
        } else {
            SqliteConnection::open(&path)
        }
        .map_err(RusqliteDatabaseError::from)?;

        Ok(Box::new(RusqliteDriverConnection { connection }))
    }
}

/// `Data Source`/`Filename` attribute value, or the raw string when it
/// carries no attributes at all.
fn data_source(connection_string: &str) -> String {
    for segment in connection_string.split(';') {
        if let Some((key, value)) = segment.split_once('=') {
            if matches!(
                key.trim().to_lowercase().as_str(),
                "data source" | "datasource" | "filename" | "file"
            ) {
                return value.trim().to_string();
            }
        }
    }
    let trimmed = connection_string.trim();
    if trimmed.is_empty() || trimmed.contains('=') {
        ":memory:".to_string()
    } else {
        trimmed.to_string()
    }
}

struct RusqliteDriverConnection {
    connection: SqliteConnection,
}

impl RusqliteDriverConnection {
    fn positional_query<'a>(&self, cmd: &'a Command) -> Result<PositionalQuery<'a>, DbError> {
        if cmd.is_procedure {
            return Err(DbError::capability("stored procedures", "Sqlite"));
        }
        if cmd.params.iter().any(|p| !p.direction.is_input()) {
            return Err(DbError::capability("output parameters", "Sqlite"));
        }
        positional(
            cmd,
            DialectKind::Sqlite.dialect(),
            PlaceholderStyle::QuestionMark,
        )
    }
}

fn bind_values(statement: &mut Statement<'_>, values: &[&Parameter]) -> Result<(), DbError> {
    for (i, param) in values.iter().enumerate() {
        let index = i + 1;
        match &param.value {
            SqlValue::Null => {
                statement.raw_bind_parameter(index, rusqlite::types::Null)?;
            }
            SqlValue::Bool(value) => statement.raw_bind_parameter(index, *value)?,
            SqlValue::Int(value) => statement.raw_bind_parameter(index, *value)?,
            SqlValue::UInt(value) => {
                let signed = i64::try_from(*value)
                    .map_err(|_| RusqliteDatabaseError::OutOfRange(*value))?;
                statement.raw_bind_parameter(index, signed)?;
            }
            SqlValue::Real(value) => statement.raw_bind_parameter(index, *value)?,
            SqlValue::Text(value) => statement.raw_bind_parameter(index, value.as_str())?,
            SqlValue::Bytes(value) => statement.raw_bind_parameter(index, value.as_slice())?,
            SqlValue::DateTime(value) => statement.raw_bind_parameter(
                index,
                value.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            )?,
            SqlValue::Guid(value) => statement.raw_bind_parameter(index, value.to_string())?,
            SqlValue::Cursor(_) => {
                return Err(DbError::capability("cursor parameters", "Sqlite"));
            }
        }
    }
    Ok(())
}

fn from_row(column_names: &[String], row: &rusqlite::Row<'_>) -> Result<Row, DbError> {
    let mut columns = vec![];

    for (i, column) in column_names.iter().enumerate() {
        let value = match row.get::<_, Value>(i).map_err(RusqliteDatabaseError::from)? {
            Value::Null => SqlValue::Null,
            Value::Integer(value) => SqlValue::Int(value),
            Value::Real(value) => SqlValue::Real(value),
            Value::Text(value) => SqlValue::Text(value),
            Value::Blob(value) => SqlValue::Bytes(value),
        };
        columns.push((column.clone(), value));
    }

    Ok(Row { columns })
}

#[async_trait]
impl Connection for RusqliteDriverConnection {
    async fn execute(&mut self, cmd: &Command) -> Result<u64, DbError> {
        let query = self.positional_query(cmd)?;
        log::trace!("sqlite execute: {}", query.sql);

        let mut statement = self.connection.prepare(&query.sql)?;
        bind_values(&mut statement, &query.params)?;
        let affected = statement.raw_execute()?;
        Ok(affected as u64)
    }

    async fn execute_scalar(&mut self, cmd: &Command) -> Result<Option<SqlValue>, DbError> {
        let query = self.positional_query(cmd)?;
        log::trace!("sqlite scalar: {}", query.sql);

        let mut remaining = query.params.as_slice();
        let mut scalar = None;

        let mut batch = Batch::new(&self.connection, &query.sql);
        while let Some(mut statement) = batch.next().map_err(RusqliteDatabaseError::from)? {
            let declared = statement.parameter_count();
            let (head, tail) = remaining.split_at(declared.min(remaining.len()));
            remaining = tail;
            bind_values(&mut statement, head)?;

            if statement.column_count() > 0 {
                let column_names: Vec<String> = statement
                    .column_names()
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                let mut rows = statement.raw_query();
                if let Some(row) = rows.next().map_err(RusqliteDatabaseError::from)? {
                    scalar = from_row(&column_names, row)?
                        .columns
                        .into_iter()
                        .next()
                        .map(|(_, value)| value);
                }
            } else {
                statement.raw_execute()?;
            }
        }

        Ok(scalar)
    }

    async fn query(&mut self, cmd: &Command) -> Result<Box<dyn RowReader>, DbError> {
        let query = self.positional_query(cmd)?;
        log::trace!("sqlite query: {}", query.sql);

        let mut statement = self.connection.prepare(&query.sql)?;
        let column_names: Vec<String> = statement
            .column_names()
            .iter()
            .map(ToString::to_string)
            .collect();
        bind_values(&mut statement, &query.params)?;

        let mut results = vec![];
        let mut rows = statement.raw_query();
        while let Some(row) = rows.next().map_err(RusqliteDatabaseError::from)? {
            results.push(from_row(&column_names, row)?);
        }
        log::trace!(
            "sqlite got {} row{}",
            results.len(),
            if results.len() == 1 { "" } else { "s" }
        );

        Ok(Box::new(BufferedReader::single(results)))
    }

    async fn call_procedure(&mut self, cmd: &Command) -> Result<Row, DbError> {
        if cmd.is_procedure || cmd.params.iter().any(|p| !p.direction.is_input()) {
            return Err(DbError::capability("stored procedures", "Sqlite"));
        }
        self.execute(cmd).await?;
        Ok(Row::new())
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        self.connection
            .execute_batch("BEGIN")
            .map_err(RusqliteDatabaseError::from)?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.connection
            .execute_batch("COMMIT")
            .map_err(RusqliteDatabaseError::from)?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.connection
            .execute_batch("ROLLBACK")
            .map_err(RusqliteDatabaseError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn data_source_attribute_wins() {
        assert_eq!(data_source("Data Source=:memory:"), ":memory:");
        assert_eq!(data_source("Data Source=/tmp/x.db;Cache=Shared"), "/tmp/x.db");
        assert_eq!(data_source("/tmp/plain.db"), "/tmp/plain.db");
        assert_eq!(data_source(""), ":memory:");
    }

    #[tokio::test]
    async fn scalar_batch_returns_the_last_produced_value() {
        let mut conn = RusqliteDriver.open("Data Source=:memory:").await.unwrap();

        conn.execute(&Command::new(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)",
        ))
        .await
        .unwrap();

        let dialect = DialectKind::Sqlite.dialect();
        let mut cmd = Command::new("INSERT INTO t (name) VALUES (:0);SELECT last_insert_rowid()");
        cmd.add_args(dialect, &[SqlValue::Text("x".into())]).unwrap();

        let scalar = conn.execute_scalar(&cmd).await.unwrap();
        assert_eq!(scalar, Some(SqlValue::Int(1)));
    }

    #[tokio::test]
    async fn procedures_are_a_capability_error() {
        let mut conn = RusqliteDriver.open("Data Source=:memory:").await.unwrap();
        let err = conn
            .query(&Command::procedure("whatever"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DbError::Capability { .. }));
    }
}
