#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Dynamic table gateway over five SQL dialects.
//!
//! One [`Table`] binds a logical database table at runtime: the schema is
//! introspected on first use, rows are dynamic name/value [`Row`]s, and the
//! CRUD/query/procedure surface is shared across SQL Server, PostgreSQL,
//! MySQL, Oracle and SQLite through one [`dialect::Dialect`] contract.
//! WHERE/ORDER BY fragments are accepted raw; what this crate abstracts is
//! SQL generation and parameter binding, not query construction.

pub mod builder;
pub mod command;
pub mod dialect;
pub mod driver;
pub mod dynamic;
pub mod placeholders;
pub mod provider;
pub mod table;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod rusqlite;
#[cfg(feature = "mysql")]
pub mod sqlx;

use std::num::TryFromIntError;

use chrono::NaiveDateTime;
use thiserror::Error;
use uuid::Uuid;

pub use command::{Command, ParamBag, ParamDirection, Parameter, SqlType};
pub use dialect::DialectKind;
pub use driver::{Connection, Driver, ResultSets, RowReader, Rows};
pub use table::{Hooks, PagedResult, Table, TableBuilder, Validation};

/// Marker value for a cursor-typed parameter.
///
/// [`Cursor::output`] requests a fresh output cursor from the server;
/// [`Cursor::handle`] passes a previously returned cursor by reference so a
/// second call can consume it. Chained calls must share one caller-opened
/// connection or the handle is meaningless.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cursor {
    handle: Option<String>,
}

impl Cursor {
    #[must_use]
    pub const fn output() -> Self {
        Self { handle: None }
    }

    #[must_use]
    pub const fn handle(name: String) -> Self {
        Self { handle: Some(name) }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.handle.as_deref()
    }
}

/// One dynamically typed SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
    Guid(Uuid),
    Cursor(Cursor),
}

impl SqlValue {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn is_cursor(&self) -> bool {
        matches!(self, Self::Cursor(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(value) => Some(*value),
            _ => None,
        }
    }

    /// The declared type this value would bind as, if it has one.
    #[must_use]
    pub const fn sql_type(&self) -> Option<SqlType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(SqlType::Bool),
            Self::Int(_) => Some(SqlType::Int),
            Self::UInt(_) => Some(SqlType::UInt),
            Self::Real(_) => Some(SqlType::Real),
            Self::Text(_) => Some(SqlType::Text),
            Self::Bytes(_) => Some(SqlType::Bytes),
            Self::DateTime(_) => Some(SqlType::DateTime),
            Self::Guid(_) => Some(SqlType::Guid),
            Self::Cursor(_) => Some(SqlType::Cursor),
        }
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(val: Option<T>) -> Self {
        val.map_or(Self::Null, Into::into)
    }
}

impl From<bool> for SqlValue {
    fn from(val: bool) -> Self {
        Self::Bool(val)
    }
}

impl From<&str> for SqlValue {
    fn from(val: &str) -> Self {
        Self::Text(val.to_string())
    }
}

impl From<&String> for SqlValue {
    fn from(val: &String) -> Self {
        Self::Text(val.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(val: String) -> Self {
        Self::Text(val)
    }
}

impl From<f32> for SqlValue {
    fn from(val: f32) -> Self {
        Self::Real(f64::from(val))
    }
}

impl From<f64> for SqlValue {
    fn from(val: f64) -> Self {
        Self::Real(val)
    }
}

impl From<i8> for SqlValue {
    fn from(val: i8) -> Self {
        Self::Int(i64::from(val))
    }
}

impl From<i16> for SqlValue {
    fn from(val: i16) -> Self {
        Self::Int(i64::from(val))
    }
}

impl From<i32> for SqlValue {
    fn from(val: i32) -> Self {
        Self::Int(i64::from(val))
    }
}

impl From<i64> for SqlValue {
    fn from(val: i64) -> Self {
        Self::Int(val)
    }
}

impl From<u8> for SqlValue {
    fn from(val: u8) -> Self {
        Self::UInt(u64::from(val))
    }
}

impl From<u16> for SqlValue {
    fn from(val: u16) -> Self {
        Self::UInt(u64::from(val))
    }
}

impl From<u32> for SqlValue {
    fn from(val: u32) -> Self {
        Self::UInt(u64::from(val))
    }
}

impl From<u64> for SqlValue {
    fn from(val: u64) -> Self {
        Self::UInt(val)
    }
}

impl From<usize> for SqlValue {
    fn from(val: usize) -> Self {
        Self::UInt(val as u64)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(val: Vec<u8>) -> Self {
        Self::Bytes(val)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(val: NaiveDateTime) -> Self {
        Self::DateTime(val)
    }
}

impl From<Uuid> for SqlValue {
    fn from(val: Uuid) -> Self {
        Self::Guid(val)
    }
}

impl From<Cursor> for SqlValue {
    fn from(val: Cursor) -> Self {
        Self::Cursor(val)
    }
}

#[derive(Debug, Error)]
pub enum TryFromError {
    #[error("Could not convert to type '{0}'")]
    CouldNotConvert(String),
    #[error(transparent)]
    TryFromInt(#[from] TryFromIntError),
}

impl TryFrom<SqlValue> for u64 {
    type Error = TryFromError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Int(value) => Ok(Self::try_from(value)?),
            SqlValue::UInt(value) => Ok(value),
            _ => Err(TryFromError::CouldNotConvert("u64".into())),
        }
    }
}

impl TryFrom<SqlValue> for i64 {
    type Error = TryFromError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Int(value) => Ok(value),
            SqlValue::UInt(value) => Ok(Self::try_from(value)?),
            _ => Err(TryFromError::CouldNotConvert("i64".into())),
        }
    }
}

impl TryFrom<SqlValue> for i32 {
    type Error = TryFromError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Int(value) => Ok(Self::try_from(value)?),
            SqlValue::UInt(value) => Ok(Self::try_from(value)?),
            _ => Err(TryFromError::CouldNotConvert("i32".into())),
        }
    }
}

impl TryFrom<SqlValue> for String {
    type Error = TryFromError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Text(value) => Ok(value),
            _ => Err(TryFromError::CouldNotConvert("String".into())),
        }
    }
}

impl TryFrom<SqlValue> for f64 {
    type Error = TryFromError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Real(value) => Ok(value),
            _ => Err(TryFromError::CouldNotConvert("f64".into())),
        }
    }
}

impl TryFrom<SqlValue> for bool {
    type Error = TryFromError;

    fn try_from(value: SqlValue) -> Result<Self, Self::Error> {
        match value {
            SqlValue::Bool(value) => Ok(value),
            SqlValue::Int(value) => Ok(value != 0),
            _ => Err(TryFromError::CouldNotConvert("bool".into())),
        }
    }
}

/// One result row: the projected columns of the query that produced it, in
/// projection order. Absent columns are absent, not null-filled.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub columns: Vec<(String, SqlValue)>,
}

impl Row {
    #[must_use]
    pub const fn new() -> Self {
        Self { columns: vec![] }
    }

    /// Column lookup is case-sensitive, matching driver-returned names.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<SqlValue> {
        self.columns
            .iter()
            .find(|c| c.0 == column_name)
            .map(|c| c.1.clone())
    }

    #[must_use]
    pub fn get_ignore_case(&self, column_name: &str) -> Option<SqlValue> {
        self.columns
            .iter()
            .find(|c| c.0.eq_ignore_ascii_case(column_name))
            .map(|c| c.1.clone())
    }

    #[must_use]
    pub fn contains(&self, column_name: &str) -> bool {
        self.columns.iter().any(|c| c.0 == column_name)
    }

    /// Replaces the value if the column is present, appends it otherwise.
    pub fn set(&mut self, column_name: &str, value: SqlValue) {
        if let Some(column) = self.columns.iter_mut().find(|c| c.0 == column_name) {
            column.1 = value;
        } else {
            self.columns.push((column_name.to_string(), value));
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }
}

impl<S: Into<String>, V: Into<SqlValue>> FromIterator<(S, V)> for Row {
    fn from_iter<T: IntoIterator<Item = (S, V)>>(iter: T) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// Builds a [`Row`] from `name => value` pairs.
#[macro_export]
macro_rules! row {
    () => {
        $crate::Row::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::Row {
            columns: vec![$(($name.to_string(), $crate::SqlValue::from($value))),+],
        }
    };
}

#[derive(Debug, Error)]
pub enum DbError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Rusqlite(rusqlite::RusqliteDatabaseError),
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Postgres(postgres::PostgresDatabaseError),
    #[cfg(feature = "mysql")]
    #[error(transparent)]
    MysqlSqlx(sqlx::SqlxDatabaseError),
    /// Unknown provider, malformed connection string, missing driver.
    #[error("Configuration error: {0}")]
    Config(String),
    /// An operation this dialect or driver cannot perform. Never silently
    /// degraded; the message names the operation and the provider.
    #[error("'{operation}' is not supported on provider '{provider}'{detail}")]
    Capability {
        operation: String,
        provider: String,
        detail: String,
    },
    /// Malformed command-build state, raised before any round trip.
    #[error("Invalid operation: {0}")]
    Shape(String),
    /// Aggregated validation messages, joined with "; ".
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    TryFrom(#[from] TryFromError),
    #[error("No row")]
    NoRow,
}

impl DbError {
    pub(crate) fn capability(operation: &str, provider: &str) -> Self {
        Self::Capability {
            operation: operation.to_string(),
            provider: provider.to_string(),
            detail: String::new(),
        }
    }

    pub(crate) fn capability_detail(operation: &str, provider: &str, detail: String) -> Self {
        Self::Capability {
            operation: operation.to_string(),
            provider: provider.to_string(),
            detail: format!(": {detail}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn row_get_is_case_sensitive() {
        let row = row! { "Name" => "x" };
        assert_eq!(row.get("Name"), Some(SqlValue::Text("x".into())));
        assert_eq!(row.get("name"), None);
        assert_eq!(
            row.get_ignore_case("NAME"),
            Some(SqlValue::Text("x".into()))
        );
    }

    #[test]
    fn row_set_replaces_in_place() {
        let mut row = row! { "a" => 1, "b" => 2 };
        row.set("a", SqlValue::Int(9));
        assert_eq!(row.columns[0], ("a".to_string(), SqlValue::Int(9)));
        assert_eq!(row.len(), 2);

        row.set("c", SqlValue::Null);
        assert_eq!(row.columns[2].0, "c");
    }

    #[test]
    fn option_converts_to_null() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(5i64)), SqlValue::Int(5));
    }

    #[test]
    fn narrowing_conversions_check_range() {
        assert!(u64::try_from(SqlValue::Int(-1)).is_err());
        assert_eq!(u64::try_from(SqlValue::Int(7)).unwrap(), 7);
        assert!(i32::try_from(SqlValue::UInt(u64::MAX)).is_err());
    }
}
