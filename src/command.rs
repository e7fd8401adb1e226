//! Command specification and parameter binding.
//!
//! A [`Command`] is SQL text plus an ordered list of bound [`Parameter`]s.
//! Binding goes through the active dialect so naming, direction fixups,
//! null/type handling and cursor placeholders come out right per provider.

use crate::{dialect::Dialect, Cursor, DbError, Row, SqlValue};

/// ADO-style parameter direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

impl ParamDirection {
    #[must_use]
    pub const fn is_input(self) -> bool {
        matches!(self, Self::Input)
    }
}

/// Declared parameter type, used to materialize a concrete SQL type when the
/// bound value is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Bool,
    Int,
    UInt,
    Real,
    Text,
    Bytes,
    DateTime,
    Guid,
    Cursor,
}

impl SqlType {
    /// A non-null zero/empty instance of the type. Binding this first lets
    /// the driver infer a concrete SQL type before the value is replaced by
    /// the null marker.
    #[must_use]
    pub fn zero_value(self) -> SqlValue {
        match self {
            Self::Bool => SqlValue::Bool(false),
            Self::Int => SqlValue::Int(0),
            Self::UInt => SqlValue::UInt(0),
            Self::Real => SqlValue::Real(0.0),
            Self::Text => SqlValue::Text(String::new()),
            Self::Bytes => SqlValue::Bytes(vec![]),
            Self::DateTime => {
                SqlValue::DateTime(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH.naive_utc())
            }
            Self::Guid => SqlValue::Guid(uuid::Uuid::nil()),
            Self::Cursor => SqlValue::Cursor(Cursor::output()),
        }
    }
}

/// One bound parameter on a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Dialect-prefixed name, or empty for an anonymous parameter.
    pub name: String,
    pub value: SqlValue,
    pub direction: ParamDirection,
    /// Resolved type; survives the value being replaced by the null marker.
    pub ty: Option<SqlType>,
    /// Driver size hint (string truncation avoidance, GUID-as-string width).
    pub size: Option<i32>,
}

/// A named-value bag for bulk binding. Three shapes, resolved at the call
/// boundary: ordered anonymous values, a name/value mapping, or a
/// record-like list of named fields with declared types.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamBag {
    /// Anonymous positional values. Input direction only; providers without
    /// anonymous parameter support reject these at bind time.
    Values(Vec<SqlValue>),
    Named(Vec<(String, SqlValue)>),
    Fields(Vec<Field>),
}

/// One field of a record-shaped bag: the declared type stands in for the
/// value when the value is null.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: SqlValue,
    pub ty: SqlType,
}

impl Field {
    #[must_use]
    pub fn new(name: &str, value: impl Into<SqlValue>, ty: SqlType) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            ty,
        }
    }
}

impl From<Row> for ParamBag {
    fn from(row: Row) -> Self {
        Self::Named(row.columns)
    }
}

impl From<Vec<SqlValue>> for ParamBag {
    fn from(values: Vec<SqlValue>) -> Self {
        Self::Values(values)
    }
}

impl From<Vec<(String, SqlValue)>> for ParamBag {
    fn from(pairs: Vec<(String, SqlValue)>) -> Self {
        Self::Named(pairs)
    }
}

impl From<Vec<Field>> for ParamBag {
    fn from(fields: Vec<Field>) -> Self {
        Self::Fields(fields)
    }
}

/// SQL text plus its ordered bound parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    pub text: String,
    pub params: Vec<Parameter>,
    pub is_procedure: bool,
}

impl Command {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: vec![],
            is_procedure: false,
        }
    }

    #[must_use]
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            text: name.into(),
            params: vec![],
            is_procedure: true,
        }
    }

    /// Binds one parameter.
    ///
    /// * `name` of `Some("")` requests an anonymous parameter; an error when
    ///   the dialect has no anonymous support.
    /// * `name` of `None` auto-names the parameter with the current 0-based
    ///   position, so unnamed-argument calls produce `"0"`, `"1"`, ...
    /// * A null value with a type hint binds as a typed null: the type's
    ///   zero value goes through the dialect first so type and size stick,
    ///   then the value is set back to null with both re-asserted.
    /// * A null value with no type on a non-input parameter is an error
    ///   unless the dialect infers output types itself.
    ///
    /// # Errors
    ///
    /// * [`DbError::Capability`] for anonymous parameters, cursors or
    ///   untyped non-input nulls the dialect does not support.
    pub fn add_param(
        &mut self,
        dialect: &dyn Dialect,
        value: SqlValue,
        name: Option<&str>,
        direction: ParamDirection,
        ty: Option<SqlType>,
    ) -> Result<(), DbError> {
        let mut p = Parameter {
            name: String::new(),
            value: SqlValue::Null,
            direction: ParamDirection::Input,
            ty: None,
            size: None,
        };

        match name {
            Some("") => {
                if !dialect.set_anonymous_parameter(&mut p) {
                    return Err(DbError::capability(
                        "anonymous parameters",
                        dialect.provider_name(),
                    ));
                }
            }
            Some(name) => p.name = dialect.prefix_parameter_name(name),
            None => p.name = dialect.prefix_parameter_name(&self.params.len().to_string()),
        }

        dialect.set_direction(&mut p, direction);

        match value {
            SqlValue::Null => {
                if let Some(ty) = ty {
                    dialect.set_value(&mut p, ty.zero_value());
                    // lock type and size to what the dialect just assigned,
                    // then null the value; both must survive the overwrite
                    let (ty, size) = (p.ty, p.size);
                    p.value = SqlValue::Null;
                    p.ty = ty;
                    p.size = size;
                } else if !direction.is_input() && !dialect.ignores_output_types() {
                    return Err(DbError::capability_detail(
                        "untyped output parameters",
                        dialect.provider_name(),
                        format!(
                            "parameter \"{}\" requires a non-null value or a declared type \
                             so the SQL parameter type can be inferred",
                            p.name
                        ),
                    ));
                }
            }
            SqlValue::Cursor(cursor) => {
                if !dialect.set_cursor(&mut p, cursor.name().map(ToString::to_string)) {
                    return Err(DbError::capability(
                        "cursor parameters",
                        dialect.provider_name(),
                    ));
                }
            }
            value => dialect.set_value(&mut p, value),
        }

        self.params.push(p);
        Ok(())
    }

    /// Binds a slice of values as auto-named input parameters `"0".."n-1"`.
    ///
    /// # Errors
    ///
    /// * If binding any individual value fails.
    pub fn add_args(&mut self, dialect: &dyn Dialect, args: &[SqlValue]) -> Result<(), DbError> {
        for arg in args {
            self.add_param(dialect, arg.clone(), None, ParamDirection::Input, None)?;
        }
        Ok(())
    }

    /// Binds a whole bag with one direction.
    ///
    /// # Errors
    ///
    /// * [`DbError::Shape`] when anonymous values are bound with a
    ///   non-input direction.
    /// * Any single-parameter bind error.
    pub fn add_named_params(
        &mut self,
        dialect: &dyn Dialect,
        bag: &ParamBag,
        direction: ParamDirection,
    ) -> Result<(), DbError> {
        match bag {
            ParamBag::Values(values) => {
                if !direction.is_input() {
                    return Err(DbError::Shape(
                        "anonymous value arrays are supported for input parameters only"
                            .to_string(),
                    ));
                }
                for value in values {
                    self.add_param(dialect, value.clone(), Some(""), direction, None)?;
                }
            }
            ParamBag::Named(pairs) => {
                for (name, value) in pairs {
                    self.add_param(dialect, value.clone(), Some(name), direction, None)?;
                }
            }
            ParamBag::Fields(fields) => {
                for field in fields {
                    self.add_param(
                        dialect,
                        field.value.clone(),
                        Some(&field.name),
                        direction,
                        Some(field.ty),
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Non-input parameters in bind order, deprefixed for result naming.
    #[must_use]
    pub fn output_parameters(&self, dialect: &dyn Dialect) -> Vec<(String, &Parameter)> {
        self.params
            .iter()
            .filter(|p| !p.direction.is_input())
            .map(|p| (dialect.deprefix_parameter_name(&p.name), p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dialect::DialectKind;

    fn dialect(kind: DialectKind) -> &'static dyn Dialect {
        kind.dialect()
    }

    #[test]
    fn unnamed_values_auto_name_in_argument_order() {
        let d = dialect(DialectKind::SqlServer);
        let mut cmd = Command::new("SELECT 1");
        cmd.add_args(
            d,
            &[SqlValue::Int(5), SqlValue::Text("x".into()), SqlValue::Bool(true)],
        )
        .unwrap();

        let names: Vec<&str> = cmd.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["@0", "@1", "@2"]);
    }

    #[test]
    fn null_with_type_hint_keeps_type_after_null_overwrite() {
        let d = dialect(DialectKind::SqlServer);
        let mut cmd = Command::new("");
        cmd.add_param(
            d,
            SqlValue::Null,
            Some("total"),
            ParamDirection::Output,
            Some(SqlType::Int),
        )
        .unwrap();

        let p = &cmd.params[0];
        assert_eq!(p.value, SqlValue::Null);
        assert_eq!(p.ty, Some(SqlType::Int));
    }

    #[test]
    fn null_without_type_on_output_errors_unless_dialect_infers() {
        let strict = dialect(DialectKind::SqlServer);
        let mut cmd = Command::new("");
        let err = cmd
            .add_param(strict, SqlValue::Null, Some("n"), ParamDirection::Output, None)
            .unwrap_err();
        assert!(matches!(err, DbError::Capability { .. }));

        // Npgsql-style providers infer output types, so the same bind passes
        let lenient = dialect(DialectKind::PostgreSql);
        let mut cmd = Command::new("");
        cmd.add_param(lenient, SqlValue::Null, Some("n"), ParamDirection::Output, None)
            .unwrap();
        assert_eq!(cmd.params[0].value, SqlValue::Null);
    }

    #[test]
    fn anonymous_parameters_rejected_where_unsupported() {
        let d = dialect(DialectKind::MySql);
        let mut cmd = Command::new("");
        let err = cmd
            .add_param(d, SqlValue::Int(1), Some(""), ParamDirection::Input, None)
            .unwrap_err();
        assert!(matches!(err, DbError::Capability { .. }));

        let pg = dialect(DialectKind::PostgreSql);
        let mut cmd = Command::new("");
        cmd.add_param(pg, SqlValue::Int(1), Some(""), ParamDirection::Input, None)
            .unwrap();
        assert_eq!(cmd.params[0].name, "");
    }

    #[test]
    fn cursor_parameters_rejected_where_unsupported() {
        let d = dialect(DialectKind::SqlServer);
        let mut cmd = Command::new("");
        let err = cmd
            .add_param(
                d,
                SqlValue::Cursor(Cursor::output()),
                Some("c"),
                ParamDirection::Output,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, DbError::Capability { .. }));
    }

    #[test]
    fn anonymous_bag_rejects_non_input_direction() {
        let d = dialect(DialectKind::PostgreSql);
        let mut cmd = Command::new("");
        let err = cmd
            .add_named_params(
                d,
                &ParamBag::Values(vec![SqlValue::Int(1)]),
                ParamDirection::Output,
            )
            .unwrap_err();
        assert!(matches!(err, DbError::Shape(_)));
    }

    #[test]
    fn guid_coerces_to_string_on_postgres() {
        let pg = dialect(DialectKind::PostgreSql);
        let id = uuid::Uuid::new_v4();
        let mut cmd = Command::new("");
        cmd.add_param(pg, SqlValue::Guid(id), Some("id"), ParamDirection::Input, None)
            .unwrap();

        let p = &cmd.params[0];
        assert_eq!(p.value, SqlValue::Text(id.to_string()));
        assert_eq!(p.size, Some(36));

        // SQL Server binds GUIDs natively
        let ms = dialect(DialectKind::SqlServer);
        let mut cmd = Command::new("");
        cmd.add_param(ms, SqlValue::Guid(id), Some("id"), ParamDirection::Input, None)
            .unwrap();
        assert_eq!(cmd.params[0].value, SqlValue::Guid(id));
    }

    #[test]
    fn return_direction_remapped_to_output_on_postgres() {
        let pg = dialect(DialectKind::PostgreSql);
        let mut cmd = Command::new("");
        cmd.add_param(
            pg,
            SqlValue::Int(0),
            Some("result"),
            ParamDirection::ReturnValue,
            None,
        )
        .unwrap();
        assert_eq!(cmd.params[0].direction, ParamDirection::Output);
    }
}
