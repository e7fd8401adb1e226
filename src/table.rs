//! The core table model.
//!
//! A [`Table`] wraps one logical database table. The schema is introspected
//! lazily and cached for the life of the instance (build a new instance to
//! see DDL changes), rows are dynamic [`Row`]s, and every operation drives
//! the dialect for SQL generation and parameter binding. One connection and
//! at most one transaction belong to a single logical call; nothing is
//! pooled or shared here.

use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::{
    builder::{
        build_delete_command, build_insert_command, build_update_command,
        build_update_where_command, fill_pattern, pk_predicate, ready_order_by_clause,
        ready_where_clause, total_pages,
    },
    command::{ParamBag, ParamDirection},
    dialect::Dialect,
    driver::{Connection, Driver, OwnedConnection, ResultSets, Rows},
    dynamic::{ArgValue, MethodCall, MethodOp},
    provider::Provider,
    Command, DbError, Row, SqlValue,
};

pub type DynConnection = Box<dyn Connection>;

/// Validation message collector handed to the [`Hooks::validate`] hook.
#[derive(Debug, Default)]
pub struct Validation {
    errors: Vec<String>,
}

impl Validation {
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Null and empty-string values fail presence.
    pub fn validates_presence_of(&mut self, value: Option<&SqlValue>) {
        self.validates_presence_of_with_message(value, "Required");
    }

    pub fn validates_presence_of_with_message(&mut self, value: Option<&SqlValue>, message: &str) {
        let present = match value {
            None | Some(SqlValue::Null) => false,
            Some(SqlValue::Text(text)) => !text.is_empty(),
            Some(_) => true,
        };
        if !present {
            self.error(message);
        }
    }

    pub fn validates_numericality_of(&mut self, value: Option<&SqlValue>) {
        self.validates_numericality_of_with_message(value, "Should be a number");
    }

    pub fn validates_numericality_of_with_message(
        &mut self,
        value: Option<&SqlValue>,
        message: &str,
    ) {
        if !matches!(
            value,
            Some(SqlValue::Int(_) | SqlValue::UInt(_) | SqlValue::Real(_))
        ) {
            self.error(message);
        }
    }
}

/// Override points for table bindings. Immediate failures go through
/// `DbError`; validation instead accumulates messages, and the write paths
/// turn a non-empty list into one aggregated error.
pub trait Hooks: Send + Sync {
    fn validate(&self, item: &Row, validation: &mut Validation) {
        let _ = (item, validation);
    }

    /// False skips the save of this item, silently.
    fn before_save(&self, item: &mut Row) -> bool {
        let _ = item;
        true
    }

    /// False skips the delete of this item, silently.
    fn before_delete(&self, item: &Row) -> bool {
        let _ = item;
        true
    }

    fn inserted(&self, item: &mut Row) {
        let _ = item;
    }

    fn updated(&self, item: &mut Row) {
        let _ = item;
    }

    fn deleted(&self, item: &Row) {
        let _ = item;
    }
}

struct NoHooks;

impl Hooks for NoHooks {}

/// Directional parameter sets for the `*_with_params` surface.
#[derive(Default)]
pub struct ParamSets {
    pub input: Option<ParamBag>,
    pub output: Option<ParamBag>,
    pub input_output: Option<ParamBag>,
    pub return_value: Option<ParamBag>,
    pub is_procedure: bool,
}

impl ParamSets {
    #[must_use]
    pub fn procedure() -> Self {
        Self {
            is_procedure: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn input(mut self, bag: impl Into<ParamBag>) -> Self {
        self.input = Some(bag.into());
        self
    }

    #[must_use]
    pub fn output(mut self, bag: impl Into<ParamBag>) -> Self {
        self.output = Some(bag.into());
        self
    }

    #[must_use]
    pub fn input_output(mut self, bag: impl Into<ParamBag>) -> Self {
        self.input_output = Some(bag.into());
        self
    }

    #[must_use]
    pub fn return_value(mut self, bag: impl Into<ParamBag>) -> Self {
        self.return_value = Some(bag.into());
        self
    }
}

/// One page of a paged fetch. The count and page queries are independent
/// round trips, so the totals can be stale relative to the items under
/// concurrent writers.
pub struct PagedResult {
    pub total_records: u64,
    pub total_pages: u64,
    pub items: Rows,
}

/// The result of a dynamic method-name call.
pub enum MethodResult {
    Rows(Rows),
    Row(Option<Row>),
    Scalar(Option<SqlValue>),
    Count(i64),
}

pub struct TableBuilder {
    connection_string: String,
    table_name: String,
    primary_key_field: String,
    descriptor_field: Option<String>,
    primary_key_sequence: Option<String>,
    driver: Option<Arc<dyn Driver>>,
    hooks: Option<Arc<dyn Hooks>>,
}

impl TableBuilder {
    #[must_use]
    pub fn table_name(mut self, table_name: &str) -> Self {
        self.table_name = table_name.to_string();
        self
    }

    #[must_use]
    pub fn primary_key(mut self, primary_key_field: &str) -> Self {
        self.primary_key_field = primary_key_field.to_string();
        self
    }

    #[must_use]
    pub fn descriptor_field(mut self, descriptor_field: &str) -> Self {
        self.descriptor_field = Some(descriptor_field.to_string());
        self
    }

    /// Names the primary-key sequence. The empty string means the key is
    /// not sequenced at all; unset, the dialect's default applies.
    #[must_use]
    pub fn sequence(mut self, sequence: &str) -> Self {
        self.primary_key_sequence = Some(sequence.to_string());
        self
    }

    /// Injects a driver, overriding the bundled one. Required for
    /// providers shipped without a wire driver.
    #[must_use]
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// # Errors
    ///
    /// * [`DbError::Config`] for an unresolvable provider.
    pub fn build(self) -> Result<Table, DbError> {
        let provider = Provider::resolve(&self.connection_string, self.driver)?;
        let (schema_name, bare_table_name) = process_table_name(&self.table_name);
        let primary_key_sequence = self
            .primary_key_sequence
            .unwrap_or_else(|| provider.dialect().default_sequence_name().to_string());

        Ok(Table {
            provider,
            table_name: self.table_name,
            schema_name,
            bare_table_name,
            primary_key_field: if self.primary_key_field.is_empty() {
                "ID".to_string()
            } else {
                self.primary_key_field
            },
            descriptor_field: self.descriptor_field,
            primary_key_sequence,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoHooks)),
            errors: Mutex::new(vec![]),
            schema: OnceCell::new(),
        })
    }
}

/// Splits `schema.table` into its schema and bare-table parts; the last two
/// `.` segments win.
fn process_table_name(table_name: &str) -> (String, String) {
    let fragments: Vec<&str> = table_name.split('.').collect();
    if fragments.len() < 2 {
        (String::new(), table_name.to_string())
    } else {
        (
            fragments[fragments.len() - 2].to_string(),
            fragments[fragments.len() - 1].to_string(),
        )
    }
}

pub struct Table {
    provider: Provider,
    table_name: String,
    schema_name: String,
    bare_table_name: String,
    primary_key_field: String,
    descriptor_field: Option<String>,
    primary_key_sequence: String,
    hooks: Arc<dyn Hooks>,
    errors: Mutex<Vec<String>>,
    schema: OnceCell<Vec<Row>>,
}

impl Table {
    #[must_use]
    pub fn builder(connection_string: &str) -> TableBuilder {
        TableBuilder {
            connection_string: connection_string.to_string(),
            table_name: String::new(),
            primary_key_field: String::new(),
            descriptor_field: None,
            primary_key_sequence: None,
            driver: None,
            hooks: None,
        }
    }

    /// A table-less binding, good for raw `query`/`scalar`/`execute` use.
    ///
    /// # Errors
    ///
    /// * [`DbError::Config`] for an unresolvable provider.
    pub fn open(connection_string: &str) -> Result<Self, DbError> {
        Self::builder(connection_string).build()
    }

    #[must_use]
    pub fn dialect(&self) -> &'static dyn Dialect {
        self.provider.dialect()
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[must_use]
    pub fn primary_key_field(&self) -> &str {
        &self.primary_key_field
    }

    /// Messages collected by the most recent [`Table::is_valid`] check.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Opens a dedicated connection through the provider, for callers that
    /// need to scope one across calls (cursor chaining).
    ///
    /// # Errors
    ///
    /// * Connect/configuration errors from the provider.
    pub async fn open_connection(&self) -> Result<DynConnection, DbError> {
        self.provider.open_connection().await
    }

    // ------------------------------------------------------------------
    // validation
    // ------------------------------------------------------------------

    /// Runs the validate hook against the item. The error list is cleared
    /// at the start of every check and readable through [`Table::errors`].
    pub fn is_valid(&self, item: &Row) -> bool {
        let mut validation = Validation::default();
        self.hooks.validate(item, &mut validation);
        let valid = validation.errors.is_empty();
        if let Ok(mut errors) = self.errors.lock() {
            *errors = validation.errors;
        }
        valid
    }

    fn validation_error(&self, operation: &str) -> DbError {
        DbError::Validation(format!("Can't {operation}: {}", self.errors().join("; ")))
    }

    #[must_use]
    pub fn has_primary_key(&self, item: &Row) -> bool {
        item.get_ignore_case(&self.primary_key_field)
            .is_some_and(|value| !value.is_null())
    }

    #[must_use]
    pub fn primary_key_of(&self, item: &Row) -> Option<SqlValue> {
        item.get_ignore_case(&self.primary_key_field)
    }

    /// Sets `key` to `value` unless the item already carries that field.
    pub fn default_to(key: &str, value: SqlValue, item: &mut Row) {
        if !item.contains(key) {
            item.set(key, value);
        }
    }

    // ------------------------------------------------------------------
    // schema
    // ------------------------------------------------------------------

    /// The table's introspected column rows, fetched once and cached.
    ///
    /// # Errors
    ///
    /// * Query errors from the introspection round trip.
    pub async fn schema(&self) -> Result<&[Row], DbError> {
        self.schema
            .get_or_try_init(|| async {
                let dialect = self.dialect();
                let (sql, args) = if self.schema_name.is_empty() {
                    (
                        dialect.table_without_schema_query(),
                        vec![SqlValue::Text(self.bare_table_name.clone())],
                    )
                } else {
                    (
                        dialect.table_with_schema_query(),
                        vec![
                            SqlValue::Text(self.bare_table_name.clone()),
                            SqlValue::Text(self.schema_name.clone()),
                        ],
                    )
                };
                let rows = self.query(&sql, &args).await?.collect().await?;
                Ok(dialect.post_process_schema(rows))
            })
            .await
            .map(Vec::as_slice)
    }

    /// The schema row of one column, matched case-insensitively.
    ///
    /// # Errors
    ///
    /// * Schema fetch errors.
    pub async fn column(&self, column_name: &str) -> Result<Option<Row>, DbError> {
        let dialect = self.dialect();
        Ok(self
            .schema()
            .await?
            .iter()
            .find(|row| {
                dialect
                    .column_name_of(row)
                    .is_some_and(|name| name.eq_ignore_ascii_case(column_name))
            })
            .cloned())
    }

    /// # Errors
    ///
    /// * Schema fetch errors.
    pub async fn column_exists(&self, column_name: &str) -> Result<bool, DbError> {
        Ok(self.column(column_name).await?.is_some())
    }

    /// The parsed default value of one column, when the schema declares
    /// one.
    ///
    /// # Errors
    ///
    /// * Schema fetch errors.
    pub async fn default_value(&self, column_name: &str) -> Result<Option<SqlValue>, DbError> {
        let dialect = self.dialect();
        Ok(self
            .column(column_name)
            .await?
            .and_then(|row| dialect.default_value_of(&row)))
    }

    /// A synthetic row mapping every schema column to its default value.
    ///
    /// # Errors
    ///
    /// * Schema fetch errors.
    pub async fn prototype(&self) -> Result<Row, DbError> {
        let dialect = self.dialect();
        let mut row = Row::new();
        for schema_row in self.schema().await? {
            if let Some(name) = dialect.column_name_of(schema_row) {
                let value = dialect.default_value_of(schema_row).unwrap_or(SqlValue::Null);
                row.set(&name, value);
            }
        }
        Ok(row)
    }

    // ------------------------------------------------------------------
    // command construction and execution plumbing
    // ------------------------------------------------------------------

    /// Builds a command with auto-named positional args plus the
    /// directional parameter sets.
    ///
    /// # Errors
    ///
    /// * Parameter binding errors.
    pub fn create_command_with_params(
        &self,
        sql: &str,
        params: &ParamSets,
        args: &[SqlValue],
    ) -> Result<Command, DbError> {
        let dialect = self.dialect();
        let mut cmd = if params.is_procedure {
            Command::procedure(sql)
        } else {
            Command::new(sql)
        };
        cmd.add_args(dialect, args)?;
        if let Some(bag) = &params.input {
            cmd.add_named_params(dialect, bag, ParamDirection::Input)?;
        }
        if let Some(bag) = &params.output {
            cmd.add_named_params(dialect, bag, ParamDirection::Output)?;
        }
        if let Some(bag) = &params.input_output {
            cmd.add_named_params(dialect, bag, ParamDirection::InputOutput)?;
        }
        if let Some(bag) = &params.return_value {
            cmd.add_named_params(dialect, bag, ParamDirection::ReturnValue)?;
        }
        Ok(cmd)
    }

    /// The read-path state machine: open a connection unless the caller
    /// supplied one, begin a wrapping transaction when the dialect demands
    /// one for this command (owned connections only), execute, and hand the
    /// sequence its owned resources. Supplied connections are never
    /// wrapped; their transaction scope belongs to the caller.
    async fn run_query(
        &self,
        mut cmd: Command,
        conn: Option<&mut DynConnection>,
    ) -> Result<Rows, DbError> {
        log::trace!("Running query: {} with {} params", cmd.text, cmd.params.len());
        match conn {
            Some(conn) => {
                let reader = conn.query(&cmd).await?;
                Ok(Rows::new(reader, None))
            }
            None => {
                let mut conn = self.open_connection().await?;
                let wrap = self.dialect().requires_wrapping_transaction(&mut cmd);
                if wrap {
                    conn.begin().await?;
                }
                let reader = conn.query(&cmd).await?;
                Ok(Rows::new(
                    reader,
                    Some(OwnedConnection {
                        conn,
                        in_transaction: wrap,
                    }),
                ))
            }
        }
    }

    async fn run_scalar(
        &self,
        cmd: Command,
        conn: Option<&mut DynConnection>,
    ) -> Result<Option<SqlValue>, DbError> {
        log::trace!("Running scalar: {}", cmd.text);
        match conn {
            Some(conn) => conn.execute_scalar(&cmd).await,
            None => {
                let mut conn = self.open_connection().await?;
                conn.execute_scalar(&cmd).await
            }
        }
    }

    // ------------------------------------------------------------------
    // query surface
    // ------------------------------------------------------------------

    /// Streams the rows of a raw SQL statement with auto-named positional
    /// arguments.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Rows, DbError> {
        self.query_with_params(sql, &ParamSets::default(), None, args)
            .await
    }

    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn query_with_params(
        &self,
        sql: &str,
        params: &ParamSets,
        conn: Option<&mut DynConnection>,
        args: &[SqlValue],
    ) -> Result<Rows, DbError> {
        let cmd = self.create_command_with_params(sql, params, args)?;
        self.run_query(cmd, conn).await
    }

    /// Streams the rows of a procedure or function call.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn query_from_procedure(
        &self,
        name: &str,
        params: ParamSets,
        conn: Option<&mut DynConnection>,
    ) -> Result<Rows, DbError> {
        let params = ParamSets {
            is_procedure: true,
            ..params
        };
        self.query_with_params(name, &params, conn, &[]).await
    }

    /// Streams multiple result sets. The outer sequence advances through
    /// result sets; both levels are single-pass.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn query_multiple(
        &self,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<ResultSets, DbError> {
        self.query_multiple_with_params(sql, &ParamSets::default(), None, args)
            .await
    }

    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn query_multiple_with_params(
        &self,
        sql: &str,
        params: &ParamSets,
        conn: Option<&mut DynConnection>,
        args: &[SqlValue],
    ) -> Result<ResultSets, DbError> {
        Ok(ResultSets::new(
            self.query_with_params(sql, params, conn, args).await?,
        ))
    }

    /// Streams multiple result sets from a procedure or function call.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn query_multiple_from_procedure(
        &self,
        name: &str,
        params: ParamSets,
        conn: Option<&mut DynConnection>,
    ) -> Result<ResultSets, DbError> {
        let params = ParamSets {
            is_procedure: true,
            ..params
        };
        self.query_multiple_with_params(name, &params, conn, &[])
            .await
    }

    /// First column of the first row, or `None` for an empty result.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn scalar(&self, sql: &str, args: &[SqlValue]) -> Result<Option<SqlValue>, DbError> {
        self.scalar_with_params(sql, &ParamSets::default(), None, args)
            .await
    }

    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn scalar_with_params(
        &self,
        sql: &str,
        params: &ParamSets,
        conn: Option<&mut DynConnection>,
        args: &[SqlValue],
    ) -> Result<Option<SqlValue>, DbError> {
        let cmd = self.create_command_with_params(sql, params, args)?;
        self.run_scalar(cmd, conn).await
    }

    /// All records matching the WHERE fragment, ordered and limited as
    /// requested. `limit` of 0 means no limit; empty `columns` means `*`.
    ///
    /// # Errors
    ///
    /// * [`DbError::Shape`] when the binding has no table name.
    /// * Binding or execution errors.
    pub async fn all(
        &self,
        where_clause: &str,
        order_by: &str,
        limit: usize,
        columns: &str,
        args: &[SqlValue],
    ) -> Result<Rows, DbError> {
        self.all_with_params(
            where_clause,
            order_by,
            limit,
            columns,
            &ParamSets::default(),
            None,
            args,
        )
        .await
    }

    /// # Errors
    ///
    /// * [`DbError::Shape`] when the binding has no table name.
    /// * Binding or execution errors.
    #[allow(clippy::too_many_arguments)]
    pub async fn all_with_params(
        &self,
        where_clause: &str,
        order_by: &str,
        limit: usize,
        columns: &str,
        params: &ParamSets,
        conn: Option<&mut DynConnection>,
        args: &[SqlValue],
    ) -> Result<Rows, DbError> {
        let table_name = self.require_table_name()?;
        let pattern = self.dialect().select_pattern(
            limit,
            &ready_where_clause(where_clause),
            &ready_order_by_clause(order_by),
        );
        let sql = fill_pattern(&pattern, normalize_columns(columns), table_name);
        self.query_with_params(&sql, params, conn, args).await
    }

    /// A single row by WHERE fragment, in ascending primary-key order.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn single(&self, where_clause: &str, args: &[SqlValue]) -> Result<Option<Row>, DbError> {
        self.all(where_clause, "", 1, "*", args).await?.first().await
    }

    /// A single row by primary-key value.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn single_by_key(
        &self,
        key: SqlValue,
        columns: &str,
    ) -> Result<Option<Row>, DbError> {
        let predicate = pk_predicate(self.dialect(), &self.primary_key_field);
        self.all(&predicate, "", 1, columns, &[key]).await?.first().await
    }

    /// Row count for this table.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn count(&self, where_clause: &str, args: &[SqlValue]) -> Result<i64, DbError> {
        let table_name = self.require_table_name()?.to_string();
        self.count_on(&table_name, where_clause, args).await
    }

    /// Row count for an arbitrary table name.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn count_on(
        &self,
        table_name: &str,
        where_clause: &str,
        args: &[SqlValue],
    ) -> Result<i64, DbError> {
        self.count_with_params(table_name, where_clause, &ParamSets::default(), None, args)
            .await
    }

    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn count_with_params(
        &self,
        table_name: &str,
        where_clause: &str,
        params: &ParamSets,
        conn: Option<&mut DynConnection>,
        args: &[SqlValue],
    ) -> Result<i64, DbError> {
        let pattern = format!(
            "{}{}",
            self.dialect().count_pattern(),
            ready_where_clause(where_clause).trim_start()
        );
        let sql = fill_pattern(&pattern, "*", table_name);
        let value = self.scalar_with_params(&sql, params, conn, args).await?;
        Ok(scalar_to_i64(value))
    }

    /// A page of rows plus the total record and page counts. Pages are
    /// 1-based.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    #[allow(clippy::too_many_arguments)]
    pub async fn paged(
        &self,
        where_clause: &str,
        order_by: &str,
        columns: &str,
        page_size: usize,
        current_page: usize,
        args: &[SqlValue],
    ) -> Result<PagedResult, DbError> {
        let table_name = self.require_table_name()?.to_string();
        self.paged_on(
            &table_name,
            &self.primary_key_field,
            where_clause,
            order_by,
            columns,
            page_size,
            current_page,
            args,
        )
        .await
    }

    /// A page over an arbitrary source (table name or subquery SQL), with
    /// an explicit ordering key.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    #[allow(clippy::too_many_arguments)]
    pub async fn paged_on(
        &self,
        source: &str,
        primary_key: &str,
        where_clause: &str,
        order_by: &str,
        columns: &str,
        page_size: usize,
        current_page: usize,
        args: &[SqlValue],
    ) -> Result<PagedResult, DbError> {
        let order_by_clause = if order_by.trim().is_empty() {
            format!(
                " ORDER BY {}",
                if primary_key.is_empty() {
                    &self.primary_key_field
                } else {
                    primary_key
                }
            )
        } else {
            ready_order_by_clause(order_by)
        };

        let pair = self.dialect().build_paging_query_pair(
            source,
            &order_by_clause,
            &ready_where_clause(where_clause),
            page_size,
            current_page,
        );

        let total = scalar_to_i64(self.scalar(&pair.count_query, args).await?);
        let total_records = u64::try_from(total).unwrap_or(0);
        let main_query = pair.main_query.replace("{projection}", normalize_columns(columns));
        let items = self.query(&main_query, args).await?;

        Ok(PagedResult {
            total_records,
            total_pages: total_pages(total_records, page_size as u64),
            items,
        })
    }

    /// A `primary key -> descriptor` map for lookup tables.
    ///
    /// # Errors
    ///
    /// * [`DbError::Shape`] when no descriptor field was configured.
    /// * Binding or execution errors.
    pub async fn key_values(
        &self,
        order_by: &str,
    ) -> Result<Vec<(String, SqlValue)>, DbError> {
        let Some(descriptor_field) = self.descriptor_field.clone() else {
            return Err(DbError::Shape(
                "no descriptor field is set — configure one on the builder to describe the \
                 text value to show"
                    .to_string(),
            ));
        };
        let columns = format!("{}, {}", self.primary_key_field, descriptor_field);
        let rows = self.all("", order_by, 0, &columns, &[]).await?.collect().await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let key = row
                    .get_ignore_case(&self.primary_key_field)
                    .map(|v| display_value(&v))
                    .unwrap_or_default();
                let value = row
                    .get_ignore_case(&descriptor_field)
                    .unwrap_or(SqlValue::Null);
                (key, value)
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // write surface
    // ------------------------------------------------------------------

    /// Inserts one row and hands it back with the generated primary-key
    /// value written in. `None` when [`Hooks::before_save`] vetoed the
    /// insert.
    ///
    /// # Errors
    ///
    /// * [`DbError::Validation`] when the validate hook rejects the row.
    /// * Binding or execution errors.
    pub async fn insert(&self, row: &Row) -> Result<Option<Row>, DbError> {
        if !self.is_valid(row) {
            return Err(self.validation_error("insert"));
        }
        let mut item = row.clone();
        if !self.hooks.before_save(&mut item) {
            return Ok(None);
        }
        let mut conn = self.open_connection().await?;
        self.perform_insert(&mut conn, &mut item).await?;
        self.hooks.inserted(&mut item);
        Ok(Some(item))
    }

    /// Updates the row matching the primary-key value. Returns the
    /// affected count; 0 when [`Hooks::before_save`] vetoed it.
    ///
    /// # Errors
    ///
    /// * [`DbError::Validation`] when the validate hook rejects the row.
    /// * [`DbError::Shape`] when no settable fields remain.
    /// * Binding or execution errors.
    pub async fn update(&self, row: &Row, key: SqlValue) -> Result<u64, DbError> {
        if !self.is_valid(row) {
            return Err(self.validation_error("update"));
        }
        let mut item = row.clone();
        if !self.hooks.before_save(&mut item) {
            return Ok(0);
        }
        let cmd = build_update_command(
            self.dialect(),
            self.require_table_name()?,
            &self.primary_key_field,
            &item,
            key,
        )?;
        let result = self.execute_command(cmd).await?;
        self.hooks.updated(&mut item);
        Ok(result)
    }

    /// Updates every row matching the WHERE fragment. An empty fragment
    /// updates nothing — pass `1=1` to mean "all rows".
    ///
    /// # Errors
    ///
    /// * [`DbError::Validation`] when the validate hook rejects the row.
    /// * Binding or execution errors.
    pub async fn update_where(
        &self,
        row: &Row,
        where_clause: &str,
        args: &[SqlValue],
    ) -> Result<u64, DbError> {
        if where_clause.trim().is_empty() {
            return Ok(0);
        }
        if !self.is_valid(row) {
            return Err(self.validation_error("update"));
        }
        let mut item = row.clone();
        if !self.hooks.before_save(&mut item) {
            return Ok(0);
        }
        let cmd = build_update_where_command(
            self.dialect(),
            self.require_table_name()?,
            &self.primary_key_field,
            &item,
            where_clause,
            args,
        )?;
        let result = self.execute_command(cmd).await?;
        self.hooks.updated(&mut item);
        Ok(result)
    }

    /// Deletes by key when one is given (fetching the row first so the
    /// delete hooks see it), otherwise by the WHERE fragment.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn delete(
        &self,
        key: Option<SqlValue>,
        where_clause: &str,
        args: &[SqlValue],
    ) -> Result<u64, DbError> {
        let dialect = self.dialect();
        let table_name = self.require_table_name()?.to_string();

        let Some(key) = key else {
            // direct delete, no fetch of individual rows
            let cmd =
                build_delete_command(dialect, &table_name, &self.primary_key_field, where_clause, None, args)?;
            return self.execute_command(cmd).await;
        };

        let existing = self.single_by_key(key.clone(), "*").await?;
        if let Some(existing) = &existing {
            if !self.hooks.before_delete(existing) {
                return Ok(0);
            }
        }
        let cmd = build_delete_command(
            dialect,
            &table_name,
            &self.primary_key_field,
            "",
            Some(key),
            &[],
        )?;
        let result = self.execute_command(cmd).await?;
        if let Some(existing) = existing {
            self.hooks.deleted(&existing);
        }
        Ok(result)
    }

    /// Saves every row in one shared connection and transaction: rows
    /// carrying a primary-key value update, the rest insert (with the
    /// generated key written back). A failure part-way leaves the
    /// transaction uncommitted, so nothing partial persists.
    ///
    /// # Errors
    ///
    /// * [`DbError::Validation`] when any row fails validation (checked
    ///   before anything executes).
    /// * Binding or execution errors.
    pub async fn save(&self, rows: &mut [Row]) -> Result<u64, DbError> {
        self.perform_save(false, rows).await
    }

    /// Like [`Table::save`] but every row inserts, primary key or not.
    ///
    /// # Errors
    ///
    /// * Same as [`Table::save`].
    pub async fn save_as_new(&self, rows: &mut [Row]) -> Result<u64, DbError> {
        self.perform_save(true, rows).await
    }

    async fn perform_save(&self, all_saves_are_inserts: bool, rows: &mut [Row]) -> Result<u64, DbError> {
        if rows.iter().any(|row| !self.is_valid(row)) {
            return Err(self.validation_error("save this item"));
        }

        let table_name = self.require_table_name()?.to_string();
        let mut conn = self.open_connection().await?;
        conn.begin().await?;

        let mut result = 0;
        for item in rows.iter_mut() {
            if !self.hooks.before_save(item) {
                continue;
            }
            let key = if all_saves_are_inserts {
                None
            } else {
                self.primary_key_of(item).filter(|value| !value.is_null())
            };
            if let Some(key) = key {
                let cmd = build_update_command(
                    self.dialect(),
                    &table_name,
                    &self.primary_key_field,
                    item,
                    key,
                )?;
                result += conn.execute(&cmd).await?;
                self.hooks.updated(item);
            } else {
                self.perform_insert(&mut conn, item).await?;
                self.hooks.inserted(item);
                result += 1;
            }
        }

        conn.commit().await?;
        Ok(result)
    }

    /// Pre-generated keys (sequences) fetch the value first and inject it
    /// into the insert; post-generated keys (identity columns) batch the
    /// retrieval onto the insert and read the combined scalar back. Either
    /// way the caller's row ends up carrying the stored key.
    async fn perform_insert(
        &self,
        conn: &mut DynConnection,
        item: &mut Row,
    ) -> Result<(), DbError> {
        let dialect = self.dialect();
        let table_name = self.require_table_name()?.to_string();
        let sequenced = !self.primary_key_sequence.is_empty();

        if dialect.sequence_value_before_insert() && sequenced {
            let generated = self
                .run_scalar_on(
                    conn,
                    Command::new(dialect.identity_retrieval_statement(&self.primary_key_sequence)),
                )
                .await?
                .ok_or(DbError::NoRow)?;
            item.set(&self.primary_key_field, generated);
        }

        let mut cmd = build_insert_command(dialect, &table_name, item)?;

        if dialect.sequence_value_before_insert() || !sequenced {
            conn.execute(&cmd).await?;
        } else {
            cmd.text.push(';');
            cmd.text
                .push_str(&dialect.identity_retrieval_statement(&self.primary_key_sequence));
            let generated = self
                .run_scalar_on(conn, cmd)
                .await?
                .ok_or(DbError::NoRow)?;
            item.set(&self.primary_key_field, generated);
        }
        Ok(())
    }

    async fn run_scalar_on(
        &self,
        conn: &mut DynConnection,
        cmd: Command,
    ) -> Result<Option<SqlValue>, DbError> {
        log::trace!("Running scalar: {}", cmd.text);
        conn.execute_scalar(&cmd).await
    }

    /// Executes raw SQL with auto-named positional arguments in its own
    /// transaction.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<u64, DbError> {
        let mut cmd = Command::new(sql);
        cmd.add_args(self.dialect(), args)?;
        self.execute_command(cmd).await
    }

    /// # Errors
    ///
    /// * Execution errors.
    pub async fn execute_command(&self, cmd: Command) -> Result<u64, DbError> {
        self.execute_commands(vec![cmd]).await
    }

    /// Executes raw SQL on a caller-scoped connection, outside any
    /// table-managed transaction. This is the overload cursor chaining and
    /// caller transaction control hang off.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn execute_on(
        &self,
        sql: &str,
        conn: &mut DynConnection,
        args: &[SqlValue],
    ) -> Result<u64, DbError> {
        let mut cmd = Command::new(sql);
        cmd.add_args(self.dialect(), args)?;
        log::trace!("Executing: {}", cmd.text);
        conn.execute(&cmd).await
    }

    /// Executes commands strictly in the supplied order inside one
    /// transaction on one connection, returning the summed affected
    /// counts. Any failure aborts before commit.
    ///
    /// # Errors
    ///
    /// * Execution errors.
    pub async fn execute_commands(&self, cmds: Vec<Command>) -> Result<u64, DbError> {
        let mut conn = self.open_connection().await?;
        conn.begin().await?;
        let mut result = 0;
        for cmd in cmds {
            log::trace!("Executing: {}", cmd.text);
            result += conn.execute(&cmd).await?;
        }
        conn.commit().await?;
        Ok(result)
    }

    /// Executes a procedure and returns the deprefixed non-input parameter
    /// results as a row.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn execute_as_procedure(
        &self,
        name: &str,
        params: ParamSets,
        conn: Option<&mut DynConnection>,
    ) -> Result<Row, DbError> {
        let params = ParamSets {
            is_procedure: true,
            ..params
        };
        self.execute_with_params(name, &params, conn, &[]).await
    }

    /// Executes SQL or a procedure, reading back output, input-output and
    /// return parameters.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn execute_with_params(
        &self,
        sql: &str,
        params: &ParamSets,
        conn: Option<&mut DynConnection>,
        args: &[SqlValue],
    ) -> Result<Row, DbError> {
        let cmd = self.create_command_with_params(sql, params, args)?;
        log::trace!("Executing with params: {}", cmd.text);
        match conn {
            Some(conn) => conn.call_procedure(&cmd).await,
            None => {
                let mut conn = self.open_connection().await?;
                conn.call_procedure(&cmd).await
            }
        }
    }

    // ------------------------------------------------------------------
    // dynamic dispatch
    // ------------------------------------------------------------------

    /// Parses and executes a dynamic method-name query; see
    /// [`MethodCall::parse`] for the conventions.
    ///
    /// # Errors
    ///
    /// * Parse, binding or execution errors.
    pub async fn call(
        &self,
        method: &str,
        named_args: Vec<(String, ArgValue)>,
    ) -> Result<MethodResult, DbError> {
        let call = MethodCall::parse(
            self.dialect(),
            &self.primary_key_field,
            method,
            named_args,
        )?;
        self.invoke(call).await
    }

    /// Executes a parsed [`MethodCall`] against the closed set of query
    /// operations.
    ///
    /// # Errors
    ///
    /// * Binding or execution errors.
    pub async fn invoke(&self, call: MethodCall) -> Result<MethodResult, DbError> {
        let in_params = ParamSets::default().input(ParamBag::Named(call.named_params.clone()));
        match call.op {
            MethodOp::Count => {
                let table_name = self.require_table_name()?.to_string();
                let count = self
                    .count_with_params(&table_name, &call.where_clause, &in_params, None, &call.args)
                    .await?;
                Ok(MethodResult::Count(count))
            }
            MethodOp::Aggregate(aggregate) => {
                let table_name = self.require_table_name()?.to_string();
                let Some(function) = self.dialect().aggregate_function(aggregate) else {
                    return Err(DbError::capability(
                        aggregate,
                        self.dialect().provider_name(),
                    ));
                };
                let sql = format!(
                    "SELECT {function}({}) FROM {table_name}{}",
                    call.columns, call.where_clause
                );
                let value = self
                    .scalar_with_params(&sql, &in_params, None, &call.args)
                    .await?;
                Ok(MethodResult::Scalar(value))
            }
            MethodOp::FetchOne => {
                let row = self
                    .all_with_params(
                        &call.where_clause,
                        &call.order_by_clause,
                        1,
                        &call.columns,
                        &in_params,
                        None,
                        &call.args,
                    )
                    .await?
                    .first()
                    .await?;
                Ok(MethodResult::Row(row))
            }
            MethodOp::FetchMany => {
                let rows = self
                    .all_with_params(
                        &call.where_clause,
                        &call.order_by_clause,
                        0,
                        &call.columns,
                        &in_params,
                        None,
                        &call.args,
                    )
                    .await?;
                Ok(MethodResult::Rows(rows))
            }
        }
    }

    fn require_table_name(&self) -> Result<&str, DbError> {
        if self.table_name.is_empty() {
            Err(DbError::Shape(
                "this binding has no table name — set one on the builder".to_string(),
            ))
        } else {
            Ok(&self.table_name)
        }
    }
}

fn normalize_columns(columns: &str) -> &str {
    if columns.trim().is_empty() {
        "*"
    } else {
        columns
    }
}

/// Cross-dialect scalar-to-count coercion; drivers disagree on the width
/// and type of `COUNT(*)`.
fn scalar_to_i64(value: Option<SqlValue>) -> i64 {
    match value {
        Some(SqlValue::Int(value)) => value,
        Some(SqlValue::UInt(value)) => i64::try_from(value).unwrap_or(i64::MAX),
        #[allow(clippy::cast_possible_truncation)]
        Some(SqlValue::Real(value)) => value as i64,
        Some(SqlValue::Text(value)) => value.parse().unwrap_or(0),
        _ => 0,
    }
}

fn display_value(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Bool(value) => value.to_string(),
        SqlValue::Int(value) => value.to_string(),
        SqlValue::UInt(value) => value.to_string(),
        SqlValue::Real(value) => value.to_string(),
        SqlValue::Text(value) => value.clone(),
        SqlValue::Bytes(value) => format!("{} bytes", value.len()),
        SqlValue::DateTime(value) => value.to_string(),
        SqlValue::Guid(value) => value.to_string(),
        SqlValue::Cursor(cursor) => cursor.name().unwrap_or("<cursor>").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::row;

    fn sqlite_table() -> Table {
        Table::builder("Data Source=:memory:;ProviderName=sqlite")
            .table_name("films")
            .primary_key("ID")
            .build()
            .unwrap()
    }

    #[test]
    fn table_names_split_on_the_last_two_segments() {
        assert_eq!(process_table_name("films"), (String::new(), "films".into()));
        assert_eq!(
            process_table_name("public.films"),
            ("public".into(), "films".into())
        );
        assert_eq!(
            process_table_name("db.public.films"),
            ("public".into(), "films".into())
        );
    }

    #[test]
    fn primary_key_defaults_to_id() {
        let table = Table::builder("ProviderName=sqlite")
            .table_name("films")
            .build()
            .unwrap();
        assert_eq!(table.primary_key_field(), "ID");
    }

    #[test]
    fn sequence_defaults_come_from_the_dialect() {
        let table = sqlite_table();
        assert_eq!(table.primary_key_sequence, "last_insert_rowid()");

        let not_sequenced = Table::builder("Data Source=:memory:;ProviderName=sqlite")
            .table_name("films")
            .sequence("")
            .build()
            .unwrap();
        assert_eq!(not_sequenced.primary_key_sequence, "");
    }

    #[test]
    fn unknown_provider_fails_at_construction() {
        let err = Table::builder("ProviderName=db2;Server=x")
            .table_name("films")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn has_primary_key_ignores_null_values() {
        let table = sqlite_table();
        assert!(table.has_primary_key(&row! { "ID" => 3 }));
        assert!(table.has_primary_key(&row! { "id" => 3 }));
        assert!(!table.has_primary_key(&row! { "ID" => SqlValue::Null }));
        assert!(!table.has_primary_key(&row! { "title" => "x" }));
    }

    #[test]
    fn is_valid_clears_errors_each_check() {
        struct RequireTitle;
        impl Hooks for RequireTitle {
            fn validate(&self, item: &Row, validation: &mut Validation) {
                validation.validates_presence_of(item.get("title").as_ref());
            }
        }

        let table = Table::builder("Data Source=:memory:;ProviderName=sqlite")
            .table_name("films")
            .hooks(Arc::new(RequireTitle))
            .build()
            .unwrap();

        assert!(!table.is_valid(&row! { "year" => 1999 }));
        assert_eq!(table.errors(), vec!["Required".to_string()]);

        assert!(table.is_valid(&row! { "title" => "Alien" }));
        assert!(table.errors().is_empty());
    }

    #[test]
    fn default_to_only_fills_absent_fields() {
        let mut item = row! { "title" => "Alien" };
        Table::default_to("title", SqlValue::Text("x".into()), &mut item);
        Table::default_to("rating", SqlValue::Text("R".into()), &mut item);
        assert_eq!(item.get("title"), Some(SqlValue::Text("Alien".into())));
        assert_eq!(item.get("rating"), Some(SqlValue::Text("R".into())));
    }

    #[test]
    fn scalar_coercion_tolerates_driver_width_differences() {
        assert_eq!(scalar_to_i64(Some(SqlValue::Int(42))), 42);
        assert_eq!(scalar_to_i64(Some(SqlValue::UInt(42))), 42);
        assert_eq!(scalar_to_i64(Some(SqlValue::Text("42".into()))), 42);
        assert_eq!(scalar_to_i64(None), 0);
    }
}
