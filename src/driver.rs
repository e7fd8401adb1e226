//! The driver capability seam.
//!
//! The core consumes exactly this much of a database driver: open a
//! connection, execute a command (non-query, scalar, row-returning or
//! procedure), read rows forward-only, and delimit transactions. Bundled
//! bindings live behind cargo features; anything else can be supplied
//! through [`crate::TableBuilder::driver`].

use std::collections::VecDeque;
use std::fmt::Debug;

use async_trait::async_trait;

use crate::{Command, DbError, Row, SqlValue};

#[async_trait]
pub trait Driver: Send + Sync + Debug {
    /// Opens one dedicated connection. No pooling happens at this layer;
    /// reuse and caching are the driver's own business.
    async fn open(&self, connection_string: &str) -> Result<Box<dyn Connection>, DbError>;
}

/// One open connection, owned exclusively by a single logical call unless
/// the caller passes it around explicitly (cursor chaining).
#[async_trait]
pub trait Connection: Send {
    /// Runs a non-query command; returns the affected row count.
    async fn execute(&mut self, cmd: &Command) -> Result<u64, DbError>;

    /// Runs a command and returns the first column of its first row. A
    /// multi-statement batch returns the scalar of its last row-producing
    /// statement; drivers without batched execution run the statements
    /// sequentially on this same connection.
    async fn execute_scalar(&mut self, cmd: &Command) -> Result<Option<SqlValue>, DbError>;

    /// Runs a row-returning command. The PostgreSQL binding substitutes the
    /// dereferencing reader here when the result carries ref-cursor columns.
    async fn query(&mut self, cmd: &Command) -> Result<Box<dyn RowReader>, DbError>;

    /// Runs a procedure command and returns its non-input parameter results
    /// as a row keyed by deprefixed parameter name.
    async fn call_procedure(&mut self, cmd: &Command) -> Result<Row, DbError>;

    async fn begin(&mut self) -> Result<(), DbError>;
    async fn commit(&mut self) -> Result<(), DbError>;
    async fn rollback(&mut self) -> Result<(), DbError>;
}

/// Forward-only row source. `next_row` yields rows of the current result
/// set; `next_result` advances to the next result set.
#[async_trait]
pub trait RowReader: Send {
    async fn next_row(&mut self) -> Result<Option<Row>, DbError>;

    async fn next_result(&mut self) -> Result<bool, DbError>;
}

/// Fully buffered reader for drivers whose protocol hands rows over
/// eagerly.
#[derive(Debug, Default)]
pub struct BufferedReader {
    sets: VecDeque<VecDeque<Row>>,
}

impl BufferedReader {
    #[must_use]
    pub fn single(rows: Vec<Row>) -> Self {
        Self {
            sets: VecDeque::from([rows.into()]),
        }
    }

    #[must_use]
    pub fn multi(sets: Vec<Vec<Row>>) -> Self {
        Self {
            sets: sets.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl RowReader for BufferedReader {
    async fn next_row(&mut self) -> Result<Option<Row>, DbError> {
        Ok(self.sets.front_mut().and_then(VecDeque::pop_front))
    }

    async fn next_result(&mut self) -> Result<bool, DbError> {
        self.sets.pop_front();
        Ok(!self.sets.is_empty())
    }
}

pub(crate) struct OwnedConnection {
    pub conn: Box<dyn Connection>,
    pub in_transaction: bool,
}

/// A finite, single-pass, non-restartable row sequence.
///
/// The sequence owns the connection it was opened on (unless the caller
/// supplied one) and only touches the wire as it is advanced. Side effects
/// of the producing command — output parameters, a wrapping transaction's
/// commit — are not guaranteed until the sequence has been drained.
/// Dropping mid-iteration abandons any wrapping transaction, which the
/// server rolls back when the connection goes away.
pub struct Rows {
    reader: Box<dyn RowReader>,
    owned: Option<OwnedConnection>,
    done: bool,
}

impl Rows {
    pub(crate) fn new(reader: Box<dyn RowReader>, owned: Option<OwnedConnection>) -> Self {
        Self {
            reader,
            owned,
            done: false,
        }
    }

    /// The next row of the current result set, or `None` once exhausted.
    /// Exhaustion commits the wrapping transaction when one was opened.
    ///
    /// # Errors
    ///
    /// * Any driver error while fetching.
    pub async fn try_next(&mut self) -> Result<Option<Row>, DbError> {
        if self.done {
            return Ok(None);
        }
        match self.reader.next_row().await? {
            Some(row) => Ok(Some(row)),
            None => {
                self.finish().await?;
                Ok(None)
            }
        }
    }

    /// Drains the remaining rows.
    ///
    /// # Errors
    ///
    /// * Any driver error while fetching.
    pub async fn collect(mut self) -> Result<Vec<Row>, DbError> {
        let mut rows = vec![];
        while let Some(row) = self.try_next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Takes the first row and closes the sequence without reading further.
    ///
    /// # Errors
    ///
    /// * Any driver error while fetching.
    pub async fn first(mut self) -> Result<Option<Row>, DbError> {
        let row = self.try_next().await?;
        self.close().await?;
        Ok(row)
    }

    async fn finish(&mut self) -> Result<(), DbError> {
        self.done = true;
        if let Some(owned) = &mut self.owned {
            if owned.in_transaction {
                owned.in_transaction = false;
                owned.conn.commit().await?;
            }
        }
        Ok(())
    }

    /// Closes the sequence early. An uncommitted wrapping transaction is
    /// rolled back, never committed — partial reads do not publish cursor
    /// state.
    ///
    /// # Errors
    ///
    /// * Any driver error from the rollback.
    pub async fn close(&mut self) -> Result<(), DbError> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        if let Some(owned) = &mut self.owned {
            if owned.in_transaction {
                owned.in_transaction = false;
                owned.conn.rollback().await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn advance_result_set(&mut self) -> Result<bool, DbError> {
        if self.done {
            return Ok(false);
        }
        if self.reader.next_result().await? {
            Ok(true)
        } else {
            self.finish().await?;
            Ok(false)
        }
    }
}

/// A two-level lazy sequence: the outer level walks result sets, the inner
/// level streams the rows of the current set. Like [`Rows`], it is finite,
/// single-pass and non-restartable; the underlying reader only moves
/// forward.
pub struct ResultSets {
    rows: Rows,
}

impl ResultSets {
    pub(crate) const fn new(rows: Rows) -> Self {
        Self { rows }
    }

    /// The next row of the current result set.
    ///
    /// # Errors
    ///
    /// * Any driver error while fetching.
    pub async fn try_next(&mut self) -> Result<Option<Row>, DbError> {
        if self.rows.done {
            return Ok(None);
        }
        self.rows.reader.next_row().await
    }

    /// Advances to the next result set; false when none remain, at which
    /// point the sequence is finished.
    ///
    /// # Errors
    ///
    /// * Any driver error while advancing.
    pub async fn next_set(&mut self) -> Result<bool, DbError> {
        self.rows.advance_result_set().await
    }

    /// Drains every remaining result set.
    ///
    /// # Errors
    ///
    /// * Any driver error while fetching.
    pub async fn collect_all(mut self) -> Result<Vec<Vec<Row>>, DbError> {
        let mut sets = vec![];
        loop {
            let mut rows = vec![];
            while let Some(row) = self.try_next().await? {
                rows.push(row);
            }
            sets.push(rows);
            if !self.next_set().await? {
                break;
            }
        }
        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::row;

    #[tokio::test]
    async fn buffered_reader_walks_sets_in_order() {
        let mut reader = BufferedReader::multi(vec![
            vec![row! { "a" => 1 }, row! { "a" => 2 }],
            vec![row! { "b" => 3 }],
        ]);

        assert_eq!(reader.next_row().await.unwrap().unwrap().get("a"), Some(SqlValue::Int(1)));
        assert_eq!(reader.next_row().await.unwrap().unwrap().get("a"), Some(SqlValue::Int(2)));
        assert_eq!(reader.next_row().await.unwrap(), None);
        assert!(reader.next_result().await.unwrap());
        assert_eq!(reader.next_row().await.unwrap().unwrap().get("b"), Some(SqlValue::Int(3)));
        assert!(!reader.next_result().await.unwrap());
    }

    #[tokio::test]
    async fn rows_are_single_pass() {
        let reader = BufferedReader::single(vec![row! { "a" => 1 }]);
        let mut rows = Rows::new(Box::new(reader), None);

        assert!(rows.try_next().await.unwrap().is_some());
        assert!(rows.try_next().await.unwrap().is_none());
        // exhausted stays exhausted
        assert!(rows.try_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn result_sets_collect_all() {
        let reader = BufferedReader::multi(vec![vec![row! { "a" => 1 }], vec![], vec![row! { "c" => 3 }]]);
        let sets = ResultSets::new(Rows::new(Box::new(reader), None))
            .collect_all()
            .await
            .unwrap();
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0].len(), 1);
        assert_eq!(sets[1].len(), 0);
        assert_eq!(sets[2].len(), 1);
    }
}
