//! Owned query results.

use emberdb_engine::{ExecStatus, TupleBuffer};

/// Status code reported when a statement faulted inside the engine.
///
/// Non-negative statuses identify the kind of statement that ran (see
/// [`emberdb_engine::StatementKind::code`]); any negative status means the
/// statement did not complete and the fault text is available from
/// [`crate::Session::last_error_message`].
pub const STATUS_FAULT: i32 = -1;

/// The fully owned result of one `execute` call.
///
/// Every cell is an independently owned string copied out of the engine's
/// tuple buffer before the statement's resources were released; nothing in
/// here references engine memory, so the result stays valid across later
/// statements and across session shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    status: i32,
    affected_rows: u64,
    column_names: Vec<String>,
    values: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    pub(crate) fn from_engine(status: ExecStatus, buffer: Option<&TupleBuffer>) -> Self {
        let (column_names, values) = match buffer {
            Some(buffer) => (
                buffer.columns.iter().map(|c| c.name.clone()).collect(),
                buffer
                    .rows
                    .iter()
                    .map(|row| row.iter().map(|cell| cell.render()).collect())
                    .collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        Self {
            status: status.kind.code(),
            affected_rows: status.rows,
            column_names,
            values,
        }
    }

    pub(crate) fn fault() -> Self {
        Self {
            status: STATUS_FAULT,
            affected_rows: 0,
            column_names: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Statement status code; negative means the statement faulted.
    #[must_use]
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Whether this result reports a fault.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.status < 0
    }

    /// Rows affected or returned by the statement.
    #[must_use]
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Number of rows in the result grid.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.values.len()
    }

    /// Number of columns in the result grid.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }

    /// Column names, in projection order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// One cell; `None` if out of range or SQL NULL.
    #[must_use]
    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.values.get(row)?.get(column)?.as_deref()
    }

    /// Whether a cell holds SQL NULL. Out-of-range cells read as NULL.
    #[must_use]
    pub fn is_null(&self, row: usize, column: usize) -> bool {
        match self.values.get(row).and_then(|r| r.get(column)) {
            Some(cell) => cell.is_none(),
            None => true,
        }
    }

    /// The whole row-major grid.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.values
    }
}
