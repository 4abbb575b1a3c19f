//! Values, tuple buffers, and statement status codes.

use serde::{Deserialize, Serialize};

/// Column type supported by the engine contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Int,
    /// UTF-8 text.
    Text,
}

/// A single cell value.
///
/// Cells cross the shim boundary only as rendered text (see
/// [`CellValue::render`]); the typed form stays inside the engine and the
/// extension call convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    /// SQL NULL.
    Null,
    /// Integer value.
    Int(i64),
    /// Text value.
    Text(String),
}

impl CellValue {
    /// Per-type textual output conversion.
    ///
    /// Returns `None` for NULL; the shim maps that to a null cell pointer
    /// analogue in its owned result grid.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Int(v) => Some(v.to_string()),
            CellValue::Text(s) => Some(s.clone()),
        }
    }

    /// Whether this cell is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

/// Column name and type metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name.
    pub name: String,
    /// Column type.
    pub ty: ColumnType,
}

/// The engine-internal result set of the most recent statement.
///
/// # Lifetime contract
///
/// A `TupleBuffer` borrowed from [`crate::EngineCore::tuple_buffer`] is only
/// valid until the next call to [`crate::EngineCore::run`]. Callers that need
/// the data afterwards must deep-copy every cell; the shim's result type does
/// exactly that.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TupleBuffer {
    /// Column metadata, in projection order.
    pub columns: Vec<ColumnMeta>,
    /// Row-major cell grid.
    pub rows: Vec<Vec<CellValue>>,
}

impl TupleBuffer {
    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Kind of statement the engine executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// `SELECT ...`
    Select,
    /// `INSERT INTO ...`
    Insert,
    /// `DELETE FROM ...`
    Delete,
    /// `CREATE TABLE ...`
    CreateTable,
    /// `DROP TABLE ...`
    DropTable,
    /// `CREATE DATABASE ...`
    CreateDatabase,
    /// `CREATE EXTENSION ...`
    CreateExtension,
    /// `CREATE FUNCTION ...`
    CreateFunction,
}

impl StatementKind {
    /// Stable non-negative status code for this statement kind.
    ///
    /// Any negative status in a shim result means the statement faulted.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            StatementKind::Select => 1,
            StatementKind::Insert => 2,
            StatementKind::Delete => 3,
            StatementKind::CreateTable => 4,
            StatementKind::DropTable => 5,
            StatementKind::CreateDatabase => 6,
            StatementKind::CreateExtension => 7,
            StatementKind::CreateFunction => 8,
        }
    }
}

/// Outcome of one `run` call: what ran and how many rows it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecStatus {
    /// Kind of the last statement in the submitted text.
    pub kind: StatementKind,
    /// Rows affected or returned by the last statement.
    pub rows: u64,
}
