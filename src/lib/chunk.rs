//! Row batches, values, and schemas.
//!
//! A [`Chunk`] is the unit of data flowing through the formatting pipeline: a
//! batch of rows stored column-wise, all columns of equal length. The pipeline
//! itself never inspects values; it hands chunks to [`OutputFormat`]
//! implementations and moves the resulting bytes.
//!
//! [`OutputFormat`]: crate::format::OutputFormat

use crate::errors::{FormatError, Result};

/// Logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 64-bit signed integer
    Int64,
    /// 64-bit float
    Float64,
    /// UTF-8 string
    Utf8,
}

/// One column declaration: a name and its logical type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name as it appears in headers
    pub name: String,
    /// Logical type of the column's values
    pub data_type: DataType,
}

impl ColumnSpec {
    /// Create a column spec.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self { name: name.into(), data_type }
    }
}

/// The fixed column layout of an output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnSpec>,
}

impl Schema {
    /// Create a schema from column specs.
    #[must_use]
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    /// Number of columns.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// The column specs in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Iterator over column names.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// 64-bit signed integer
    Int64(i64),
    /// 64-bit float
    Float64(f64),
    /// UTF-8 string
    Str(String),
}

impl Value {
    /// Render the value the way numeric-leaning text formats do: bare numbers,
    /// empty string for NULL.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int64(v) => v.to_string(),
            Value::Float64(v) => v.to_string(),
            Value::Str(s) => s.clone(),
        }
    }
}

/// A batch of rows with a fixed column layout, stored column-wise.
///
/// Chunks own their data; the pipeline transfers chunk ownership into a
/// processing unit on submission and drops it once formatted.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    columns: Vec<Vec<Value>>,
    num_rows: usize,
}

impl Chunk {
    /// Create a chunk from equal-length columns.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::ColumnLengthMismatch`] if the columns disagree
    /// on row count.
    pub fn new(columns: Vec<Vec<Value>>) -> Result<Self> {
        let num_rows = columns.first().map_or(0, Vec::len);
        for column in &columns {
            if column.len() != num_rows {
                return Err(FormatError::ColumnLengthMismatch {
                    expected: num_rows,
                    actual: column.len(),
                });
            }
        }
        Ok(Self { columns, num_rows })
    }

    /// An empty chunk (zero columns, zero rows). Used for sentinel units.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of rows in the chunk.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of columns in the chunk.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// True if the chunk carries no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// The values of one column.
    #[must_use]
    pub fn column(&self, index: usize) -> &[Value] {
        &self.columns[index]
    }

    /// One cell.
    #[must_use]
    pub fn value(&self, row: usize, column: usize) -> &Value {
        &self.columns[column][row]
    }

    /// Iterator over rows, each yielded as a vector of cell references.
    pub fn rows(&self) -> impl Iterator<Item = Vec<&Value>> {
        (0..self.num_rows).map(move |row| self.columns.iter().map(|c| &c[row]).collect())
    }
}
