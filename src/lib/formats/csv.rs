//! CSV output format.

use std::io::Write;
use std::sync::Arc;

use crate::chunk::{Chunk, Schema, Value};
use crate::errors::Result;
use crate::format::OutputFormat;

/// CSV rendering options.
#[derive(Debug, Clone, Copy)]
pub struct CsvOptions {
    /// Field delimiter.
    pub delimiter: u8,
    /// Emit a header row with column names as the stream prefix.
    pub with_header: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self { delimiter: b',', with_header: true }
    }
}

/// CSV serializer: header row as prefix, one line per row, RFC-4180 quoting.
///
/// Totals and extremes are written as plain in-stream rows, so they flow
/// through the pipeline as ordered units.
pub struct CsvFormat {
    schema: Arc<Schema>,
    options: CsvOptions,
}

impl CsvFormat {
    /// Create a CSV format with default options.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_options(schema, CsvOptions::default())
    }

    /// Create a CSV format with explicit options.
    #[must_use]
    pub fn with_options(schema: Arc<Schema>, options: CsvOptions) -> Self {
        Self { schema, options }
    }

    fn write_field(&self, text: &str, out: &mut dyn Write) -> Result<()> {
        let delimiter = self.options.delimiter as char;
        let needs_quoting =
            text.contains(delimiter) || text.contains('"') || text.contains('\n') || text.contains('\r');
        if needs_quoting {
            out.write_all(b"\"")?;
            out.write_all(text.replace('"', "\"\"").as_bytes())?;
            out.write_all(b"\"")?;
        } else {
            out.write_all(text.as_bytes())?;
        }
        Ok(())
    }

    fn write_row(&self, row: &[&Value], out: &mut dyn Write) -> Result<()> {
        for (index, value) in row.iter().enumerate() {
            if index > 0 {
                out.write_all(&[self.options.delimiter])?;
            }
            self.write_field(&value.to_text(), out)?;
        }
        out.write_all(b"\n")?;
        Ok(())
    }

    fn write_rows(&self, chunk: &Chunk, out: &mut dyn Write) -> Result<()> {
        for row in chunk.rows() {
            self.write_row(&row, out)?;
        }
        Ok(())
    }
}

impl OutputFormat for CsvFormat {
    fn write_prefix(&mut self, out: &mut dyn Write) -> Result<()> {
        if !self.options.with_header {
            return Ok(());
        }
        for (index, name) in self.schema.column_names().enumerate() {
            if index > 0 {
                out.write_all(&[self.options.delimiter])?;
            }
            self.write_field(name, out)?;
        }
        out.write_all(b"\n")?;
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &Chunk, _first_row: u64, out: &mut dyn Write) -> Result<()> {
        self.write_rows(chunk, out)
    }

    fn write_totals(&mut self, totals: &Chunk, out: &mut dyn Write) -> Result<()> {
        // Totals separated from the body by a blank line.
        out.write_all(b"\n")?;
        self.write_rows(totals, out)
    }

    fn write_extremes(&mut self, extremes: &Chunk, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"\n")?;
        self.write_rows(extremes, out)
    }
}
