//! Compact JSON rows format.

use std::io::Write;

use crate::chunk::{Chunk, Value};
use crate::errors::Result;
use crate::format::OutputFormat;

/// JSON array-of-row-arrays serializer: `[[1,"a"],[2,"b"]]`.
///
/// Each chunk is formatted by a fresh instance, so the separator before a
/// chunk's first row is derived from `first_row`: any row other than row 0 of
/// the stream is preceded by a comma. Totals and extremes are folded into the
/// statistics snapshot rather than the stream
/// (`supports_inline_aggregates` is true).
#[derive(Debug, Default)]
pub struct JsonRowsFormat;

impl JsonRowsFormat {
    /// Create the format.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn write_value(value: &Value, out: &mut dyn Write) -> Result<()> {
        match value {
            Value::Null => out.write_all(b"null")?,
            Value::Int64(v) => out.write_all(v.to_string().as_bytes())?,
            Value::Float64(v) => {
                if v.is_finite() {
                    out.write_all(v.to_string().as_bytes())?;
                } else {
                    // JSON has no Infinity/NaN literals.
                    out.write_all(b"null")?;
                }
            }
            Value::Str(s) => Self::write_string(s, out)?,
        }
        Ok(())
    }

    fn write_string(text: &str, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"\"")?;
        for ch in text.chars() {
            match ch {
                '"' => out.write_all(b"\\\"")?,
                '\\' => out.write_all(b"\\\\")?,
                '\n' => out.write_all(b"\\n")?,
                '\r' => out.write_all(b"\\r")?,
                '\t' => out.write_all(b"\\t")?,
                c if (c as u32) < 0x20 => {
                    write!(out, "\\u{:04x}", c as u32)?;
                }
                c => write!(out, "{c}")?,
            }
        }
        out.write_all(b"\"")?;
        Ok(())
    }
}

impl OutputFormat for JsonRowsFormat {
    fn write_prefix(&mut self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"[")?;
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &Chunk, first_row: u64, out: &mut dyn Write) -> Result<()> {
        for (offset, row) in chunk.rows().enumerate() {
            if first_row + offset as u64 > 0 {
                out.write_all(b",")?;
            }
            out.write_all(b"[")?;
            for (index, value) in row.iter().enumerate() {
                if index > 0 {
                    out.write_all(b",")?;
                }
                Self::write_value(value, out)?;
            }
            out.write_all(b"]")?;
        }
        Ok(())
    }

    fn write_suffix(&mut self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"]")?;
        Ok(())
    }

    fn supports_inline_aggregates(&self) -> bool {
        true
    }

    fn supports_writing_exception(&self) -> bool {
        true
    }
}
