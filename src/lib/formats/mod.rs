//! Built-in output formats.
//!
//! Two reference implementations of [`OutputFormat`]:
//!
//! - [`CsvFormat`] writes totals/extremes as ordered in-stream rows
//! - [`JsonRowsFormat`] folds aggregates into statistics
//!   (`supports_inline_aggregates`) and uses `first_row` for cross-chunk
//!   separator placement
//!
//! Between them they exercise both aggregate-routing modes of the parallel
//! pipeline.
//!
//! [`OutputFormat`]: crate::format::OutputFormat

mod csv;
mod json;

pub use csv::{CsvFormat, CsvOptions};
pub use json::JsonRowsFormat;
