#![deny(unsafe_code)]
// Clippy lint configuration for CI
// These lints are allowed because:
// - cast_*: row/byte accounting intentionally casts between numeric widths
// - missing_errors_doc / missing_panics_doc: tracked separately
// - module_name_repetitions: public names read better fully qualified
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args
)]

//! # parfmt - Order-Preserving Parallel Output Formatting
//!
//! This library converts a stream of in-memory row batches ("chunks") into a
//! serialized byte stream, overlapping the CPU-bound formatting work across
//! multiple worker threads without reordering output.
//!
//! ## Architecture
//!
//! ```text
//!                    Formatter workers
//!       ↓   ↓   ↓   ↓   ↓   ↓   ↓   ↓   ↓   ↓
//!     ┌───┬───┬───┬───┬───┬───┬───┬───┬───┬───┐
//!     | 1 | 2 | 3 | 4 | 5 | . | . | . | . | N |  ← processing units
//!     └───┴───┴───┴───┴───┴───┴───┴───┴───┴───┘
//!       ↑               ↑
//!    collector       producer
//! ```
//!
//! Chunks are submitted in order through [`ParallelFormatter::consume`]. Each
//! chunk lands in the next processing unit of a fixed-size ring and is
//! formatted by some worker thread into the unit's private buffer. A single
//! collector thread walks the ring strictly in submission order, copying each
//! unit's bytes into the real sink. Formatting is unordered and parallel;
//! emission is strictly FIFO because the collector never skips a unit.
//!
//! ## Modules
//!
//! - **[`chunk`]** - Row batches, values, and schemas
//! - **[`format`]** - The [`OutputFormat`] trait implemented by concrete formats
//! - **[`formats`]** - Built-in CSV and JSON row formats
//! - **[`pipeline`]** - The [`ParallelFormatter`] pipeline itself
//! - **[`pool`]** - Worker pool running formatter tasks
//! - **[`ring`]** - Processing-unit ring and its status machine
//! - **[`statistics`]** - Aggregate output statistics
//! - **[`errors`]** - Error types
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use parfmt::{Chunk, ColumnSpec, DataType, FormatterParams, ParallelFormatter, Schema, Value};
//! use parfmt::formats::CsvFormat;
//!
//! # fn main() -> parfmt::Result<()> {
//! let schema = Arc::new(Schema::new(vec![ColumnSpec::new("x", DataType::Int64)]));
//! let sink: Vec<u8> = Vec::new();
//!
//! let factory = {
//!     let schema = Arc::clone(&schema);
//!     parfmt::format::factory(move || CsvFormat::new(Arc::clone(&schema)))
//! };
//! let mut writer = ParallelFormatter::new(FormatterParams {
//!     sink: Box::new(sink),
//!     schema,
//!     factory,
//!     max_threads: 2,
//!     pool_metrics: None,
//! });
//!
//! writer.write_prefix()?;
//! writer.consume(Chunk::new(vec![vec![Value::Int64(1), Value::Int64(2)]])?)?;
//! writer.write_suffix()?;
//! writer.finalize()?;
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod errors;
pub mod event;
pub mod format;
pub mod formats;
pub mod pipeline;
pub mod pool;
pub mod ring;
pub mod statistics;

pub use chunk::{Chunk, ColumnSpec, DataType, Schema, Value};
pub use errors::{FormatError, Result};
pub use event::Event;
pub use format::{FormatFactory, OutputFormat};
pub use pipeline::{FormatterParams, ParallelFormatter};
pub use pool::{PoolMetrics, WorkerPool};
pub use ring::{ProcessingUnit, Ring, UnitKind, UnitStatus};
pub use statistics::Statistics;
