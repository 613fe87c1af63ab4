//! The output format abstraction.
//!
//! An [`OutputFormat`] turns chunks into bytes. The parallel pipeline creates
//! one fresh instance per processing unit through a [`FormatFactory`], so
//! implementations never share mutable state across units. Every write method
//! receives the destination explicitly; instances are constructed without a
//! sink, which also makes the capability queries side-effect free.

use std::io::Write;
use std::sync::Arc;

use crate::chunk::Chunk;
use crate::errors::{FormatError, Result};

/// A serializer from chunks to bytes for one output format.
///
/// Methods that a format does not support default to an error; the pipeline
/// only calls them when the corresponding unit kinds are actually submitted.
pub trait OutputFormat {
    /// Write the stream preamble (e.g. a header row, an opening bracket).
    fn write_prefix(&mut self, _out: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    /// Write one chunk of body rows.
    ///
    /// `first_row` is the zero-based index of the chunk's first row within the
    /// whole stream. Formats that need cross-chunk context (row numbering,
    /// separator placement) derive it from here, because each chunk is
    /// formatted by a fresh instance.
    fn write_chunk(&mut self, chunk: &Chunk, first_row: u64, out: &mut dyn Write) -> Result<()>;

    /// Write the stream postamble.
    fn write_suffix(&mut self, _out: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    /// Write the totals row(s).
    fn write_totals(&mut self, _totals: &Chunk, _out: &mut dyn Write) -> Result<()> {
        Err(FormatError::format("this format does not write totals into the stream"))
    }

    /// Write the extremes row(s).
    fn write_extremes(&mut self, _extremes: &Chunk, _out: &mut dyn Write) -> Result<()> {
        Err(FormatError::format("this format does not write extremes into the stream"))
    }

    /// True if totals/extremes are folded into the format's own trailing
    /// section rather than written as in-stream rows. The pipeline then
    /// captures them into [`Statistics`] instead of submitting ordered units,
    /// since aggregate rows carry no row-order semantics.
    ///
    /// [`Statistics`]: crate::statistics::Statistics
    fn supports_inline_aggregates(&self) -> bool {
        false
    }

    /// True if mid-stream error text can be embedded in this format's output.
    fn supports_writing_exception(&self) -> bool {
        false
    }
}

/// Factory creating one formatter instance per processing unit.
pub type FormatFactory = Arc<dyn Fn() -> Box<dyn OutputFormat + Send> + Send + Sync>;

/// Wrap a closure returning a concrete format into a [`FormatFactory`].
pub fn factory<F, T>(f: F) -> FormatFactory
where
    F: Fn() -> T + Send + Sync + 'static,
    T: OutputFormat + Send + 'static,
{
    Arc::new(move || Box::new(f()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    struct Passthrough;

    impl OutputFormat for Passthrough {
        fn write_chunk(
            &mut self,
            chunk: &Chunk,
            _first_row: u64,
            out: &mut dyn Write,
        ) -> Result<()> {
            for row in chunk.rows() {
                for value in row {
                    out.write_all(value.to_text().as_bytes())?;
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_default_capabilities() {
        let format = Passthrough;
        assert!(!format.supports_inline_aggregates());
        assert!(!format.supports_writing_exception());
    }

    #[test]
    fn test_default_totals_is_an_error() {
        let mut format = Passthrough;
        let mut out = Vec::new();
        assert!(format.write_totals(&Chunk::empty(), &mut out).is_err());
        assert!(format.write_extremes(&Chunk::empty(), &mut out).is_err());
    }

    #[test]
    fn test_factory_creates_fresh_instances() {
        let factory = factory(|| Passthrough);
        let mut a = factory();
        let mut b = factory();
        let mut out = Vec::new();
        a.write_prefix(&mut out).unwrap();
        b.write_prefix(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
