//! Aggregate output statistics.
//!
//! Statistics accumulate across the lifetime of one output stream: row counts
//! merged by the collector, limit/aggregation watermarks reported by the query
//! executor (possibly from unrelated threads), and totals/extremes captured
//! directly when the format folds aggregates into its own trailing section.
//! The pipeline guards its `Statistics` with a dedicated lock, independent of
//! the ring synchronization.

use crate::chunk::Chunk;

/// Aggregate statistics for one output stream.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    /// Rows emitted to the sink so far (merged by the collector).
    pub rows_written: u64,
    /// Rows the query produced before LIMIT was applied, if reported.
    pub rows_before_limit: Option<u64>,
    /// Rows the query produced before aggregation, if reported.
    pub rows_before_aggregation: Option<u64>,
    /// Totals chunk captured for formats with inline aggregates.
    pub totals: Option<Chunk>,
    /// Extremes chunk captured for formats with inline aggregates.
    pub extremes: Option<Chunk>,
}

impl Statistics {
    /// True if a LIMIT watermark was reported.
    #[must_use]
    pub fn applied_limit(&self) -> bool {
        self.rows_before_limit.is_some()
    }

    /// True if an aggregation watermark was reported.
    #[must_use]
    pub fn applied_aggregation(&self) -> bool {
        self.rows_before_aggregation.is_some()
    }
}
