//! Error types for parallel formatting.

use thiserror::Error;

/// Result type alias for formatting operations
pub type Result<T> = std::result::Result<T, FormatError>;

/// Error type for formatting operations
#[derive(Error, Debug)]
pub enum FormatError {
    /// I/O failure while writing to a buffer or the output sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A concrete output format rejected its input
    #[error("Format error: {message}")]
    Format {
        /// Explanation of what the format could not handle
        message: String,
    },

    /// Chunk constructed from columns of unequal length
    #[error("Column length mismatch: expected {expected} rows, got {actual}")]
    ColumnLengthMismatch {
        /// Row count of the first column
        expected: usize,
        /// Row count of the offending column
        actual: usize,
    },

    /// Operation invoked after the pipeline was finalized or cancelled
    #[error("Output pipeline is already finished; it cannot be reused")]
    PipelineFinished,

    /// Resetting a parallel formatting pipeline is not supported
    #[error("Resetting is not supported for parallel formatting")]
    ResetUnsupported,
}

impl FormatError {
    /// Convenience constructor for format-level failures.
    pub fn format(message: impl Into<String>) -> Self {
        FormatError::Format { message: message.into() }
    }
}
