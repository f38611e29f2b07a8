//! CSV sink error types

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while writing frame records
#[derive(Debug, Error)]
pub enum CsvSinkError {
    /// The output file could not be created
    #[error("cannot create CSV output {}: {source}", path.display())]
    Create {
        /// Requested output path
        path: PathBuf,
        /// Underlying failure
        source: io::Error,
    },

    /// Writing or flushing records failed
    #[error("CSV write failed: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded
    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),
}

impl CsvSinkError {
    /// Check if later batches may still be written
    ///
    /// A failed create leaves no writer; a failed write or encoding
    /// leaves the writer in place and the next batch is attempted.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CsvSinkError::Io(_) | CsvSinkError::Csv(_))
    }
}

/// Result type for CSV sink operations
pub type CsvResult<T> = Result<T, CsvSinkError>;
