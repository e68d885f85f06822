//! Error types for projection and volume I/O.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for I/O operations.
pub type IoResult<T> = std::result::Result<T, IoError>;

/// Errors raised while reading projections or writing volume slices.
#[derive(Debug, Error)]
pub enum IoError {
    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A projection file is not the expected `n_h * n_v * 4` bytes.
    #[error("projection {path} has {got} bytes, expected {expected}")]
    BadProjectionSize {
        /// Offending file
        path: PathBuf,
        /// Expected byte count
        expected: u64,
        /// Actual byte count
        got: u64,
    },

    /// The scan directory holds fewer projection files than the scan
    /// geometry announces.
    #[error("scan directory {dir} holds {found} projections, expected {expected}")]
    MissingProjections {
        /// Scanned directory
        dir: PathBuf,
        /// Projections announced by the geometry
        expected: u32,
        /// Files actually present
        found: usize,
    },

    /// A projection index outside the scan range was requested.
    #[error("projection index {index} out of range (scan has {count})")]
    IndexOutOfRange {
        /// Requested index
        index: u32,
        /// Projections in the scan
        count: u32,
    },

    /// Buffer shape errors from the core types.
    #[error(transparent)]
    Core(#[from] cbct_core::Error),
}
