//! Error types for the compute engine.
//!
//! Runtime failures are fatal for the pipeline they occur in: the failing
//! stage logs the cause, poisons its downstream channel so the graph
//! drains, and propagates a [`ComputeError`] to the pipeline driver.
//! There are no retries.

use thiserror::Error;

/// Result type alias for compute operations.
pub type ComputeResult<T> = std::result::Result<T, ComputeError>;

/// Errors raised while running the reconstruction pipeline.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Geometry validation or planning failed before any task ran.
    #[error(transparent)]
    Core(#[from] cbct_core::Error),

    /// A projection or slice could not be read or written.
    #[error(transparent)]
    Io(#[from] cbct_io::IoError),

    /// Device memory could not be allocated.
    #[error("allocation of {requested} bytes failed on device {device}: {reason}")]
    AllocationFailed {
        /// Device the allocation was attempted on
        device: usize,
        /// Bytes requested
        requested: usize,
        /// Failure reason
        reason: String,
    },

    /// A kernel failed; detected at the next stream synchronization.
    #[error("kernel failure in {stage} stage: {cause}")]
    KernelFailure {
        /// Stage the kernel ran in
        stage: &'static str,
        /// Underlying cause
        cause: String,
    },

    /// A stage found its neighbor gone without an in-band sentinel,
    /// meaning that neighbor died abnormally.
    #[error("{stage} stage: channel closed without sentinel")]
    ChannelClosed {
        /// Stage that observed the closed channel
        stage: &'static str,
    },

    /// A pipeline worker thread panicked.
    #[error("{stage} stage worker panicked")]
    WorkerPanicked {
        /// Stage whose worker died
        stage: String,
    },
}

impl ComputeError {
    /// Creates a [`ComputeError::KernelFailure`].
    #[inline]
    pub fn kernel(stage: &'static str, cause: impl Into<String>) -> Self {
        Self::KernelFailure {
            stage,
            cause: cause.into(),
        }
    }
}
