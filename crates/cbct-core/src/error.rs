//! Error types for cbct-core operations.
//!
//! Construction-time failures (bad geometry, impossible ROI, exhausted
//! memory budget) are reported through [`Error`] before any task runs.
//!
//! # Usage
//!
//! ```rust
//! use cbct_core::{Error, Result};
//!
//! fn check_pixels(n_h: u32, n_v: u32) -> Result<()> {
//!     if n_h == 0 || n_v == 0 {
//!         return Err(Error::invalid_geometry("detector pixel counts must be nonzero"));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating geometry or planning work.
///
/// # Categories
///
/// - **Geometry errors**: [`InvalidGeometry`](Error::InvalidGeometry)
/// - **ROI errors**: [`InvalidRoi`](Error::InvalidRoi)
/// - **Planning errors**: [`BudgetExceeded`](Error::BudgetExceeded), [`NoDevices`](Error::NoDevices)
/// - **Buffer errors**: [`DimensionMismatch`](Error::DimensionMismatch)
#[derive(Debug, Error)]
pub enum Error {
    /// Detector or volume geometry fails validation.
    #[error("invalid geometry: {reason}")]
    InvalidGeometry {
        /// Why validation failed
        reason: String,
    },

    /// The requested region of interest does not fit the volume.
    #[error("invalid ROI: ({x1}..{x2}, {y1}..{y2}, {z1}..{z2}) for volume {n_x}x{n_y}x{n_z}")]
    InvalidRoi {
        /// ROI lower x bound
        x1: u32,
        /// ROI upper x bound
        x2: u32,
        /// ROI lower y bound
        y1: u32,
        /// ROI upper y bound
        y2: u32,
        /// ROI lower z bound
        z1: u32,
        /// ROI upper z bound
        z2: u32,
        /// Volume x extent
        n_x: u32,
        /// Volume y extent
        n_y: u32,
        /// Volume z extent
        n_z: u32,
    },

    /// The work plan cannot fit the device memory budget.
    #[error("memory budget exceeded: need at least {required} bytes, budget is {budget}")]
    BudgetExceeded {
        /// Minimum bytes a single slab plan would need
        required: u64,
        /// Available budget in bytes
        budget: u64,
    },

    /// No accelerators are visible to the planner.
    #[error("no devices available")]
    NoDevices,

    /// Buffer dimensions do not match the expected geometry.
    #[error("dimension mismatch: expected {expected_w}x{expected_h}, got {got_w}x{got_h}")]
    DimensionMismatch {
        /// Expected width
        expected_w: u32,
        /// Expected height
        expected_h: u32,
        /// Actual width
        got_w: u32,
        /// Actual height
        got_h: u32,
    },
}

impl Error {
    /// Creates an [`Error::InvalidGeometry`] error.
    #[inline]
    pub fn invalid_geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::DimensionMismatch`] error.
    #[inline]
    pub fn dimension_mismatch(expected: (u32, u32), got: (u32, u32)) -> Self {
        Self::DimensionMismatch {
            expected_w: expected.0,
            expected_h: expected.1,
            got_w: got.0,
            got_h: got.1,
        }
    }

    /// Returns `true` if this is a geometry or ROI validation error.
    #[inline]
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidGeometry { .. } | Self::InvalidRoi { .. } | Self::NoDevices
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_geometry_message() {
        let err = Error::invalid_geometry("d_so must be positive");
        assert!(err.to_string().contains("d_so"));
        assert!(err.is_construction_error());
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = Error::dimension_mismatch((64, 32), (64, 16));
        let msg = err.to_string();
        assert!(msg.contains("64x32"));
        assert!(msg.contains("64x16"));
        assert!(!err.is_construction_error());
    }
}
