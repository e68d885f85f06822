//! # cbct-core
//!
//! Core types for cone-beam CT reconstruction.
//!
//! This crate provides the foundational types shared by the rest of the
//! engine:
//!
//! - [`DetectorGeometry`], [`VolumeGeometry`], [`Roi`] - scanner setup
//! - [`ImageBuffer`], [`VolumeBuffer`] - host-side pixel/voxel buffers
//! - [`SubvolumeInfo`], [`Task`] - slab decomposition and work units
//! - [`Error`], [`Result`] - construction and planning error taxonomy
//!
//! ## Crate Structure
//!
//! `cbct-core` has no internal dependencies; the other crates build on it:
//!
//! ```text
//! cbct-core (this crate)
//!    ^
//!    |
//!    +-- cbct-io (projection sources, volume sinks)
//!    +-- cbct-compute (device pool, pipeline, FDK stages)
//!    +-- cbct-cli (command line front end)
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod geometry;
pub mod image;
pub mod plan;

pub use error::{Error, Result};
pub use geometry::{DetectorGeometry, Roi, VolumeGeometry};
pub use image::{ImageBuffer, VolumeBuffer};
pub use plan::{make_tasks, subvolume_info, SubvolumeInfo, Task};
