//! # cbct-io
//!
//! Projection input and volume output for the reconstruction engine.
//!
//! The engine consumes scans and produces volumes through two traits, so
//! the pipeline is agnostic to the storage behind them:
//!
//! - [`ProjectionSource`] - pull projections by acquisition index
//! - [`VolumeSink`] - receive the assembled volume
//!
//! The on-disk format is deliberately minimal: headerless little-endian
//! `f32` rasters, one file per projection on input and one file per z
//! slice on output (see [`raw`]).

#![warn(missing_docs)]

pub mod error;
pub mod raw;
pub mod sink;
pub mod source;

pub use error::{IoError, IoResult};
pub use sink::{MemorySink, SliceFileSink, VolumeSink};
pub use source::{DirectorySource, MemorySource, ProjectionSource};
