//! The FDK pipeline stages.
//!
//! Data flows Source → Preloader → Weighting → Filter → Reconstruction →
//! Sink. The source tags host projections with their rotation angle, the
//! preloader moves them into pooled device buffers, weighting and filter
//! transform them in place, reconstruction accumulates them into the
//! current subvolume, and the shared sink assembles finished slabs into
//! the output volume.

pub mod filter;
pub mod preloader;
pub mod reconstruction;
pub mod sink;
pub mod source;
pub mod weighting;

pub use filter::FilterStage;
pub use preloader::PreloaderStage;
pub use reconstruction::ReconstructionStage;
pub use sink::{SharedSink, SinkStage};
pub use source::SourceStage;
pub use weighting::WeightingStage;

use cbct_core::ImageBuffer;

use crate::backend::{PoolBuffer, Stream};

/// A projection on the host, tagged with its place in the scan.
pub struct HostProjection {
    /// Pixel data, `width` x `height`.
    pub image: ImageBuffer,
    /// Acquisition index.
    pub index: u32,
    /// Rotation angle in radians.
    pub phi: f32,
}

/// A projection resident in device memory, travelling through the
/// weighting, filter and reconstruction stages.
#[derive(Debug)]
pub struct DeviceProjection {
    /// Pooled pitched buffer holding the pixels.
    pub buf: PoolBuffer,
    /// Valid width in pixels (detector columns).
    pub width: u32,
    /// Valid height in rows (detector rows).
    pub height: u32,
    /// Acquisition index.
    pub index: u32,
    /// Rotation angle in radians.
    pub phi: f32,
    /// Execution context carrying this projection's kernel launches.
    pub stream: Stream,
}

/// A reconstructed subvolume slab leaving the reconstruction stage.
pub struct SlabVolume {
    /// Voxel data, slice-major, `n_x * n_y * slices` values.
    pub data: Vec<f32>,
    /// Voxels along x.
    pub n_x: u32,
    /// Voxels along y.
    pub n_y: u32,
    /// Z slices in this slab.
    pub slices: u32,
    /// First z slice of the slab in the full volume.
    pub z_offset: u32,
    /// Id of the task that produced the slab.
    pub task_id: u32,
}
