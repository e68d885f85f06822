//! Scanner geometry types.
//!
//! This module describes the acquisition setup of a circular cone-beam scan:
//!
//! - [`DetectorGeometry`] - flat-panel detector and source/detector distances
//! - [`VolumeGeometry`] - the reconstructed voxel grid
//! - [`Roi`] - an optional axis-aligned clip of the output volume
//!
//! # Coordinate System
//!
//! The rotation axis is `z`, the source orbits in the `x`/`y` plane at
//! distance `d_so` from the isocenter, and the detector sits at `d_sd`
//! from the source. Detector coordinates `(u, v)` are centered on the
//! principal ray:
//!
//! ```text
//!              detector
//!         ┌──────┬──────┐
//!         │      │      │   v
//!         │      ┼──────│──►
//!         │      │      │
//!         └──────┴──────┘
//!                ▲
//!       d_sd     │ principal ray
//!                │
//!      source ───●───── isocenter (d_so)
//! ```
//!
//! All lengths share one unit (conventionally millimeters); angles are in
//! radians. Geometry values are immutable after construction.

use crate::{Error, Result};

/// Flat-panel detector geometry plus the scan trajectory parameters.
///
/// # Example
///
/// ```rust
/// use cbct_core::DetectorGeometry;
///
/// let det = DetectorGeometry {
///     n_h: 1024,
///     n_v: 768,
///     pitch_h: 0.4,
///     pitch_v: 0.4,
///     d_so: 500.0,
///     d_sd: 1000.0,
///     delta_phi: std::f32::consts::TAU / 720.0,
///     num_projections: 720,
/// };
/// assert!(det.validate().is_ok());
/// assert_eq!(det.magnification(), 2.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorGeometry {
    /// Detector columns (horizontal pixel count).
    pub n_h: u32,
    /// Detector rows (vertical pixel count).
    pub n_v: u32,
    /// Horizontal pixel pitch.
    pub pitch_h: f32,
    /// Vertical pixel pitch.
    pub pitch_v: f32,
    /// Source-to-isocenter distance.
    pub d_so: f32,
    /// Source-to-detector distance.
    pub d_sd: f32,
    /// Angular step between consecutive projections, in radians.
    pub delta_phi: f32,
    /// Number of projections in the scan.
    pub num_projections: u32,
}

impl DetectorGeometry {
    /// Horizontal coordinate of detector column 0, relative to the
    /// principal ray.
    #[inline]
    pub fn h_min(&self) -> f32 {
        -((self.n_h - 1) as f32 / 2.0) * self.pitch_h
    }

    /// Vertical coordinate of detector row 0, relative to the
    /// principal ray.
    #[inline]
    pub fn v_min(&self) -> f32 {
        -((self.n_v - 1) as f32 / 2.0) * self.pitch_v
    }

    /// Geometric magnification from the isocenter plane to the detector.
    #[inline]
    pub fn magnification(&self) -> f32 {
        self.d_sd / self.d_so
    }

    /// Number of pixels in one projection.
    #[inline]
    pub fn projection_len(&self) -> usize {
        self.n_h as usize * self.n_v as usize
    }

    /// Checks that the geometry describes a physically possible scan.
    pub fn validate(&self) -> Result<()> {
        if self.n_h == 0 || self.n_v == 0 {
            return Err(Error::invalid_geometry("detector pixel counts must be nonzero"));
        }
        if self.pitch_h <= 0.0 || self.pitch_v <= 0.0 {
            return Err(Error::invalid_geometry("detector pixel pitch must be positive"));
        }
        if self.d_so <= 0.0 || self.d_sd <= 0.0 {
            return Err(Error::invalid_geometry("source distances must be positive"));
        }
        if self.d_sd < self.d_so {
            return Err(Error::invalid_geometry(
                "detector must be farther from the source than the isocenter",
            ));
        }
        if self.num_projections == 0 {
            return Err(Error::invalid_geometry("scan must contain at least one projection"));
        }
        if !self.delta_phi.is_finite() || self.delta_phi == 0.0 {
            return Err(Error::invalid_geometry("angular step must be finite and nonzero"));
        }
        Ok(())
    }
}

/// The reconstructed voxel grid.
///
/// Voxels are isotropic cubes of edge `voxel_size`. A grid may be a clip
/// of a larger parent grid: `offset` holds this grid's voxel indices
/// within the parent and `(x_min, y_min, z_min)` stay the parent's
/// origin, so the center of voxel `(x, y, z)` computes as
/// `(x + offset) * voxel_size + x_min + voxel_size / 2` with bit-identical
/// results in the clipped and the unclipped grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeGeometry {
    /// Voxel count along x.
    pub n_x: u32,
    /// Voxel count along y.
    pub n_y: u32,
    /// Voxel count along z.
    pub n_z: u32,
    /// Isotropic voxel edge length.
    pub voxel_size: f32,
    /// World coordinate of the low x face of the parent grid.
    pub x_min: f32,
    /// World coordinate of the low y face of the parent grid.
    pub y_min: f32,
    /// World coordinate of the low z face of the parent grid.
    pub z_min: f32,
    /// Voxel offset of this grid within its parent (zero when unclipped).
    pub offset: [u32; 3],
}

impl VolumeGeometry {
    /// Derives the natural volume grid for a detector: the voxel size
    /// follows the magnification (`pitch_h * d_so / d_sd`), the grid
    /// matches the detector pixel counts, centered on the isocenter.
    /// An optional [`Roi`] clips the grid afterwards.
    pub fn from_detector(det: &DetectorGeometry, roi: Option<&Roi>) -> Result<Self> {
        det.validate()?;

        let voxel_size = det.pitch_h * det.d_so / det.d_sd;
        let n_x = det.n_h;
        let n_y = det.n_h;
        let n_z = det.n_v;

        let full = Self {
            n_x,
            n_y,
            n_z,
            voxel_size,
            x_min: -(n_x as f32 / 2.0) * voxel_size,
            y_min: -(n_y as f32 / 2.0) * voxel_size,
            z_min: -(n_z as f32 / 2.0) * voxel_size,
            offset: [0, 0, 0],
        };

        match roi {
            Some(roi) => full.clip(roi),
            None => Ok(full),
        }
    }

    /// Clips this grid to a region of interest. The retained voxels keep
    /// the world coordinates (bit for bit) they had in this grid.
    pub fn clip(&self, roi: &Roi) -> Result<Self> {
        roi.validate(self)?;
        Ok(Self {
            n_x: roi.x2 - roi.x1,
            n_y: roi.y2 - roi.y1,
            n_z: roi.z2 - roi.z1,
            voxel_size: self.voxel_size,
            x_min: self.x_min,
            y_min: self.y_min,
            z_min: self.z_min,
            offset: [
                self.offset[0] + roi.x1,
                self.offset[1] + roi.y1,
                self.offset[2] + roi.z1,
            ],
        })
    }

    /// World x coordinate of the center of voxel column `x`.
    #[inline]
    pub fn voxel_center_x(&self, x: u32) -> f32 {
        (x + self.offset[0]) as f32 * self.voxel_size + self.x_min + self.voxel_size / 2.0
    }

    /// World y coordinate of the center of voxel row `y`.
    #[inline]
    pub fn voxel_center_y(&self, y: u32) -> f32 {
        (y + self.offset[1]) as f32 * self.voxel_size + self.y_min + self.voxel_size / 2.0
    }

    /// World z coordinate of the center of voxel slice `z`.
    #[inline]
    pub fn voxel_center_z(&self, z: u32) -> f32 {
        (z + self.offset[2]) as f32 * self.voxel_size + self.z_min + self.voxel_size / 2.0
    }

    /// Number of voxels in one z slice.
    #[inline]
    pub fn slice_len(&self) -> usize {
        self.n_x as usize * self.n_y as usize
    }

    /// Total number of voxels.
    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.slice_len() * self.n_z as usize
    }

    /// Bytes of one z slab of `height` slices, stored as `f32`.
    #[inline]
    pub fn slab_bytes(&self, height: u32) -> u64 {
        self.slice_len() as u64 * height as u64 * std::mem::size_of::<f32>() as u64
    }
}

/// An axis-aligned clip of the output volume, in voxel indices.
///
/// Bounds are half-open: voxels `x1 <= x < x2` are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    /// Lower x bound (inclusive).
    pub x1: u32,
    /// Upper x bound (exclusive).
    pub x2: u32,
    /// Lower y bound (inclusive).
    pub y1: u32,
    /// Upper y bound (exclusive).
    pub y2: u32,
    /// Lower z bound (inclusive).
    pub z1: u32,
    /// Upper z bound (exclusive).
    pub z2: u32,
}

impl Roi {
    /// Checks that the ROI is non-empty and fits inside `vol`.
    pub fn validate(&self, vol: &VolumeGeometry) -> Result<()> {
        let ok = self.x1 < self.x2
            && self.y1 < self.y2
            && self.z1 < self.z2
            && self.x2 <= vol.n_x
            && self.y2 <= vol.n_y
            && self.z2 <= vol.n_z;
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidRoi {
                x1: self.x1,
                x2: self.x2,
                y1: self.y1,
                y2: self.y2,
                z1: self.z1,
                z2: self.z2,
                n_x: vol.n_x,
                n_y: vol.n_y,
                n_z: vol.n_z,
            })
        }
    }
}
