//! Work planning: slab decomposition and task generation.
//!
//! The output volume is split along `z` into slabs sized so that one slab,
//! the projections in flight, and the filter scratch space all fit a
//! device's memory budget. Each slab becomes one [`Task`], assigned to a
//! device round-robin; every task streams the full projection range.
//!
//! ```text
//!        z ▲
//!          │  ┌────────────┐
//!          │  │  slab 2    │──► task 2, device 0
//!          │  ├────────────┤
//!          │  │  slab 1    │──► task 1, device 1
//!          │  ├────────────┤
//!          │  │  slab 0    │──► task 0, device 0
//!          │  └────────────┘
//! ```

use std::ops::Range;

use crate::{DetectorGeometry, Error, Result, VolumeGeometry};

/// Slab decomposition of the output volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubvolumeInfo {
    /// Height (z slices) of a full slab.
    pub slab_height: u32,
    /// Number of slabs covering the volume.
    pub num_slabs: u32,
    /// Height of the final slab (equal to `slab_height` when `n_z`
    /// divides evenly).
    pub last_height: u32,
}

impl SubvolumeInfo {
    /// Height of slab `index`.
    #[inline]
    pub fn height_of(&self, index: u32) -> u32 {
        if index + 1 == self.num_slabs {
            self.last_height
        } else {
            self.slab_height
        }
    }
}

/// One unit of work: a z slab reconstructed on one device from a range of
/// projections. Tasks are created up front and consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Slab index, also the task id.
    pub id: u32,
    /// First z slice of the slab (inclusive), relative to the volume.
    pub z_begin: u32,
    /// One past the last z slice of the slab.
    pub z_end: u32,
    /// Device the slab is assigned to.
    pub device: usize,
    /// Projection indices streamed into this slab.
    pub projections: Range<u32>,
}

impl Task {
    /// Number of z slices in this task's slab.
    #[inline]
    pub fn slab_height(&self) -> u32 {
        self.z_end - self.z_begin
    }
}

/// Bytes of one projection buffer held in device memory.
fn projection_bytes(det: &DetectorGeometry) -> u64 {
    det.projection_len() as u64 * std::mem::size_of::<f32>() as u64
}

/// Bytes of frequency-domain scratch held by the filter stage: the padded
/// complex spectrum of one projection plus workspace of the same order.
fn filter_scratch_bytes(det: &DetectorGeometry) -> u64 {
    let padded = 2 * det.n_h.next_power_of_two() as u64;
    2 * padded * det.n_v as u64 * (2 * std::mem::size_of::<f32>() as u64)
}

/// Splits the volume into slabs that fit `budget_bytes` alongside
/// `parallel_projections` in-flight projections and the filter scratch.
///
/// # Errors
///
/// Returns [`Error::BudgetExceeded`] if not even a single-slice slab fits.
pub fn subvolume_info(
    vol: &VolumeGeometry,
    det: &DetectorGeometry,
    parallel_projections: usize,
    budget_bytes: u64,
) -> Result<SubvolumeInfo> {
    let fixed = parallel_projections as u64 * projection_bytes(det) + filter_scratch_bytes(det);
    let slice_bytes = vol.slab_bytes(1);
    let min_required = fixed + slice_bytes;
    if min_required > budget_bytes {
        return Err(Error::BudgetExceeded {
            required: min_required,
            budget: budget_bytes,
        });
    }

    let max_height = (budget_bytes - fixed) / slice_bytes;
    let slab_height = max_height.min(vol.n_z as u64) as u32;
    let num_slabs = vol.n_z.div_ceil(slab_height);
    let remainder = vol.n_z % slab_height;
    let last_height = if remainder == 0 { slab_height } else { remainder };

    Ok(SubvolumeInfo {
        slab_height,
        num_slabs,
        last_height,
    })
}

/// Generates the task list: one task per slab, devices assigned
/// round-robin, each task streaming the full projection range.
pub fn make_tasks(
    vol: &VolumeGeometry,
    sub: &SubvolumeInfo,
    det: &DetectorGeometry,
    devices: usize,
) -> Result<Vec<Task>> {
    if devices == 0 {
        return Err(Error::NoDevices);
    }
    let mut tasks = Vec::with_capacity(sub.num_slabs as usize);
    for id in 0..sub.num_slabs {
        let z_begin = id * sub.slab_height;
        let z_end = (z_begin + sub.height_of(id)).min(vol.n_z);
        tasks.push(Task {
            id,
            z_begin,
            z_end,
            device: id as usize % devices,
            projections: 0..det.num_projections,
        });
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det() -> DetectorGeometry {
        DetectorGeometry {
            n_h: 64,
            n_v: 32,
            pitch_h: 1.0,
            pitch_v: 1.0,
            d_so: 100.0,
            d_sd: 200.0,
            delta_phi: 0.1,
            num_projections: 63,
        }
    }

    fn vol() -> VolumeGeometry {
        VolumeGeometry::from_detector(&det(), None).unwrap()
    }

    #[test]
    fn test_single_slab_when_budget_is_large() {
        let sub = subvolume_info(&vol(), &det(), 5, 1 << 30).unwrap();
        assert_eq!(sub.num_slabs, 1);
        assert_eq!(sub.slab_height, 32);
        assert_eq!(sub.last_height, 32);
    }

    #[test]
    fn test_slabs_cover_volume_exactly_once() {
        let v = vol();
        // Budget sized to force several slabs.
        let budget = 5 * 64 * 32 * 4 + filter_scratch_bytes(&det()) + v.slab_bytes(5);
        let sub = subvolume_info(&v, &det(), 5, budget).unwrap();
        assert!(sub.num_slabs > 1);

        let tasks = make_tasks(&v, &sub, &det(), 2).unwrap();
        assert_eq!(tasks.len(), sub.num_slabs as usize);

        // Contiguous, non-overlapping coverage of [0, n_z).
        let mut next_z = 0;
        for t in &tasks {
            assert_eq!(t.z_begin, next_z);
            assert!(t.z_end > t.z_begin);
            assert_eq!(t.projections, 0..63);
            next_z = t.z_end;
        }
        assert_eq!(next_z, v.n_z);

        // Round-robin device assignment.
        assert_eq!(tasks[0].device, 0);
        assert_eq!(tasks[1].device, 1);
        if tasks.len() > 2 {
            assert_eq!(tasks[2].device, 0);
        }
    }

    #[test]
    fn test_budget_too_small_is_an_error() {
        let err = subvolume_info(&vol(), &det(), 5, 1024).unwrap_err();
        assert!(matches!(err, Error::BudgetExceeded { .. }));
    }

    #[test]
    fn test_zero_devices_rejected() {
        let v = vol();
        let sub = subvolume_info(&v, &det(), 5, 1 << 30).unwrap();
        assert!(matches!(
            make_tasks(&v, &sub, &det(), 0),
            Err(Error::NoDevices)
        ));
    }
}
