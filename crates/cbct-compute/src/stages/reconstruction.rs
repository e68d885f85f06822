//! Reconstruction stage: differential back-projection into subvolumes.

use rayon::prelude::*;

use cbct_core::{DetectorGeometry, Task, VolumeGeometry};

use crate::backend::Stream;
use crate::pipeline::{poison, recv, send, Message, MessageReceiver, MessageSender, StageWorker};
use crate::{ComputeError, ComputeResult};

use super::{DeviceProjection, SlabVolume};

/// Voxels closer to the source plane than this fraction of `d_so` are
/// skipped instead of dividing by a vanishing magnification denominator.
const NEAR_SOURCE_FRACTION: f32 = 1e-4;

/// Accumulates each weighted, filtered projection into the subvolume of
/// the current task.
///
/// For every voxel the projection geometry is inverted: the voxel center
/// is rotated into the source frame, projected onto the detector plane
/// with magnification `U = d_so / (d_so - t)`, and the detector value is
/// sampled bilinearly. The voxel accumulates `U^2 * p * delta_phi`; rays
/// leaving the detector contribute zero.
///
/// The slab is zero-initialized when a task marker arrives and emitted
/// downstream when the task ends (the next task marker or the sentinel).
pub struct ReconstructionStage {
    det_geo: DetectorGeometry,
    vol_geo: VolumeGeometry,
    device: usize,
}

struct ActiveSlab {
    task: Task,
    data: Vec<f32>,
    stream: Stream,
}

impl ReconstructionStage {
    /// Creates the back-projection stage for one device.
    pub fn new(det_geo: DetectorGeometry, vol_geo: VolumeGeometry, device: usize) -> Self {
        Self {
            det_geo,
            vol_geo,
            device,
        }
    }

    fn begin_task(&self, task: Task) -> ActiveSlab {
        let voxels = self.vol_geo.slice_len() * task.slab_height() as usize;
        tracing::debug!(
            task = task.id,
            device = self.device,
            voxels,
            "subvolume allocated"
        );
        ActiveSlab {
            data: vec![0.0; voxels],
            stream: Stream::new(self.device),
            task,
        }
    }

    fn finish_task(&self, slab: ActiveSlab) -> ComputeResult<SlabVolume> {
        slab.stream.synchronize()?;
        tracing::info!(
            task = slab.task.id,
            device = self.device,
            "subvolume complete"
        );
        Ok(SlabVolume {
            data: slab.data,
            n_x: self.vol_geo.n_x,
            n_y: self.vol_geo.n_y,
            slices: slab.task.slab_height(),
            z_offset: slab.task.z_begin,
            task_id: slab.task.id,
        })
    }

    fn backproject(&self, slab: &mut ActiveSlab, projection: &DeviceProjection) {
        let det = &self.det_geo;
        let vol = &self.vol_geo;
        let (sin_phi, cos_phi) = projection.phi.sin_cos();

        let n_x = vol.n_x;
        let n_y = vol.n_y;
        let slice_len = vol.slice_len();
        let z_begin = slab.task.z_begin;

        let d_so = det.d_so;
        let delta_phi = det.delta_phi.abs();
        let h_min = det.h_min();
        let v_min = det.v_min();
        let near = NEAR_SOURCE_FRACTION * d_so;

        let buf = &projection.buf;
        let (n_h, n_v) = (projection.width, projection.height);

        slab.data
            .par_chunks_mut(slice_len)
            .enumerate()
            .for_each(|(dz, slice)| {
                let z_w = vol.voxel_center_z(z_begin + dz as u32);
                for y in 0..n_y {
                    let y_w = vol.voxel_center_y(y);
                    let row = &mut slice[y as usize * n_x as usize..(y as usize + 1) * n_x as usize];
                    for (x, voxel) in row.iter_mut().enumerate() {
                        let x_w = vol.voxel_center_x(x as u32);

                        // Rotate into the source frame at angle phi.
                        let s = x_w * cos_phi + y_w * sin_phi;
                        let t = -x_w * sin_phi + y_w * cos_phi;

                        let denom = d_so - t;
                        if denom.abs() < near {
                            continue;
                        }
                        let u_mag = d_so / denom;

                        // Project onto the detector plane and convert to
                        // fractional pixel indices.
                        let i = (u_mag * s - h_min) / det.pitch_h - 0.5;
                        let j = (u_mag * z_w - v_min) / det.pitch_v - 0.5;

                        if let Some(p) = sample_bilinear(buf, n_h, n_v, i, j) {
                            *voxel += u_mag * u_mag * p * delta_phi;
                        }
                    }
                }
            });
    }
}

/// Bilinear sample of the projection at fractional pixel `(i, j)`;
/// values outside `[0, n_h) x [0, n_v)` count as zero, rays entirely off
/// the detector return `None`.
#[inline]
fn sample_bilinear(
    buf: &crate::backend::PitchedBuffer,
    n_h: u32,
    n_v: u32,
    i: f32,
    j: f32,
) -> Option<f32> {
    if !(i > -1.0 && i < n_h as f32 && j > -1.0 && j < n_v as f32) {
        return None;
    }
    let i0 = i.floor();
    let j0 = j.floor();
    let fi = i - i0;
    let fj = j - j0;
    let i0 = i0 as i64;
    let j0 = j0 as i64;

    let fetch = |u: i64, v: i64| -> f32 {
        if u < 0 || v < 0 || u >= n_h as i64 || v >= n_v as i64 {
            0.0
        } else {
            buf.at(u as u32, v as u32)
        }
    };

    let top = fetch(i0, j0) * (1.0 - fi) + fetch(i0 + 1, j0) * fi;
    let bottom = fetch(i0, j0 + 1) * (1.0 - fi) + fetch(i0 + 1, j0 + 1) * fi;
    Some(top * (1.0 - fj) + bottom * fj)
}

impl StageWorker for ReconstructionStage {
    type Input = DeviceProjection;
    type Output = SlabVolume;

    fn name(&self) -> &'static str {
        "reconstruction"
    }

    fn run(
        self,
        input: MessageReceiver<DeviceProjection>,
        output: MessageSender<SlabVolume>,
    ) -> ComputeResult<()> {
        let mut active: Option<ActiveSlab> = None;
        loop {
            match recv(self.name(), &input)? {
                Message::Task(task) => {
                    if let Some(slab) = active.take() {
                        match self.finish_task(slab) {
                            Ok(volume) => send(self.name(), &output, Message::Item(volume))?,
                            Err(err) => {
                                poison(&output);
                                return Err(err);
                            }
                        }
                    }
                    active = Some(self.begin_task(task));
                }
                Message::Item(projection) => {
                    let Some(slab) = active.as_mut() else {
                        poison(&output);
                        return Err(ComputeError::kernel(
                            "reconstruction",
                            "projection received before any task",
                        ));
                    };
                    self.backproject(slab, &projection);
                    // The projection handle returns to the pool here,
                    // before the next one is pulled.
                    if let Err(err) = projection.stream.synchronize() {
                        tracing::error!(error = %err, "back-projection kernel failed");
                        poison(&output);
                        return Err(err);
                    }
                }
                Message::Poison => {
                    if let Some(slab) = active.take() {
                        match self.finish_task(slab) {
                            Ok(volume) => send(self.name(), &output, Message::Item(volume))?,
                            Err(err) => {
                                poison(&output);
                                return Err(err);
                            }
                        }
                    }
                    return send(self.name(), &output, Message::Poison);
                }
            }
        }
    }
}
