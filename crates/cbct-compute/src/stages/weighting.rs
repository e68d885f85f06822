//! Weighting stage: the FDK cosine pre-weight.

use rayon::prelude::*;

use cbct_core::DetectorGeometry;

use crate::pipeline::{recv, send, Message, MessageReceiver, MessageSender, StageWorker};
use crate::ComputeResult;

use super::DeviceProjection;

/// Multiplies each projection in place by the distance weight
///
/// ```text
/// w(u, v) = d_sd / sqrt(d_sd^2 + u_w^2 + v_w^2)
/// ```
///
/// where `(u_w, v_w)` is the pixel-center coordinate of detector pixel
/// `(u, v)`. The weight compensates the longer path from the source to
/// off-axis detector pixels. Single precision, no clamping; NaN inputs
/// propagate.
pub struct WeightingStage {
    d_sd: f32,
    h_min: f32,
    v_min: f32,
    pitch_h: f32,
    pitch_v: f32,
}

impl WeightingStage {
    /// Creates the weighting stage for a detector.
    pub fn new(det_geo: &DetectorGeometry) -> Self {
        Self {
            d_sd: det_geo.d_sd,
            h_min: det_geo.h_min(),
            v_min: det_geo.v_min(),
            pitch_h: det_geo.pitch_h,
            pitch_v: det_geo.pitch_v,
        }
    }

    /// The weight applied to detector pixel `(u, v)`.
    #[inline]
    pub fn weight(&self, u: u32, v: u32) -> f32 {
        let u_w = u as f32 * self.pitch_h + self.h_min + self.pitch_h / 2.0;
        let v_w = v as f32 * self.pitch_v + self.v_min + self.pitch_v / 2.0;
        self.d_sd / (self.d_sd * self.d_sd + u_w * u_w + v_w * v_w).sqrt()
    }

    fn apply(&self, projection: &mut DeviceProjection) {
        let width = projection.width as usize;
        let pitch = projection.buf.pitch();
        let d_sd2 = self.d_sd * self.d_sd;
        let (d_sd, h_min, v_min) = (self.d_sd, self.h_min, self.v_min);
        let (pitch_h, pitch_v) = (self.pitch_h, self.pitch_v);

        projection
            .buf
            .data_mut()
            .par_chunks_mut(pitch)
            .take(projection.height as usize)
            .enumerate()
            .for_each(|(v, row)| {
                let v_w = v as f32 * pitch_v + v_min + pitch_v / 2.0;
                for (u, value) in row[..width].iter_mut().enumerate() {
                    let u_w = u as f32 * pitch_h + h_min + pitch_h / 2.0;
                    *value *= d_sd / (d_sd2 + u_w * u_w + v_w * v_w).sqrt();
                }
            });
    }
}

impl StageWorker for WeightingStage {
    type Input = DeviceProjection;
    type Output = DeviceProjection;

    fn name(&self) -> &'static str {
        "weighting"
    }

    fn run(
        self,
        input: MessageReceiver<DeviceProjection>,
        output: MessageSender<DeviceProjection>,
    ) -> ComputeResult<()> {
        loop {
            match recv(self.name(), &input)? {
                Message::Task(task) => send(self.name(), &output, Message::Task(task))?,
                Message::Item(mut projection) => {
                    // Launched on the projection's stream; any failure
                    // surfaces at the next synchronization downstream.
                    self.apply(&mut projection);
                    send(self.name(), &output, Message::Item(projection))?;
                }
                Message::Poison => return send(self.name(), &output, Message::Poison),
            }
        }
    }
}
