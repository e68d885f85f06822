//! Filter stage: frequency-domain ramp filtering of detector rows.
//!
//! Each projection row is convolved with the discrete ramp kernel
//!
//! ```text
//! r(0)        = 1 / (8 tau^2)
//! r(j), j odd = -1 / (2 j^2 pi^2 tau^2)
//! r(j), else  = 0
//! ```
//!
//! with `tau` the horizontal pixel pitch. The convolution runs in the
//! frequency domain: rows are zero-padded to the filter length `L`
//! (a power of two, at least twice the row width, so the circular
//! convolution is linear), transformed, scaled by the precomputed ramp
//! response `tau * |R(w)|`, transformed back and unpadded with the `1/L`
//! normalization. The response is purely real, so the per-bin operation
//! is a real scaling of the complex spectrum.

use std::f32::consts::PI;
use std::sync::Arc;

use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use cbct_core::DetectorGeometry;

use crate::pipeline::{recv, send, Message, MessageReceiver, MessageSender, StageWorker};
use crate::ComputeResult;

use super::DeviceProjection;

/// The discrete ramp filter for one detector width, with FFT plans and
/// frequency response built once and reused for every projection.
pub struct RampFilter {
    length: usize,
    response: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch_len: usize,
}

impl RampFilter {
    /// Builds the filter for rows of `n_h` pixels at pitch `tau`.
    pub fn new(n_h: u32, tau: f32) -> Self {
        let length = 2 * n_h.next_power_of_two() as usize;

        // Time-domain kernel over j = -(L-2)/2 ..= L/2; the layout shift
        // is irrelevant because only the spectrum magnitude is kept.
        let tau2 = tau * tau;
        let mut kernel: Vec<Complex<f32>> = (0..length)
            .map(|k| {
                let j = k as i64 - (length as i64 - 2) / 2;
                let r = if j == 0 {
                    1.0 / (8.0 * tau2)
                } else if j % 2 == 0 {
                    0.0
                } else {
                    -1.0 / (2.0 * (j * j) as f32 * PI * PI * tau2)
                };
                Complex::new(r, 0.0)
            })
            .collect();

        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(length);
        let inverse = planner.plan_fft_inverse(length);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        let mut scratch = vec![Complex::default(); forward.get_inplace_scratch_len()];
        forward.process_with_scratch(&mut kernel, &mut scratch);
        let response = kernel.iter().map(|c| tau * c.norm()).collect();

        Self {
            length,
            response,
            forward,
            inverse,
            scratch_len,
        }
    }

    /// Filter length `L`.
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// The frequency response `tau * |R(w)|`, `L` bins.
    #[inline]
    pub fn response(&self) -> &[f32] {
        &self.response
    }

    /// Filters `height` rows of `width` pixels in place.
    ///
    /// `rows` provides each row as a mutable slice (the pitched projection
    /// rows); the padded spectra live in stage-local scratch, released
    /// before the call returns.
    pub fn apply(&self, rows: &mut [&mut [f32]], width: usize) {
        let length = self.length;
        let norm = 1.0 / length as f32;

        rows.par_iter_mut().for_each_init(
            || {
                (
                    vec![Complex::<f32>::default(); length],
                    vec![Complex::<f32>::default(); self.scratch_len],
                )
            },
            |(padded, scratch), row| {
                // Zero-pad the row into the transform buffer.
                for (slot, &value) in padded.iter_mut().zip(row.iter()) {
                    *slot = Complex::new(value, 0.0);
                }
                for slot in padded.iter_mut().skip(width) {
                    *slot = Complex::default();
                }

                self.forward.process_with_scratch(padded, scratch);
                for (bin, &k) in padded.iter_mut().zip(self.response.iter()) {
                    *bin *= k;
                }
                self.inverse.process_with_scratch(padded, scratch);

                for (value, bin) in row.iter_mut().zip(padded.iter()) {
                    *value = bin.re * norm;
                }
            },
        );
    }
}

/// Applies the ramp filter to every projection passing through.
pub struct FilterStage {
    filter: RampFilter,
}

impl FilterStage {
    /// Creates the filter stage for a detector.
    pub fn new(det_geo: &DetectorGeometry) -> Self {
        let filter = RampFilter::new(det_geo.n_h, det_geo.pitch_h);
        tracing::debug!(
            n_h = det_geo.n_h,
            length = filter.length(),
            "ramp filter built"
        );
        Self { filter }
    }

    fn apply(&self, projection: &mut DeviceProjection) {
        let width = projection.width as usize;
        let height = projection.height as usize;
        let pitch = projection.buf.pitch();

        let mut rows: Vec<&mut [f32]> = projection
            .buf
            .data_mut()
            .chunks_mut(pitch)
            .take(height)
            .map(|row| &mut row[..width])
            .collect();
        self.filter.apply(&mut rows, width);
    }
}

impl StageWorker for FilterStage {
    type Input = DeviceProjection;
    type Output = DeviceProjection;

    fn name(&self) -> &'static str {
        "filter"
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
