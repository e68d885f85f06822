//! Preloader stage: host → device upload.

use cbct_core::Error as CoreError;

use crate::backend::{DevicePool, Stream};
use crate::pipeline::{poison, recv, send, Message, MessageReceiver, MessageSender, StageWorker};
use crate::{ComputeError, ComputeResult};

use super::{DeviceProjection, HostProjection};

/// Moves each incoming host projection into a pooled device buffer.
///
/// For every projection the stage takes a buffer from the device pool
/// (blocking while the pool is exhausted, which bounds the projections in
/// flight), creates a fresh concurrent stream, zero-fills the buffer and
/// copies the host rows in. The stream is synchronized exactly once, right
/// before the host buffer is released, so the downstream kernels can stay
/// asynchronous on the same stream.
pub struct PreloaderStage {
    pool: DevicePool,
    device: usize,
    expected: (u32, u32),
}

impl PreloaderStage {
    /// Creates the upload stage for `device`; `expected` is the detector
    /// `(n_h, n_v)` every projection must match.
    pub fn new(pool: DevicePool, device: usize, expected: (u32, u32)) -> Self {
        Self {
            pool,
            device,
            expected,
        }
    }

    fn upload(&self, projection: HostProjection) -> ComputeResult<DeviceProjection> {
        let image = &projection.image;
        if (image.width(), image.height()) != self.expected {
            return Err(ComputeError::Core(CoreError::dimension_mismatch(
                self.expected,
                (image.width(), image.height()),
            )));
        }

        let mut buf = self.pool.allocate(image.width(), image.height())?;
        let stream = Stream::new(self.device);

        // Zero-fill then async copy, both on the projection's stream.
        buf.zero_fill();
        let src = image.data();
        let width = image.width() as usize;
        for y in 0..image.height() {
            buf.row_mut(y)
                .copy_from_slice(&src[y as usize * width..(y as usize + 1) * width]);
        }

        // The one host-side synchronization: the host buffer dies here.
        stream.synchronize()?;

        Ok(DeviceProjection {
            buf,
            width: image.width(),
            height: image.height(),
            index: projection.index,
            phi: projection.phi,
            stream,
        })
    }
}

impl StageWorker for PreloaderStage {
    type Input = HostProjection;
    type Output = DeviceProjection;

    fn name(&self) -> &'static str {
        "preloader"
    }

    fn run(
        self,
        input: MessageReceiver<HostProjection>,
        output: MessageSender<DeviceProjection>,
    ) -> ComputeResult<()> {
        loop {
            match recv(self.name(), &input)? {
                Message::Task(task) => send(self.name(), &output, Message::Task(task))?,
                Message::Item(projection) => match self.upload(projection) {
                    Ok(uploaded) => send(self.name(), &output, Message::Item(uploaded))?,
                    Err(err) => {
                        tracing::error!(error = %err, "projection upload failed");
                        poison(&output);
                        return Err(err);
                    }
                },
                Message::Poison => return send(self.name(), &output, Message::Poison),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbct_core::ImageBuffer;

    #[test]
    fn test_upload_copies_pixels() {
        let pool = DevicePool::new(0, 2);
        let stage = PreloaderStage::new(pool, 0, (3, 2));

        let mut image = ImageBuffer::new(3, 2);
        image.data_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let uploaded = stage
            .upload(HostProjection {
                image,
                index: 7,
                phi: 0.25,
            })
            .unwrap();

        assert_eq!(uploaded.index, 7);
        assert_eq!(uploaded.buf.at(2, 0), 3.0);
        assert_eq!(uploaded.buf.at(0, 1), 4.0);
        assert_eq!(uploaded.stream.device(), 0);
    }

    #[test]
    fn test_upload_rejects_wrong_shape() {
        let pool = DevicePool::new(0, 2);
        let stage = PreloaderStage::new(pool, 0, (4, 4));
        let err = stage
            .upload(HostProjection {
                image: ImageBuffer::new(3, 2),
                index: 0,
                phi: 0.0,
            })
            .unwrap_err();
        assert!(matches!(err, ComputeError::Core(_)));
    }
}
