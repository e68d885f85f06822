//! Source stage: turns the task plan into a stream of host projections.

use std::sync::Arc;

use cbct_core::DetectorGeometry;
use cbct_io::ProjectionSource;

use crate::pipeline::{poison, send, Message, MessageSender, SourceWorker, TaskQueue};
use crate::ComputeResult;

use super::HostProjection;

/// Drains the shared task queue for one device: for every claimed task it
/// announces the task downstream, then reads that task's projections in
/// acquisition order, tagging each with its rotation angle. When the
/// queue holds no more work for this device the stage emits the sentinel
/// and returns.
pub struct SourceStage {
    queue: Arc<TaskQueue>,
    reader: Arc<dyn ProjectionSource>,
    det_geo: DetectorGeometry,
    device: usize,
}

impl SourceStage {
    /// Creates the source stage of the pipeline owned by `device`.
    pub fn new(
        queue: Arc<TaskQueue>,
        reader: Arc<dyn ProjectionSource>,
        det_geo: DetectorGeometry,
        device: usize,
    ) -> Self {
        Self {
            queue,
            reader,
            det_geo,
            device,
        }
    }
}

impl SourceWorker for SourceStage {
    type Output = HostProjection;

    fn name(&self) -> &'static str {
        "source"
    }

    fn run(self, output: MessageSender<HostProjection>) -> ComputeResult<()> {
        while let Some(task) = self.queue.pop_for_device(self.device) {
            tracing::info!(
                task = task.id,
                device = self.device,
                z_begin = task.z_begin,
                z_end = task.z_end,
                "task claimed"
            );
            let projections = task.projections.clone();
            send(self.name(), &output, Message::Task(task))?;

            for index in projections {
                let image = match self.reader.read_projection(index) {
                    Ok(image) => image,
                    Err(err) => {
                        tracing::error!(index, error = %err, "projection read failed");
                        poison(&output);
                        return Err(err.into());
                    }
                };
                let projection = HostProjection {
                    image,
                    index,
                    phi: index as f32 * self.det_geo.delta_phi,
                };
                send(self.name(), &output, Message::Item(projection))?;
            }
        }
        send(self.name(), &output, Message::Poison)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{recv, stage_channel};
    use cbct_core::{ImageBuffer, Task};
    use cbct_io::MemorySource;

    fn det_geo() -> DetectorGeometry {
        DetectorGeometry {
            n_h: 4,
            n_v: 4,
            pitch_h: 1.0,
            pitch_v: 1.0,
            d_so: 10.0,
            d_sd: 20.0,
            delta_phi: 0.5,
            num_projections: 3,
        }
    }

    #[test]
    fn test_source_emits_tasks_projections_and_sentinel() {
        let reader = Arc::new(MemorySource::new(vec![ImageBuffer::new(4, 4); 3]));
        let queue = Arc::new(TaskQueue::new(vec![Task {
            id: 0,
            z_begin: 0,
            z_end: 4,
            device: 0,
            projections: 0..3,
        }]));
        let stage = SourceStage::new(queue, reader, det_geo(), 0);

        let (tx, rx) = stage_channel(8);
        stage.run(tx).unwrap();

        assert!(matches!(recv("test", &rx).unwrap(), Message::Task(_)));
        for index in 0..3u32 {
            match recv("test", &rx).unwrap() {
                Message::Item(p) => {
                    assert_eq!(p.index, index);
                    assert!((p.phi - index as f32 * 0.5).abs() < 1e-6);
                }
                _ => panic!("expected projection"),
            }
        }
        assert!(matches!(recv("test", &rx).unwrap(), Message::Poison));
    }

    #[test]
    fn test_source_ignores_other_devices_tasks() {
        let reader = Arc::new(MemorySource::new(vec![ImageBuffer::new(4, 4); 3]));
        let queue = Arc::new(TaskQueue::new(vec![Task {
            id: 0,
            z_begin: 0,
            z_end: 4,
            device: 1,
            projections: 0..3,
        }]));
        let stage = SourceStage::new(Arc::clone(&queue), reader, det_geo(), 0);

        let (tx, rx) = stage_channel(8);
        stage.run(tx).unwrap();

        // Device 0 sees only the sentinel; device 1's task stays queued.
        assert!(matches!(recv("test", &rx).unwrap(), Message::Poison));
        assert_eq!(queue.remaining(), 1);
    }
}
