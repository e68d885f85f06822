//! Sink stage: slab assembly and volume output.

use std::sync::{Arc, Mutex};

use cbct_core::{VolumeBuffer, VolumeGeometry};
use cbct_io::VolumeSink;

use crate::pipeline::{recv, Message, MessageReceiver, SinkWorker};
use crate::{ComputeError, ComputeResult};

use super::SlabVolume;

struct SinkState {
    volume: VolumeBuffer,
    remaining_tasks: usize,
    writer: Box<dyn VolumeSink>,
}

/// The single sink shared by every per-device pipeline.
///
/// Each pipeline ends in a [`SinkStage`] holding a clone of this handle;
/// slabs from all devices land here under one lock. When the last task's
/// slab arrives the assembled volume goes to the [`VolumeSink`].
#[derive(Clone)]
pub struct SharedSink {
    state: Arc<Mutex<SinkState>>,
}

impl SharedSink {
    /// Creates the sink for a volume of `geometry` expecting
    /// `total_tasks` slabs.
    pub fn new(geometry: VolumeGeometry, total_tasks: usize, writer: Box<dyn VolumeSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                volume: VolumeBuffer::new(geometry),
                remaining_tasks: total_tasks,
                writer,
            })),
        }
    }

    /// Downloads one finished slab into the volume; writes the volume out
    /// when it was the last one.
    fn accept(&self, slab: SlabVolume) -> ComputeResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .volume
            .place_slab(slab.z_offset, slab.slices, &slab.data)?;
        state.remaining_tasks = state.remaining_tasks.saturating_sub(1);
        tracing::info!(
            task = slab.task_id,
            z_offset = slab.z_offset,
            remaining = state.remaining_tasks,
            "slab assembled"
        );

        if state.remaining_tasks == 0 {
            let state = &mut *state;
            state.writer.write_volume(&state.volume)?;
        }
        Ok(())
    }

    /// True once every expected slab has been assembled.
    pub fn is_complete(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remaining_tasks
            == 0
    }
}

/// Pipeline adapter feeding one device's slabs into the [`SharedSink`].
pub struct SinkStage {
    shared: SharedSink,
}

impl SinkStage {
    /// Creates the sink end of one pipeline.
    pub fn new(shared: SharedSink) -> Self {
        Self { shared }
    }
}

impl SinkWorker for SinkStage {
    type Input = SlabVolume;

    fn name(&self) -> &'static str {
        "sink"
    }

    fn run(self, input: MessageReceiver<SlabVolume>) -> ComputeResult<()> {
        loop {
            match recv(self.name(), &input)? {
                Message::Task(_) => {}
                Message::Item(slab) => {
                    if let Err(err) = self.shared.accept(slab) {
                        tracing::error!(error = %err, "slab assembly failed");
                        return Err(err);
                    }
                }
                Message::Poison => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbct_io::MemorySink;

    fn geometry() -> VolumeGeometry {
        VolumeGeometry {
            n_x: 2,
            n_y: 2,
            n_z: 4,
            voxel_size: 1.0,
            x_min: -1.0,
            y_min: -1.0,
            z_min: -2.0,
            offset: [0, 0, 0],
        }
    }

    fn slab(task_id: u32, z_offset: u32, slices: u32, value: f32) -> SlabVolume {
        SlabVolume {
            data: vec![value; 4 * slices as usize],
            n_x: 2,
            n_y: 2,
            slices,
            z_offset,
            task_id,
        }
    }

    #[test]
    fn test_volume_written_after_last_slab() {
        let sink = MemorySink::new();
        let captured = sink.volume();
        let shared = SharedSink::new(geometry(), 2, Box::new(sink));

        shared.accept(slab(0, 0, 2, 1.0)).unwrap();
        assert!(!shared.is_complete());
        assert!(captured.lock().unwrap().is_none());

        shared.accept(slab(1, 2, 2, 2.0)).unwrap();
        assert!(shared.is_complete());

        let guard = captured.lock().unwrap();
        let volume = guard.as_ref().expect("volume written");
        assert_eq!(volume.at(0, 0, 1), 1.0);
        assert_eq!(volume.at(1, 1, 3), 2.0);
    }

    #[test]
    fn test_out_of_range_slab_is_an_error() {
        let shared = SharedSink::new(geometry(), 1, Box::new(MemorySink::new()));
        let err = shared.accept(slab(0, 3, 2, 1.0)).unwrap_err();
        assert!(matches!(err, ComputeError::Core(_)));
    }
}
