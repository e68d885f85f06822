//! The reconstruction engine: planning plus per-device pipelines.
//!
//! [`Engine::run`] derives the volume grid, splits it into slabs, and
//! launches one six-stage pipeline per visible device, all draining a
//! shared task queue and feeding a shared sink:
//!
//! ```text
//!              ┌─ device 0: source ► preloader ► weighting ► filter ► recon ─┐
//! task queue ──┤                                                             ├─► shared sink
//!              └─ device 1: source ► preloader ► weighting ► filter ► recon ─┘
//! ```

use std::sync::Arc;
use std::time::Instant;

use cbct_core::{
    make_tasks, subvolume_info, DetectorGeometry, Roi, SubvolumeInfo, Task, VolumeGeometry,
};
use cbct_io::{ProjectionSource, VolumeSink};

use crate::backend::{Device, DevicePool};
use crate::pipeline::{Pipeline, TaskQueue, DEFAULT_INPUT_LIMIT};
use crate::stages::{
    FilterStage, PreloaderStage, ReconstructionStage, SharedSink, SinkStage, SourceStage,
    WeightingStage,
};
use crate::{ComputeError, ComputeResult};

/// Number of projections resident in one pipeline at the same time; also
/// the device pool limit.
pub const PARALLEL_PROJECTIONS: usize = 5;

/// Engine configuration beyond the scan geometry.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Detector and trajectory description.
    pub det_geo: DetectorGeometry,
    /// Optional clip of the output volume.
    pub roi: Option<Roi>,
    /// Device count override; `None` consults `CBCT_DEVICES`.
    pub devices: Option<usize>,
    /// Per-device memory budget override in bytes; `None` uses the
    /// detected device limits.
    pub memory_budget: Option<u64>,
    /// Bound of each channel between stages.
    pub input_limit: usize,
    /// Projections in flight per pipeline (pool limit).
    pub parallel_projections: usize,
}

impl EngineConfig {
    /// Creates a configuration with the default pipeline constants.
    pub fn new(det_geo: DetectorGeometry) -> Self {
        Self {
            det_geo,
            roi: None,
            devices: None,
            memory_budget: None,
            input_limit: DEFAULT_INPUT_LIMIT,
            parallel_projections: PARALLEL_PROJECTIONS,
        }
    }

    /// Clips the output volume.
    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    /// Overrides the number of devices.
    pub fn with_devices(mut self, devices: usize) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Overrides the per-device memory budget used for slab planning.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }
}

/// The work plan derived from a configuration.
#[derive(Debug, Clone)]
pub struct ReconstructionPlan {
    /// The output volume grid.
    pub vol_geo: VolumeGeometry,
    /// Slab decomposition.
    pub subvolumes: SubvolumeInfo,
    /// Tasks in execution order.
    pub tasks: Vec<Task>,
    /// Devices the tasks are spread over.
    pub devices: Vec<Device>,
}

/// The FDK reconstruction engine.
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine; fails fast on invalid geometry.
    pub fn new(config: EngineConfig) -> ComputeResult<Self> {
        config.det_geo.validate()?;
        Ok(Self { config })
    }

    /// Derives the volume grid, slab split and task list without running
    /// anything.
    pub fn plan(&self) -> ComputeResult<ReconstructionPlan> {
        let vol_geo = VolumeGeometry::from_detector(&self.config.det_geo, self.config.roi.as_ref())?;
        let devices = Device::enumerate(self.config.devices);
        let budget = match self.config.memory_budget {
            Some(bytes) => bytes,
            None => devices
                .first()
                .map(|d| d.limits().available_memory)
                .ok_or(cbct_core::Error::NoDevices)?,
        };

        let subvolumes = subvolume_info(
            &vol_geo,
            &self.config.det_geo,
            self.config.parallel_projections,
            budget,
        )?;
        let tasks = make_tasks(&vol_geo, &subvolumes, &self.config.det_geo, devices.len())?;

        tracing::info!(
            n_x = vol_geo.n_x,
            n_y = vol_geo.n_y,
            n_z = vol_geo.n_z,
            slabs = subvolumes.num_slabs,
            devices = devices.len(),
            "reconstruction planned"
        );
        Ok(ReconstructionPlan {
            vol_geo,
            subvolumes,
            tasks,
            devices,
        })
    }

    /// Runs the full reconstruction: projections from `source`, volume
    /// into `sink`.
    pub fn run(
        &self,
        source: Arc<dyn ProjectionSource>,
        sink: Box<dyn VolumeSink>,
    ) -> ComputeResult<ReconstructionPlan> {
        let plan = self.plan()?;
        let start = Instant::now();

        let queue = Arc::new(TaskQueue::new(plan.tasks.clone()));
        let shared_sink = SharedSink::new(plan.vol_geo, plan.tasks.len(), sink);

        let mut pipelines = Vec::new();
        for device in &plan.devices {
            pipelines.push(self.launch_pipeline(
                device.id(),
                Arc::clone(&queue),
                Arc::clone(&source),
                shared_sink.clone(),
                plan.vol_geo,
            ));
        }

        let mut first_error: Option<ComputeError> = None;
        for handle in pipelines {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(_) => {
                    first_error.get_or_insert(ComputeError::WorkerPanicked {
                        stage: "pipeline driver".to_string(),
                    });
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let elapsed = start.elapsed();
        tracing::info!(
            "reconstruction finished in {}:{:02} minutes",
            elapsed.as_secs() / 60,
            elapsed.as_secs() % 60
        );
        Ok(plan)
    }

    /// Assembles and runs the six-stage pipeline for one device on its
    /// own driver thread.
    fn launch_pipeline(
        &self,
        device: usize,
        queue: Arc<TaskQueue>,
        source: Arc<dyn ProjectionSource>,
        shared_sink: SharedSink,
        vol_geo: VolumeGeometry,
    ) -> std::thread::JoinHandle<ComputeResult<()>> {
        let det_geo = self.config.det_geo;
        let input_limit = self.config.input_limit;
        let pool = DevicePool::new(device, self.config.parallel_projections);

        std::thread::spawn(move || {
            let mut pipeline = Pipeline::new(input_limit);
            let rx = pipeline.source(SourceStage::new(queue, source, det_geo, device));
            let rx = pipeline.stage(
                PreloaderStage::new(pool, device, (det_geo.n_h, det_geo.n_v)),
                rx,
            );
            let rx = pipeline.stage(WeightingStage::new(&det_geo), rx);
            let rx = pipeline.stage(FilterStage::new(&det_geo), rx);
            let rx = pipeline.stage(ReconstructionStage::new(det_geo, vol_geo, device), rx);
            pipeline.sink(SinkStage::new(shared_sink), rx);
            pipeline.wait()
        })
    }
}
