//! Device backend: logical devices, pooled memory, streams.
//!
//! The engine targets GPU-class accelerators; this backend provides the
//! host implementation. Devices are logical partitions of host memory,
//! kernels run as rayon loops on the stage threads, and streams carry
//! deferred errors to their synchronization points. The abstractions keep
//! accelerator semantics (pitched buffers, bounded pools, explicit
//! synchronization) so the pipeline and planner are backend-agnostic.

pub mod device;
pub mod memory;
pub mod pool;
pub mod stream;

pub use device::{Device, DeviceLimits};
pub use pool::{DevicePool, PitchedBuffer, PoolBuffer, PoolDiagnostics};
pub use stream::Stream;
