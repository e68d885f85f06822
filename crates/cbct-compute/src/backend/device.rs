//! Logical device enumeration and limits.
//!
//! The engine schedules work across "devices". This backend exposes
//! logical devices backed by host memory and rayon data parallelism;
//! kernels, streams and pools keep accelerator semantics so the
//! scheduling layer behaves as it would with discrete device memory.
//! The memory budget is divided evenly between visible devices.

use super::memory;

/// Limits of one device, used for slab planning.
#[derive(Debug, Clone, Copy)]
pub struct DeviceLimits {
    /// Total memory attributed to this device in bytes.
    pub total_memory: u64,
    /// Memory the planner may actually use (after the safety margin).
    pub available_memory: u64,
}

/// One logical device.
#[derive(Debug, Clone, Copy)]
pub struct Device {
    id: usize,
    limits: DeviceLimits,
}

impl Device {
    /// Enumerates visible devices.
    ///
    /// `count` overrides the device count; otherwise `CBCT_DEVICES` is
    /// consulted, defaulting to one device.
    pub fn enumerate(count: Option<usize>) -> Vec<Device> {
        let count = count
            .or_else(memory::device_count_override)
            .unwrap_or(1)
            .max(1);
        let per_device = memory::available_memory() / count as u64;
        let limits = DeviceLimits {
            total_memory: per_device,
            available_memory: (per_device as f64 * memory::SAFE_MEMORY_FRACTION) as u64,
        };

        tracing::debug!(
            devices = count,
            per_device = %memory::format_bytes(per_device),
            "enumerated devices"
        );
        (0..count).map(|id| Device { id, limits }).collect()
    }

    /// Device identifier, dense from zero.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Memory limits of this device.
    #[inline]
    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }
}
