//! Volume sinks.
//!
//! Finished volumes leave the engine through the [`VolumeSink`] trait:
//!
//! - [`SliceFileSink`] - one raw `f32` file per z slice,
//!   `{prefix}_{slice:06}.{ext}`
//! - [`MemorySink`] - captures the volume for inspection in tests

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cbct_core::VolumeBuffer;

use crate::{raw, IoResult};

/// A destination for the assembled reconstruction volume.
pub trait VolumeSink: Send {
    /// Writes the complete volume, slice by slice.
    fn write_volume(&mut self, volume: &VolumeBuffer) -> IoResult<()>;
}

/// Writes each z slice to `{dir}/{prefix}_{slice:06}.{ext}`.
pub struct SliceFileSink {
    dir: PathBuf,
    prefix: String,
    extension: String,
}

impl SliceFileSink {
    /// Creates a sink writing into `dir` (created if absent) with the
    /// default `raw` extension.
    pub fn new(dir: &Path, prefix: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            extension: "raw".to_string(),
        }
    }

    /// Overrides the slice file extension.
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    /// Path of the file holding slice `z`.
    pub fn slice_path(&self, z: u32) -> PathBuf {
        self.dir
            .join(format!("{}_{:06}.{}", self.prefix, z, self.extension))
    }
}

impl VolumeSink for SliceFileSink {
    fn write_volume(&mut self, volume: &VolumeBuffer) -> IoResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let n_z = volume.geometry().n_z;
        for z in 0..n_z {
            raw::write_image(&self.slice_path(z), volume.slice(z))?;
        }
        tracing::info!(
            dir = %self.dir.display(),
            slices = n_z,
            "volume written"
        );
        Ok(())
    }
}

/// Captures the volume in memory; the handle returned by
/// [`MemorySink::volume`] can be read after the engine has finished.
#[derive(Default)]
pub struct MemorySink {
    captured: Arc<Mutex<Option<VolumeBuffer>>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle to the captured volume, populated once the engine
    /// completes.
    pub fn volume(&self) -> Arc<Mutex<Option<VolumeBuffer>>> {
        Arc::clone(&self.captured)
    }
}

impl VolumeSink for MemorySink {
    fn write_volume(&mut self, volume: &VolumeBuffer) -> IoResult<()> {
        *self.captured.lock().unwrap_or_else(|e| e.into_inner()) = Some(volume.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbct_core::VolumeGeometry;

    fn volume() -> VolumeBuffer {
        let geo = VolumeGeometry {
            n_x: 2,
            n_y: 2,
            n_z: 3,
            voxel_size: 1.0,
            x_min: -1.0,
            y_min: -1.0,
            z_min: -1.5,
            offset: [0, 0, 0],
        };
        let mut vol = VolumeBuffer::new(geo);
        let slab: Vec<f32> = (0..12).map(|i| i as f32).collect();
        vol.place_slab(0, 3, &slab).unwrap();
        vol
    }

    #[test]
    fn test_slice_files_and_naming() -> IoResult<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = SliceFileSink::new(dir.path(), "vol");
        let vol = volume();
        sink.write_volume(&vol)?;

        let path = sink.slice_path(2);
        assert!(path.ends_with("vol_000002.raw"));
        let slice = raw::read_image(&path, 2, 2)?;
        assert_eq!(slice.data(), vol.slice(2));
        Ok(())
    }

    #[test]
    fn test_memory_sink_captures() -> IoResult<()> {
        let mut sink = MemorySink::new();
        let handle = sink.volume();
        assert!(handle.lock().unwrap().is_none());

        sink.write_volume(&volume())?;
        let guard = handle.lock().unwrap();
        let captured = guard.as_ref().unwrap();
        assert_eq!(captured.at(1, 1, 2), 11.0);
        Ok(())
    }
}
