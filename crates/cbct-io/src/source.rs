//! Projection sources.
//!
//! The reconstruction engine pulls projections through the
//! [`ProjectionSource`] trait, keeping the pipeline independent of where
//! the data lives:
//!
//! - [`DirectorySource`] - one raw `f32` file per rotation angle on disk
//! - [`MemorySource`] - projections held in RAM (tests, synthetic scans)

use std::path::{Path, PathBuf};

use cbct_core::ImageBuffer;

use crate::{raw, IoError, IoResult};

/// A source of projections in acquisition order.
///
/// Implementations must be shareable across the per-device pipelines:
/// every pipeline streams the full scan for its own subvolumes.
pub trait ProjectionSource: Send + Sync {
    /// Projection dimensions `(width, height)` = detector `(n_h, n_v)`.
    fn dimensions(&self) -> (u32, u32);

    /// Number of projections in the scan.
    fn num_projections(&self) -> u32;

    /// Reads the projection at `index` (0-based acquisition order).
    fn read_projection(&self, index: u32) -> IoResult<ImageBuffer>;
}

/// Reads projections from a directory of raw `f32` files.
///
/// Files are matched by extension and ordered lexicographically, so the
/// conventional zero-padded numbering (`proj_000042.raw`) maps file order
/// to acquisition order.
#[derive(Debug)]
pub struct DirectorySource {
    files: Vec<PathBuf>,
    width: u32,
    height: u32,
}

impl DirectorySource {
    /// Scans `dir` for `.raw` files and checks the count against the
    /// expected number of projections.
    pub fn open(dir: &Path, width: u32, height: u32, num_projections: u32) -> IoResult<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == "raw"))
            .collect();
        files.sort();

        if files.len() < num_projections as usize {
            return Err(IoError::MissingProjections {
                dir: dir.to_path_buf(),
                expected: num_projections,
                found: files.len(),
            });
        }
        files.truncate(num_projections as usize);

        tracing::debug!(
            dir = %dir.display(),
            count = files.len(),
            "opened projection directory"
        );
        Ok(Self {
            files,
            width,
            height,
        })
    }
}

impl ProjectionSource for DirectorySource {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn num_projections(&self) -> u32 {
        self.files.len() as u32
    }

    fn read_projection(&self, index: u32) -> IoResult<ImageBuffer> {
        let path = self
            .files
            .get(index as usize)
            .ok_or(IoError::IndexOutOfRange {
                index,
                count: self.files.len() as u32,
            })?;
        raw::read_image(path, self.width, self.height)
    }
}

/// An in-memory projection source.
pub struct MemorySource {
    projections: Vec<ImageBuffer>,
    width: u32,
    height: u32,
}

impl MemorySource {
    /// Wraps a list of equally sized projections.
    ///
    /// # Panics
    ///
    /// Panics if the list is empty or the projections disagree in size.
    pub fn new(projections: Vec<ImageBuffer>) -> Self {
        let first = &projections[0];
        let (width, height) = (first.width(), first.height());
        assert!(
            projections
                .iter()
                .all(|p| p.width() == width && p.height() == height),
            "all projections must share the detector dimensions"
        );
        Self {
            projections,
            width,
            height,
        }
    }
}

impl ProjectionSource for MemorySource {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn num_projections(&self) -> u32 {
        self.projections.len() as u32
    }

    fn read_projection(&self, index: u32) -> IoResult<ImageBuffer> {
        self.projections
            .get(index as usize)
            .cloned()
            .ok_or(IoError::IndexOutOfRange {
                index,
                count: self.projections.len() as u32,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_source_orders_files() -> IoResult<()> {
        let dir = tempfile::tempdir()?;
        // Written out of order on purpose.
        for (name, value) in [("p_0002.raw", 2.0f32), ("p_0000.raw", 0.0), ("p_0001.raw", 1.0)] {
            raw::write_image(&dir.path().join(name), &[value; 4])?;
        }
        // A stray non-raw file must be ignored.
        std::fs::write(dir.path().join("notes.txt"), b"ignore me")?;

        let source = DirectorySource::open(dir.path(), 2, 2, 3)?;
        assert_eq!(source.num_projections(), 3);
        for i in 0..3 {
            assert_eq!(source.read_projection(i)?.at(0, 0), i as f32);
        }
        Ok(())
    }

    #[test]
    fn test_directory_source_missing_files() -> IoResult<()> {
        let dir = tempfile::tempdir()?;
        raw::write_image(&dir.path().join("p_0000.raw"), &[0.0; 4])?;

        let err = DirectorySource::open(dir.path(), 2, 2, 5).unwrap_err();
        assert!(matches!(err, IoError::MissingProjections { .. }));
        Ok(())
    }

    #[test]
    fn test_memory_source() {
        let source = MemorySource::new(vec![ImageBuffer::new(4, 4); 2]);
        assert_eq!(source.dimensions(), (4, 4));
        assert_eq!(source.num_projections(), 2);
        assert!(source.read_projection(2).is_err());
    }
}
