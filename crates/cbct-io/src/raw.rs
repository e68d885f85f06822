//! Raw little-endian `f32` image files.
//!
//! Projections arrive and volume slices leave as headerless binary files:
//! `width * height` little-endian `f32` values in row-major order. The
//! rotation angle of a projection is not stored in the file; it derives
//! from the file's position in the scan sequence.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use cbct_core::ImageBuffer;

use crate::{IoError, IoResult};

/// Reads a raw `f32` image of the given dimensions.
pub fn read_image(path: &Path, width: u32, height: u32) -> IoResult<ImageBuffer> {
    let expected = width as u64 * height as u64 * 4;
    let meta = std::fs::metadata(path)?;
    if meta.len() != expected {
        return Err(IoError::BadProjectionSize {
            path: path.to_path_buf(),
            expected,
            got: meta.len(),
        });
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut bytes = vec![0u8; expected as usize];
    reader.read_exact(&mut bytes)?;

    let data = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(ImageBuffer::from_vec(data, width, height)?)
}

/// Writes pixel data as a raw `f32` image.
pub fn write_image(path: &Path, data: &[f32]) -> IoResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for value in data {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}
