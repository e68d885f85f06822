//! Pooled pitched 2-D device buffers.
//!
//! Every projection travelling through a pipeline lives in a buffer
//! borrowed from its device's [`DevicePool`]. The pool hands out owning
//! [`PoolBuffer`] handles that return their buffer on drop instead of
//! freeing it, so a steady-state pipeline allocates each buffer exactly
//! once:
//!
//! ```text
//! ┌──────────────────────── DevicePool ────────────────────────┐
//! │  free list: [buf][buf]          outstanding: 3 / limit 5   │
//! └───────┬────────────────────────────────▲───────────────────┘
//!         │ allocate()                     │ drop(PoolBuffer)
//!         ▼                                │
//!       stages ──────────────────────── stages
//! ```
//!
//! `allocate` blocks once `limit` buffers are outstanding, which bounds
//! the memory of a pipeline regardless of how fast upstream stages run.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::{ComputeError, ComputeResult};

/// Row alignment of pitched allocations, in elements.
const PITCH_ALIGN: usize = 16;

/// A pitched 2-D `f32` buffer in device memory.
///
/// Rows are padded to a multiple of [`PITCH_ALIGN`] elements; pixel
/// `(x, y)` lives at `data[y * pitch + x]`.
#[derive(Debug)]
pub struct PitchedBuffer {
    data: Vec<f32>,
    width: u32,
    height: u32,
    pitch: usize,
}

impl PitchedBuffer {
    fn new(width: u32, height: u32) -> Self {
        let pitch = (width as usize).div_ceil(PITCH_ALIGN) * PITCH_ALIGN;
        Self {
            data: vec![0.0; pitch * height as usize],
            width,
            height,
            pitch,
        }
    }

    /// Buffer width in elements (excluding row padding).
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Buffer height in rows.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride in elements.
    #[inline]
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Element at `(x, y)`.
    #[inline]
    pub fn at(&self, x: u32, y: u32) -> f32 {
        self.data[y as usize * self.pitch + x as usize]
    }

    /// Borrow row `y`, excluding padding.
    #[inline]
    pub fn row(&self, y: u32) -> &[f32] {
        let start = y as usize * self.pitch;
        &self.data[start..start + self.width as usize]
    }

    /// Mutably borrow row `y`, excluding padding.
    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [f32] {
        let start = y as usize * self.pitch;
        &mut self.data[start..start + self.width as usize]
    }

    /// Borrow the full pitched storage.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutably borrow the full pitched storage.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Overwrites every element (including padding) with zero.
    pub fn zero_fill(&mut self) {
        self.data.fill(0.0);
    }
}

#[derive(Debug)]
struct PoolState {
    free: VecDeque<PitchedBuffer>,
    outstanding: usize,
    created: usize,
}

#[derive(Debug)]
struct PoolInner {
    device: usize,
    limit: usize,
    state: Mutex<PoolState>,
    returned: Condvar,
}

/// Counters describing the pool's current occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolDiagnostics {
    /// Buffers ever created by this pool.
    pub created: usize,
    /// Buffers currently handed out.
    pub outstanding: usize,
    /// Buffers waiting in the free list.
    pub free: usize,
    /// Maximum live buffers.
    pub limit: usize,
}

/// Per-device pool of [`PitchedBuffer`] allocations of one size class.
///
/// Cloning the pool clones a handle to the same shared state, so the
/// preloader and tests can watch the same counters.
#[derive(Clone)]
pub struct DevicePool {
    inner: Arc<PoolInner>,
}

impl DevicePool {
    /// Creates a pool for `device` holding at most `limit` buffers.
    /// Buffers are created lazily on first use.
    pub fn new(device: usize, limit: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                device,
                limit: limit.max(1),
                state: Mutex::new(PoolState {
                    free: VecDeque::new(),
                    outstanding: 0,
                    created: 0,
                }),
                returned: Condvar::new(),
            }),
        }
    }

    /// Hands out a `width` x `height` buffer, reusing a pooled one when a
    /// matching allocation is free. Blocks while `limit` buffers are
    /// outstanding; returns an error if a free buffer of the wrong shape
    /// would have to be thrown away (the pool serves one size class).
    pub fn allocate(&self, width: u32, height: u32) -> ComputeResult<PoolBuffer> {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(mut buf) = state.free.pop_front() {
                if buf.width() != width || buf.height() != height {
                    let shape = (buf.width(), buf.height());
                    state.free.push_front(buf);
                    return Err(ComputeError::AllocationFailed {
                        device: self.inner.device,
                        requested: width as usize * height as usize * 4,
                        reason: format!("pool holds {}x{} buffers", shape.0, shape.1),
                    });
                }
                buf.zero_fill();
                state.outstanding += 1;
                return Ok(self.wrap(buf));
            }
            if state.created < self.inner.limit {
                state.created += 1;
                state.outstanding += 1;
                tracing::debug!(
                    device = self.inner.device,
                    created = state.created,
                    limit = self.inner.limit,
                    "pool grows"
                );
                return Ok(self.wrap(PitchedBuffer::new(width, height)));
            }
            // At the limit: wait until a handle comes back.
            state = self
                .inner
                .returned
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Current occupancy counters.
    pub fn diagnostics(&self) -> PoolDiagnostics {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        PoolDiagnostics {
            created: state.created,
            outstanding: state.outstanding,
            free: state.free.len(),
            limit: self.inner.limit,
        }
    }

    fn wrap(&self, buf: PitchedBuffer) -> PoolBuffer {
        PoolBuffer {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Must never panic: pools are torn down during unwinding when a
        // pipeline fails.
        if let Ok(state) = self.state.get_mut() {
            if state.outstanding > 0 {
                tracing::error!(
                    device = self.device,
                    outstanding = state.outstanding,
                    "device pool dropped with buffers still outstanding"
                );
            }
        }
    }
}

/// An owning handle to a pooled buffer; returns the buffer to its pool on
/// drop.
#[derive(Debug)]
pub struct PoolBuffer {
    buf: Option<PitchedBuffer>,
    pool: Arc<PoolInner>,
}

impl std::ops::Deref for PoolBuffer {
    type Target = PitchedBuffer;

    fn deref(&self) -> &PitchedBuffer {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl std::ops::DerefMut for PoolBuffer {
    fn deref_mut(&mut self) -> &mut PitchedBuffer {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            let mut state = self
                .pool
                .state
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            state.free.push_back(buf);
            state.outstanding = state.outstanding.saturating_sub(1);
            drop(state);
            self.pool.returned.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pitched_rows() {
        let mut buf = PitchedBuffer::new(20, 4);
        assert_eq!(buf.pitch(), 32);
        buf.row_mut(1)[19] = 7.0;
        assert_eq!(buf.at(19, 1), 7.0);
        assert_eq!(buf.row(1).len(), 20);
    }

    #[test]
    fn test_reuse_without_reallocation() {
        let pool = DevicePool::new(0, 4);
        {
            let _a = pool.allocate(8, 8).unwrap();
            let _b = pool.allocate(8, 8).unwrap();
        }
        // Both buffers returned; the next two allocations must reuse them.
        let _c = pool.allocate(8, 8).unwrap();
        let _d = pool.allocate(8, 8).unwrap();
        assert_eq!(pool.diagnostics().created, 2);
    }

    #[test]
    fn test_recycled_buffers_are_zeroed() {
        let pool = DevicePool::new(0, 1);
        {
            let mut a = pool.allocate(4, 4).unwrap();
            a.row_mut(0)[0] = 5.0;
        }
        let b = pool.allocate(4, 4).unwrap();
        assert_eq!(b.at(0, 0), 0.0);
    }

    #[test]
    fn test_allocate_blocks_at_limit() {
        let pool = DevicePool::new(0, 1);
        let held = pool.allocate(4, 4).unwrap();

        let pool2 = pool.clone();
        let waiter = std::thread::spawn(move || {
            let _buf = pool2.allocate(4, 4).unwrap();
        });

        // The waiter cannot finish while the only buffer is held.
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        assert_eq!(pool.diagnostics().outstanding, 1);

        drop(held);
        waiter.join().unwrap();
        assert_eq!(pool.diagnostics().created, 1);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let pool = DevicePool::new(0, 2);
        drop(pool.allocate(8, 8).unwrap());
        assert!(pool.allocate(16, 8).is_err());
    }
}
