//! Per-projection execution contexts.
//!
//! Each projection carries a [`Stream`] through the pipeline so kernel
//! launches can stay asynchronous and only the critical hand-offs
//! synchronize. On the host backend kernels execute eagerly on the
//! launching stage thread; a kernel failure is recorded on the stream and
//! surfaces at the next [`Stream::synchronize`], mirroring how
//! asynchronous accelerator errors are reported.

use std::sync::{Arc, Mutex};

use crate::{ComputeError, ComputeResult};

/// An opaque execution context bound to one device.
///
/// Streams are cheap to clone; clones share the pending-error slot.
#[derive(Clone)]
pub struct Stream {
    device: usize,
    pending: Arc<Mutex<Option<ComputeError>>>,
}

impl Stream {
    /// Creates a new concurrent stream on `device`.
    pub fn new(device: usize) -> Self {
        Self {
            device,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Device this stream belongs to.
    #[inline]
    pub fn device(&self) -> usize {
        self.device
    }

    /// Records a deferred kernel error; kept until the next
    /// synchronization. The first error wins.
    pub fn record_error(&self, err: ComputeError) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.is_none() {
            *pending = Some(err);
        }
    }

    /// Blocks until all work queued on this stream has finished and
    /// reports any deferred kernel error.
    pub fn synchronize(&self) -> ComputeResult<()> {
        match self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("device", &self.device).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synchronize_clean_stream() {
        let stream = Stream::new(0);
        assert!(stream.synchronize().is_ok());
    }

    #[test]
    fn test_deferred_error_surfaces_once() {
        let stream = Stream::new(1);
        stream.record_error(ComputeError::kernel("weighting", "boom"));
        stream.record_error(ComputeError::kernel("filter", "later"));

        let err = stream.synchronize().unwrap_err();
        assert!(err.to_string().contains("weighting"));
        // Consumed by the first synchronize.
        assert!(stream.synchronize().is_ok());
    }
}
