//! Bounded pool of frame buffers.
//!
//! A pool of N permits caps how many frames are alive at once. Producers call
//! one of the `wrap*` methods per incoming buffer; when every permit is out the
//! buffer is refused rather than queued, so a stalled consumer never makes the
//! camera side block.

use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::frame::{nv21_to_rgb, yuyv_to_rgb, Frame, FrameError};

#[derive(Clone)]
pub struct FramePool {
    permits: Arc<Semaphore>,
    capacity: usize,
    sequence: Arc<AtomicU64>,
}

impl FramePool {
    /// A pool holding at most `capacity` live frames (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Lease a slot for an already-decoded RGB image.
    pub fn wrap(&self, image: RgbImage, rotation_degrees: i32) -> Result<Frame, FrameError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroSized { width, height });
        }
        let lease = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| FrameError::PoolExhausted {
                capacity: self.capacity,
            })?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(sequence, width, height, rotation_degrees, "frame leased");
        Ok(Frame::new(image, rotation_degrees, sequence, lease))
    }

    pub fn wrap_nv21(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        rotation_degrees: i32,
    ) -> Result<Frame, FrameError> {
        self.wrap(nv21_to_rgb(data, width, height)?, rotation_degrees)
    }

    pub fn wrap_yuyv(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        rotation_degrees: i32,
    ) -> Result<Frame, FrameError> {
        self.wrap(yuyv_to_rgb(data, width, height)?, rotation_degrees)
    }
}
