use crate::error::CameraError;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// A JPEG still copied out of a platform buffer. Consumed once by the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub capture_id: u64,
    pub timestamp: SystemTime,
    bytes: Vec<u8>,
}

impl CapturedImage {
    pub fn new(capture_id: u64, timestamp: SystemTime, bytes: Vec<u8>) -> Self {
        Self {
            capture_id,
            timestamp,
            bytes,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when the bytes start with a JPEG start-of-image marker
    pub fn is_jpeg(&self) -> bool {
        self.bytes.starts_with(&[0xFF, 0xD8])
    }
}

/// One plane of a platform image
#[derive(Debug)]
pub struct ImagePlane {
    data: Vec<u8>,
}

impl ImagePlane {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }
}

/// Platform-owned image. Holds a slot of its [`ImagePool`] until dropped.
#[derive(Debug)]
pub struct ImageBuffer {
    capture_id: u64,
    timestamp: SystemTime,
    width: u32,
    height: u32,
    planes: Vec<ImagePlane>,
    _slot: OwnedSemaphorePermit,
}

impl ImageBuffer {
    pub fn capture_id(&self) -> u64 {
        self.capture_id
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn planes(&self) -> &[ImagePlane] {
        &self.planes
    }

    /// Copy the first plane out and give the buffer back to the pool
    pub fn into_captured(self) -> CapturedImage {
        let bytes = self
            .planes
            .first()
            .map(|plane| plane.data().to_vec())
            .unwrap_or_default();
        CapturedImage::new(self.capture_id, self.timestamp, bytes)
    }
}

/// Bounded pool of still image buffers, sized by `max_images`
#[derive(Debug, Clone)]
pub struct ImagePool {
    slots: Arc<Semaphore>,
    capacity: usize,
    resolution: (u32, u32),
}

impl ImagePool {
    pub fn new(capacity: usize, resolution: (u32, u32)) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            resolution,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// Number of buffers not currently held by a consumer
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wrap encoded bytes in a pooled buffer; fails when every slot is in use
    pub fn acquire(
        &self,
        capture_id: u64,
        timestamp: SystemTime,
        planes: Vec<ImagePlane>,
    ) -> Result<ImageBuffer, CameraError> {
        let slot = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::Closed => CameraError::CaptureAccess {
                    details: "image pool is closed".to_string(),
                },
                TryAcquireError::NoPermits => CameraError::PoolExhausted {
                    capacity: self.capacity,
                },
            })?;

        Ok(ImageBuffer {
            capture_id,
            timestamp,
            width: self.resolution.0,
            height: self.resolution.1,
            planes,
            _slot: slot,
        })
    }

    /// Stop handing out buffers
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_slot_released_after_copy() {
        let pool = ImagePool::new(2, (640, 480));
        let buffer = pool
            .acquire(
                1,
                SystemTime::now(),
                vec![ImagePlane::new(vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9])],
            )
            .unwrap();
        assert_eq!(pool.available(), 1);
        assert_eq!(buffer.dimensions(), (640, 480));

        let remaining = buffer.planes()[0].remaining();
        let image = buffer.into_captured();
        assert_eq!(pool.available(), 2);
        assert_eq!(image.len(), remaining);
        assert!(image.is_jpeg());
    }

    #[test]
    fn test_pool_exhaustion() {
        let pool = ImagePool::new(1, (320, 240));
        let held = pool
            .acquire(1, SystemTime::now(), vec![ImagePlane::new(vec![1])])
            .unwrap();

        let err = pool
            .acquire(2, SystemTime::now(), vec![ImagePlane::new(vec![2])])
            .unwrap_err();
        assert_eq!(err, CameraError::PoolExhausted { capacity: 1 });

        drop(held);
        assert!(pool
            .acquire(3, SystemTime::now(), vec![ImagePlane::new(vec![3])])
            .is_ok());
    }

    #[test]
    fn test_only_first_plane_is_copied() {
        let pool = ImagePool::new(1, (2, 2));
        let buffer = pool
            .acquire(
                7,
                SystemTime::now(),
                vec![ImagePlane::new(vec![1, 2, 3]), ImagePlane::new(vec![9; 10])],
            )
            .unwrap();
        let image = buffer.into_captured();
        assert_eq!(image.bytes(), &[1, 2, 3]);
        assert_eq!(image.capture_id, 7);
    }

    #[test]
    fn test_closed_pool_refuses_buffers() {
        let pool = ImagePool::new(2, (2, 2));
        let held = pool
            .acquire(1, SystemTime::now(), vec![ImagePlane::new(vec![1])])
            .unwrap();

        pool.close();
        assert!(pool.is_closed());
        let err = pool
            .acquire(2, SystemTime::now(), vec![ImagePlane::new(vec![2])])
            .unwrap_err();
        assert!(matches!(err, CameraError::CaptureAccess { .. }));

        // Buffers handed out before the close can still be copied
        assert_eq!(held.into_captured().bytes(), &[1]);
    }
}
