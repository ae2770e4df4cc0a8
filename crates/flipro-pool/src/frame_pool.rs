//! Fixed set of raw frame buffers that freeze into `bytes::Bytes`.
//!
//! The stream engine receives frames into [`PooledFrame`]s, freezes them into
//! [`Bytes`] and passes them to the persister and the preview slot. When the
//! last `Bytes` clone drops, the buffer goes back to the pool. The pool size
//! therefore bounds how many frames can be in flight between the receive
//! path and the disk.
//!
//! ```text
//! 1. FramePool pre-allocates N frame-sized buffers
//! 2. try_acquire() hands out a PooledFrame (never blocks)
//! 3. the device transfer fills as_mut_slice(); set_len() records the size
//! 4. freeze() wraps the buffer in Bytes without copying
//! 5. dropping the last Bytes clone returns the buffer
//! ```

use crate::PoolError;
use bytes::Bytes;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

struct FramePoolInner {
    free_buffers: SegQueue<Vec<u8>>,
    semaphore: Semaphore,
    frame_bytes: usize,
    pool_size: usize,
    available: AtomicUsize,
    total_acquires: AtomicU64,
    total_returns: AtomicU64,
}

impl FramePoolInner {
    fn give_back(&self, buffer: Vec<u8>) {
        self.free_buffers.push(buffer);
        self.available.fetch_add(1, Ordering::Relaxed);
        self.total_returns.fetch_add(1, Ordering::Relaxed);
        self.semaphore.add_permits(1);
    }
}

/// Pool of pre-allocated raw frame buffers.
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<FramePoolInner>,
}

impl FramePool {
    /// Allocate `pool_size` buffers of `frame_bytes` bytes each.
    pub fn new(pool_size: usize, frame_bytes: usize) -> Result<Self, PoolError> {
        if pool_size == 0 || frame_bytes == 0 {
            return Err(PoolError::EmptyPool {
                pool_size,
                frame_bytes,
            });
        }

        let free_buffers = SegQueue::new();
        for _ in 0..pool_size {
            let mut buffer = Vec::new();
            buffer
                .try_reserve_exact(frame_bytes)
                .map_err(|_| PoolError::AllocationFailed {
                    requested: frame_bytes,
                    element_bytes: 1,
                })?;
            buffer.resize(frame_bytes, 0);
            free_buffers.push(buffer);
        }

        info!(
            pool_size,
            frame_mb = frame_bytes as f64 / (1024.0 * 1024.0),
            total_mb = (pool_size * frame_bytes) as f64 / (1024.0 * 1024.0),
            "FramePool created"
        );

        Ok(Self {
            inner: Arc::new(FramePoolInner {
                free_buffers,
                semaphore: Semaphore::new(pool_size),
                frame_bytes,
                pool_size,
                available: AtomicUsize::new(pool_size),
                total_acquires: AtomicU64::new(0),
                total_returns: AtomicU64::new(0),
            }),
        })
    }

    /// Take a buffer without blocking; `None` means every buffer is in flight.
    #[must_use]
    pub fn try_acquire(&self) -> Option<PooledFrame> {
        let permit = self.inner.semaphore.try_acquire().ok()?;
        let buffer = self.inner.free_buffers.pop()?;

        self.inner.available.fetch_sub(1, Ordering::Relaxed);
        self.inner.total_acquires.fetch_add(1, Ordering::Relaxed);

        // Re-added when the buffer comes back
        permit.forget();

        Some(PooledFrame {
            buffer: Some(buffer),
            len: 0,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Buffers not currently handed out.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.available.load(Ordering::Relaxed)
    }

    /// Total buffers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.pool_size
    }

    /// Bytes per buffer.
    #[must_use]
    pub fn frame_bytes(&self) -> usize {
        self.inner.frame_bytes
    }

    /// Acquisitions since creation.
    #[must_use]
    pub fn total_acquires(&self) -> u64 {
        self.inner.total_acquires.load(Ordering::Relaxed)
    }

    /// Returns since creation.
    #[must_use]
    pub fn total_returns(&self) -> u64 {
        self.inner.total_returns.load(Ordering::Relaxed)
    }
}

/// A frame buffer checked out of a [`FramePool`].
pub struct PooledFrame {
    buffer: Option<Vec<u8>>,
    len: usize,
    pool: Arc<FramePoolInner>,
}

impl PooledFrame {
    /// Whole buffer for the device transfer to fill.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or_default()
    }

    /// Valid bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.buffer {
            Some(buf) => &buf[..self.len],
            None => &[],
        }
    }

    /// Buffer size in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, Vec::len)
    }

    /// Valid byte count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record how many bytes the transfer wrote.
    pub fn set_len(&mut self, len: usize) -> Result<(), PoolError> {
        let capacity = self.capacity();
        if len > capacity {
            return Err(PoolError::LengthOutOfRange { len, capacity });
        }
        self.len = len;
        Ok(())
    }

    /// Wrap the valid bytes in `Bytes` without copying.
    #[must_use]
    pub fn freeze(mut self) -> Bytes {
        match self.buffer.take() {
            Some(buffer) => Bytes::from_owner(FrameOwner {
                buffer,
                len: self.len,
                pool: Arc::clone(&self.pool),
            }),
            None => Bytes::new(),
        }
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.give_back(buffer);
        }
    }
}

struct FrameOwner {
    buffer: Vec<u8>,
    len: usize,
    pool: Arc<FramePoolInner>,
}

impl AsRef<[u8]> for FrameOwner {
    fn as_ref(&self) -> &[u8] {
        &self.buffer[..self.len]
    }
}

impl Drop for FrameOwner {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_pool_creation() {
        let pool = FramePool::new(4, 1024).unwrap();
        assert_eq!(pool.size(), 4);
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.frame_bytes(), 1024);
        assert!(FramePool::new(0, 1024).is_err());
    }

    #[test]
    fn test_try_acquire_exhausts() {
        let pool = FramePool::new(2, 64).unwrap();

        let a = pool.try_acquire();
        let b = pool.try_acquire();
        assert!(a.is_some() && b.is_some());
        assert!(pool.try_acquire().is_none());

        drop(a);
        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn test_fill_and_freeze() {
        let pool = FramePool::new(1, 16).unwrap();
        let mut frame = pool.try_acquire().unwrap();
        assert_eq!(frame.as_mut_slice().len(), 16);
        frame.as_mut_slice()[..5].copy_from_slice(b"hello");
        frame.set_len(5).unwrap();

        let bytes = frame.freeze();
        assert_eq!(bytes.as_ref(), b"hello");
        assert_eq!(pool.available(), 0);

        let clone = bytes.clone();
        drop(bytes);
        assert_eq!(pool.available(), 0);
        drop(clone);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.total_returns(), 1);
    }

    #[test]
    fn test_returned_buffer_keeps_full_length() {
        let pool = FramePool::new(1, 32).unwrap();
        let mut frame = pool.try_acquire().unwrap();
        frame.set_len(4).unwrap();
        drop(frame.freeze());

        let mut again = pool.try_acquire().unwrap();
        assert_eq!(again.as_mut_slice().len(), 32);
        assert!(again.is_empty());
    }

    #[test]
    fn test_set_len_out_of_range() {
        let pool = FramePool::new(1, 8).unwrap();
        let mut frame = pool.try_acquire().unwrap();
        assert!(matches!(
            frame.set_len(9),
            Err(PoolError::LengthOutOfRange { len: 9, capacity: 8 })
        ));
    }
}
