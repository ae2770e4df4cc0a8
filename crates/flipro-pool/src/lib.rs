//! Buffer reuse for frame acquisition.
//!
//! - [`TrackedBuffer`]: an owned buffer whose capacity only changes through
//!   [`TrackedBuffer::ensure_capacity`], so steady-state capture never
//!   allocates.
//! - [`BufferPool`]: spare tracked buffers keyed by a caller tag (raw frame,
//!   plane, histogram), released back instead of freed.
//! - [`FramePool`]: a fixed number of frame-sized buffers that freeze into
//!   `bytes::Bytes`, bounding memory between a receiver and a writer.

pub mod buffer_pool;
pub mod frame_pool;
pub mod tracked;

pub use buffer_pool::{BufferPool, PoolMetrics};
pub use frame_pool::{FramePool, PooledFrame};
pub use tracked::{Resize, TrackedBuffer};

use flipro_core::ErrorCategory;
use thiserror::Error;

/// Buffer sizing failures. Always a resource error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The allocator refused the request.
    #[error("Could not allocate a buffer of {requested} elements ({element_bytes} bytes each)")]
    AllocationFailed {
        /// Capacity that could not be obtained
        requested: usize,
        /// Size of one element
        element_bytes: usize,
    },

    /// A frame pool needs at least one non-empty buffer.
    #[error("Frame pool needs at least one buffer of at least one byte (got {pool_size} x {frame_bytes})")]
    EmptyPool {
        /// Requested buffer count
        pool_size: usize,
        /// Requested buffer size
        frame_bytes: usize,
    },

    /// A recorded length exceeds the buffer.
    #[error("Length {len} exceeds buffer capacity {capacity}")]
    LengthOutOfRange {
        /// Requested length
        len: usize,
        /// Buffer capacity
        capacity: usize,
    },
}

impl PoolError {
    /// Sizing failures are resource errors.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Resource
    }
}
