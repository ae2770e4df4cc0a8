//! Tag-keyed pool of reusable buffers.
//!
//! Callers check a buffer out with [`BufferPool::acquire`] and hand it back
//! with [`BufferPool::release`]. A released buffer keeps its allocation and is
//! handed out again for the same tag; it is only resized when the required
//! capacity differs from the one it was released with. Dropping the pool (or
//! calling [`BufferPool::clear`]) returns the memory to the system.
//!
//! The pool is not shared across threads. One unpack cycle owns it at a time.

use crate::tracked::{Resize, TrackedBuffer};
use crate::PoolError;
use std::collections::HashMap;
use std::hash::Hash;

/// Reuse counters for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Buffers handed out
    pub acquires: u64,
    /// Buffers handed back
    pub releases: u64,
    /// Acquires that required a new allocation
    pub reallocations: u64,
}

/// Spare buffers keyed by tag.
#[derive(Debug)]
pub struct BufferPool<K, T> {
    spares: HashMap<K, TrackedBuffer<T>>,
    metrics: PoolMetrics,
}

impl<K: Eq + Hash + Copy + std::fmt::Debug, T: Copy + Default> BufferPool<K, T> {
    /// Empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spares: HashMap::new(),
            metrics: PoolMetrics::default(),
        }
    }

    /// Check out the buffer for `tag`, sized to exactly `required` elements.
    ///
    /// If a spare exists for the tag and already has that capacity it is
    /// returned untouched. On allocation failure the spare stays in the pool.
    pub fn acquire(&mut self, tag: K, required: usize) -> Result<TrackedBuffer<T>, PoolError> {
        let mut buffer = self.spares.remove(&tag).unwrap_or_default();
        match buffer.ensure_capacity(required) {
            Ok(resize) => {
                self.metrics.acquires += 1;
                if resize == Resize::Reallocated {
                    self.metrics.reallocations += 1;
                }
                Ok(buffer)
            }
            Err(err) => {
                tracing::warn!(?tag, required, error = %err, "pool buffer could not be sized");
                self.spares.insert(tag, buffer);
                Err(err)
            }
        }
    }

    /// Hand a buffer back under `tag`, keeping its allocation.
    pub fn release(&mut self, tag: K, buffer: TrackedBuffer<T>) {
        self.metrics.releases += 1;
        self.spares.insert(tag, buffer);
    }

    /// Resize a buffer the caller already holds, counting any reallocation.
    pub fn resize(&mut self, buffer: &mut TrackedBuffer<T>, required: usize) -> Result<Resize, PoolError> {
        let resize = buffer.ensure_capacity(required)?;
        if resize == Resize::Reallocated {
            self.metrics.reallocations += 1;
        }
        Ok(resize)
    }

    /// Whether a spare is parked under `tag`.
    #[must_use]
    pub fn has_spare(&self, tag: &K) -> bool {
        self.spares.contains_key(tag)
    }

    /// Free every spare back to the system.
    pub fn clear(&mut self) {
        self.spares.clear();
    }

    /// Reuse counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.metrics
    }
}

impl<K: Eq + Hash + Copy + std::fmt::Debug, T: Copy + Default> Default for BufferPool<K, T> {
    fn default() -> Self {
        Self::new()
    }
}
