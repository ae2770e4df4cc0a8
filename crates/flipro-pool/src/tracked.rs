//! Owned buffer with a tracked capacity.
//!
//! [`TrackedBuffer::ensure_capacity`] is the one place a reallocation is
//! decided. If the requested capacity equals the recorded one the allocation
//! is returned untouched; otherwise a new allocation of exactly that size
//! replaces it. A failed allocation leaves the existing buffer and its
//! contents in place.

use crate::PoolError;

/// Outcome of [`TrackedBuffer::ensure_capacity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resize {
    /// Capacity already matched; nothing changed.
    Reused,
    /// A new allocation of the requested size replaced the old one.
    Reallocated,
}

/// A `Vec<T>` whose size only changes through [`TrackedBuffer::ensure_capacity`].
#[derive(Debug, Default)]
pub struct TrackedBuffer<T> {
    data: Vec<T>,
    reallocations: u64,
}

impl<T: Copy + Default> TrackedBuffer<T> {
    /// Empty buffer with zero capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            reallocations: 0,
        }
    }

    /// Buffer of `capacity` default-initialized elements.
    pub fn with_capacity(capacity: usize) -> Result<Self, PoolError> {
        let mut buffer = Self::new();
        buffer.ensure_capacity(capacity)?;
        Ok(buffer)
    }

    /// Make the buffer hold exactly `capacity` elements.
    ///
    /// Contents are kept when the capacity already matches. A new allocation is
    /// default-initialized.
    pub fn ensure_capacity(&mut self, capacity: usize) -> Result<Resize, PoolError> {
        if capacity == self.data.len() {
            return Ok(Resize::Reused);
        }
        let mut fresh = Vec::new();
        fresh
            .try_reserve_exact(capacity)
            .map_err(|_| PoolError::AllocationFailed {
                requested: capacity,
                element_bytes: std::mem::size_of::<T>(),
            })?;
        fresh.resize(capacity, T::default());
        self.data = fresh;
        self.reallocations += 1;
        tracing::trace!(
            capacity,
            reallocations = self.reallocations,
            "tracked buffer reallocated"
        );
        Ok(Resize::Reallocated)
    }

    /// Overwrite every element with `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<T> TrackedBuffer<T> {
    /// Recorded capacity in elements.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Whether the capacity is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reallocations since the buffer was created.
    #[must_use]
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Address of the allocation, for identity checks.
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.data.as_ptr()
    }

    /// All elements.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// All elements, mutable.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_capacity_reuses_allocation() {
        let mut buf = TrackedBuffer::<u16>::with_capacity(64).unwrap();
        buf.as_mut_slice()[3] = 42;
        let ptr = buf.as_ptr();

        assert_eq!(buf.ensure_capacity(64).unwrap(), Resize::Reused);
        assert_eq!(buf.as_ptr(), ptr);
        assert_eq!(buf.as_slice()[3], 42);
        assert_eq!(buf.reallocations(), 1);
    }

    #[test]
    fn test_capacity_change_reallocates_once() {
        let mut buf = TrackedBuffer::<u16>::with_capacity(64).unwrap();
        assert_eq!(buf.ensure_capacity(128).unwrap(), Resize::Reallocated);
        assert_eq!(buf.ensure_capacity(128).unwrap(), Resize::Reused);
        assert_eq!(buf.capacity(), 128);
        assert_eq!(buf.reallocations(), 2);
    }

    #[test]
    fn test_shrink_is_explicit() {
        let mut buf = TrackedBuffer::<u8>::with_capacity(100).unwrap();
        assert_eq!(buf.ensure_capacity(10).unwrap(), Resize::Reallocated);
        assert_eq!(buf.capacity(), 10);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_failed_allocation_keeps_contents() {
        let mut buf = TrackedBuffer::<u64>::with_capacity(4).unwrap();
        buf.fill(9);
        let err = buf.ensure_capacity(usize::MAX / 2).unwrap_err();
        assert!(matches!(
            err,
            PoolError::AllocationFailed {
                element_bytes: 8,
                ..
            }
        ));
        assert_eq!(buf.as_slice(), &[9, 9, 9, 9]);
    }
}
