//! Latest-frame preview slot.
//!
//! The receiver publishes every frame it gets; readers see the most recent
//! one, whether or not it has reached the disk yet. Before the first frame a
//! reader may wait; afterwards the latest frame is always returned at once.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A received frame and its 0-based sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewFrame {
    /// Position in the stream
    pub sequence: u64,
    /// Raw frame bytes
    pub data: Bytes,
}

#[derive(Debug, Default)]
pub(crate) struct PreviewSlot {
    latest: Mutex<Option<PreviewFrame>>,
    published: Condvar,
}

impl PreviewSlot {
    pub(crate) fn publish(&self, sequence: u64, data: Bytes) {
        *self.latest.lock() = Some(PreviewFrame { sequence, data });
        self.published.notify_all();
    }

    /// Latest frame, waiting up to `timeout` only while none has arrived.
    pub(crate) fn latest(&self, timeout: Duration) -> Option<PreviewFrame> {
        let deadline = Instant::now() + timeout;
        let mut latest = self.latest.lock();
        while latest.is_none() {
            if self.published.wait_until(&mut latest, deadline).timed_out() {
                break;
            }
        }
        latest.clone()
    }

    pub(crate) fn clear(&self) {
        *self.latest.lock() = None;
    }
}
