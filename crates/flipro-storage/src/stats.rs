//! Stream throughput statistics.
//!
//! The receiver and the persister update separate atomic counters; readers
//! take a [`StreamStatistics`] snapshot at any time. A snapshot is not atomic
//! across fields, but every counter is monotonic within one stream.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Coarse stream state reported alongside the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Stopped because of an error
    Failed,
    /// Not streaming
    Stopped,
    /// Frames are being received or written
    Streaming,
}

impl StreamStatus {
    /// Numeric form: -1 failed, 0 stopped, 1 streaming.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            StreamStatus::Failed => -1,
            StreamStatus::Stopped => 0,
            StreamStatus::Streaming => 1,
        }
    }

    fn from_code(code: i32) -> Self {
        match code {
            c if c < 0 => StreamStatus::Failed,
            0 => StreamStatus::Stopped,
            _ => StreamStatus::Streaming,
        }
    }

    /// Whether the stream ended in a fatal error.
    #[must_use]
    pub fn is_failed(self) -> bool {
        self == StreamStatus::Failed
    }
}

/// Snapshot of one stream's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStatistics {
    /// Frames received from the camera
    pub frames_received: u32,
    /// Bytes received from the camera
    pub bytes_received: u64,
    /// Frames completely written to disk
    pub disk_frames_written: u32,
    /// Bytes completely written to disk
    pub disk_bytes_written: u64,
    /// Bytes written over total write time, in MiB/s
    pub avg_disk_mbps: f64,
    /// Fastest single-frame write, in MiB/s
    pub peak_disk_mbps: f64,
    /// Stream state
    pub status: StreamStatus,
    /// Message of the error that failed the stream
    pub last_error: Option<String>,
}

impl StreamStatistics {
    /// Frames received but not (yet) on disk.
    #[must_use]
    pub fn pending_frames(&self) -> u32 {
        self.frames_received.saturating_sub(self.disk_frames_written)
    }
}

/// Shared counters behind [`StreamStatistics`].
#[derive(Debug)]
pub(crate) struct StatsRecorder {
    frames_received: AtomicU32,
    bytes_received: AtomicU64,
    frames_written: AtomicU32,
    bytes_written: AtomicU64,
    write_nanos: AtomicU64,
    // Non-negative f64 bit patterns order the same as their values
    peak_mbps_bits: AtomicU64,
    status: AtomicI32,
    frozen: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl StatsRecorder {
    pub(crate) fn new() -> Self {
        Self {
            frames_received: AtomicU32::new(0),
            bytes_received: AtomicU64::new(0),
            frames_written: AtomicU32::new(0),
            bytes_written: AtomicU64::new(0),
            write_nanos: AtomicU64::new(0),
            peak_mbps_bits: AtomicU64::new(0),
            status: AtomicI32::new(StreamStatus::Stopped.code()),
            frozen: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// Zero everything and mark the stream running.
    pub(crate) fn reset(&self) {
        self.frames_received.store(0, Ordering::SeqCst);
        self.bytes_received.store(0, Ordering::SeqCst);
        self.frames_written.store(0, Ordering::SeqCst);
        self.bytes_written.store(0, Ordering::SeqCst);
        self.write_nanos.store(0, Ordering::SeqCst);
        self.peak_mbps_bits.store(0, Ordering::SeqCst);
        *self.last_error.lock() = None;
        self.status.store(StreamStatus::Streaming.code(), Ordering::SeqCst);
        self.frozen.store(false, Ordering::SeqCst);
    }

    fn frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub(crate) fn record_received(&self, bytes: usize) -> u32 {
        if self.frozen() {
            return self.frames_received.load(Ordering::SeqCst);
        }
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.frames_received.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Count a completed write; returns frames written so far.
    pub(crate) fn record_written(&self, bytes: usize, elapsed: Duration) -> u32 {
        if self.frozen() {
            return self.frames_written.load(Ordering::SeqCst);
        }
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX).max(1);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        self.write_nanos.fetch_add(nanos, Ordering::Relaxed);

        let mbps = bytes as f64 / BYTES_PER_MB / (nanos as f64 / 1e9);
        self.peak_mbps_bits.fetch_max(mbps.to_bits(), Ordering::Relaxed);
        self.frames_written.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark the stream failed, keeping the first error message.
    pub(crate) fn fail(&self, message: String) {
        if self.frozen() {
            return;
        }
        let mut last = self.last_error.lock();
        if last.is_none() {
            *last = Some(message);
        }
        self.status.store(StreamStatus::Failed.code(), Ordering::SeqCst);
    }

    /// Every requested frame is on disk.
    pub(crate) fn complete(&self) {
        if self.frozen() {
            return;
        }
        let _ = self.status.compare_exchange(
            StreamStatus::Streaming.code(),
            StreamStatus::Stopped.code(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Stop counting. A running stream reads as stopped; a failure stays failed.
    pub(crate) fn freeze(&self) {
        self.complete();
        self.frozen.store(true, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self) -> StreamStatistics {
        let bytes_written = self.bytes_written.load(Ordering::Relaxed);
        let write_secs = self.write_nanos.load(Ordering::Relaxed) as f64 / 1e9;
        let avg_disk_mbps = if write_secs > 0.0 {
            bytes_written as f64 / BYTES_PER_MB / write_secs
        } else {
            0.0
        };
        StreamStatistics {
            frames_received: self.frames_received.load(Ordering::SeqCst),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            disk_frames_written: self.frames_written.load(Ordering::SeqCst),
            disk_bytes_written: bytes_written,
            avg_disk_mbps,
            peak_disk_mbps: f64::from_bits(self.peak_mbps_bits.load(Ordering::Relaxed)),
            status: StreamStatus::from_code(self.status.load(Ordering::SeqCst)),
            last_error: self.last_error.lock().clone(),
        }
    }
}
