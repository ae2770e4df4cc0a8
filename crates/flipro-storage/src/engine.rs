//! Stream engine: camera to disk at frame rate.
//!
//! ```text
//! camera ──► receiver thread ──► bounded queue ──► persister thread ──► FrameSink
//!                  │
//!                  └──► preview slot (latest frame)
//! ```
//!
//! The receiver owns the capture sequence on its own thread and never blocks
//! on the disk: every frame goes into a buffer from a fixed [`FramePool`] and
//! is handed over with a non-blocking send. If the persister falls behind by
//! more than the queue depth the stream fails; frames are never dropped
//! silently. The persister writes frames in order and stops counting the
//! moment the stream is stopped.
//!
//! Lifecycle:
//!
//! ```text
//! Uninitialized ── init ──► Initialized ── start ──► Streaming
//!       ▲                        ▲   │                   │
//!       └──────── deinit ────────┘   └◄────── stop ──────┘
//! ```

use crate::error::{Result, StreamError};
use crate::preview::{PreviewFrame, PreviewSlot};
use crate::sink::{DiskSinkFactory, FrameSink, SinkFactory, StreamTarget, WriteOutcome};
use crate::stats::{StatsRecorder, StreamStatistics};
use bytes::Bytes;
use flipro_capture::{CaptureController, CaptureError, CaptureState};
use flipro_core::text::{DevicePath, UsbString};
use flipro_core::LogContext;
use flipro_pool::FramePool;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// Buffers beyond the queue depth: one being received, one being written and
/// one held by the preview slot.
const POOL_HEADROOM: usize = 3;

/// Tuning for the receive and persist paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Frames allowed between receiver and persister
    pub queue_depth: usize,
    /// Bytes per disk write call
    pub write_chunk_bytes: usize,
    /// Frame file extension, without the dot
    pub file_extension: String,
    /// Zero padding of frame file sequence numbers
    pub sequence_digits: usize,
    /// Added to the frame interval to form the per-frame receive timeout
    pub receive_slack: Duration,
    /// Receive timeouts in a row tolerated before the stream fails
    pub max_consecutive_timeouts: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_depth: 8,
            write_chunk_bytes: 1024 * 1024,
            file_extension: "raw".to_string(),
            sequence_digits: 8,
            receive_slack: Duration::from_millis(1000),
            max_consecutive_timeouts: 3,
        }
    }
}

/// Engine lifecycle position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// No frame size or target
    Uninitialized,
    /// Ready to start
    Initialized,
    /// Worker threads running
    Streaming,
}

struct QueuedFrame {
    sequence: u64,
    data: Bytes,
}

/// State shared with the worker threads.
struct Shared {
    stats: StatsRecorder,
    preview: PreviewSlot,
    stop: AtomicBool,
    fatal: Mutex<Option<String>>,
}

impl Shared {
    fn fail(&self, err: &StreamError) {
        error!(error = %err, category = %err.category(), "stream failed");
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(err.to_string());
        }
        self.stats.fail(err.to_string());
        self.stop.store(true, Ordering::SeqCst);
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

struct Workers {
    receiver: JoinHandle<()>,
    persister: JoinHandle<()>,
}

struct Prepared {
    target: StreamTarget,
    pool: FramePool,
}

struct Inner {
    phase: EnginePhase,
    prepared: Option<Prepared>,
    workers: Option<Workers>,
}

/// Streams frames from a capture controller to a frame sink.
pub struct StreamEngine {
    controller: Arc<CaptureController>,
    config: StreamConfig,
    sinks: Arc<dyn SinkFactory>,
    shared: Arc<Shared>,
    inner: Mutex<Inner>,
    log: LogContext,
}

impl StreamEngine {
    /// Engine writing one file per frame.
    #[must_use]
    pub fn new(controller: Arc<CaptureController>, config: StreamConfig, log: LogContext) -> Self {
        Self::with_sink_factory(controller, config, Arc::new(DiskSinkFactory), log)
    }

    /// Engine writing through a custom sink.
    #[must_use]
    pub fn with_sink_factory(
        controller: Arc<CaptureController>,
        config: StreamConfig,
        sinks: Arc<dyn SinkFactory>,
        log: LogContext,
    ) -> Self {
        Self {
            controller,
            config,
            sinks,
            shared: Arc::new(Shared {
                stats: StatsRecorder::new(),
                preview: PreviewSlot::default(),
                stop: AtomicBool::new(false),
                fatal: Mutex::new(None),
            }),
            inner: Mutex::new(Inner {
                phase: EnginePhase::Uninitialized,
                prepared: None,
                workers: None,
            }),
            log,
        }
    }

    /// Current lifecycle position.
    #[must_use]
    pub fn phase(&self) -> EnginePhase {
        self.inner.lock().phase
    }

    /// Fix the frame size and output location.
    ///
    /// Allocates the frame pool up front: `queue_depth` plus headroom buffers
    /// of exactly `frame_bytes` each.
    pub fn init(&self, frame_bytes: usize, root: impl AsRef<Path>, prefix: &str) -> Result<()> {
        let _log = self.log.enter();
        let mut inner = self.inner.lock();
        if inner.phase != EnginePhase::Uninitialized {
            return Err(StreamError::AlreadyInitialized);
        }
        if frame_bytes == 0 {
            return Err(StreamError::InvalidFrameSize);
        }

        let root = root.as_ref();
        let target = StreamTarget {
            root: DevicePath::non_empty("stream root", root.to_string_lossy())?,
            prefix: UsbString::new("file prefix", prefix)?,
            frame_bytes,
            extension: self.config.file_extension.clone(),
            sequence_digits: self.config.sequence_digits,
            write_chunk_bytes: self.config.write_chunk_bytes,
        };
        std::fs::create_dir_all(root).map_err(|source| StreamError::InvalidRoot {
            path: root.to_path_buf(),
            source,
        })?;
        let pool = FramePool::new(self.config.queue_depth.max(1) + POOL_HEADROOM, frame_bytes)?;

        info!(
            frame_bytes,
            root = %root.display(),
            prefix,
            pool_frames = pool.size(),
            "stream initialized"
        );
        inner.prepared = Some(Prepared { target, pool });
        inner.phase = EnginePhase::Initialized;
        Ok(())
    }

    /// Begin streaming `frame_count` frames; 0 streams until stopped.
    ///
    /// `interval` is the expected time between frames (exposure plus delay)
    /// and only shapes the receive timeout. Statistics reset here; the
    /// previous run's preview stays available until a new frame replaces it.
    pub fn start(&self, frame_count: u32, interval: Duration) -> Result<()> {
        let _log = self.log.enter();
        let mut inner = self.inner.lock();
        match inner.phase {
            EnginePhase::Uninitialized => return Err(StreamError::NotInitialized),
            EnginePhase::Streaming => return Err(StreamError::AlreadyStreaming),
            EnginePhase::Initialized => {}
        }
        if let Some(reason) = self.shared.fatal.lock().clone() {
            return Err(StreamError::RequiresReinitialize { reason });
        }
        let Some(prepared) = inner.prepared.as_ref() else {
            return Err(StreamError::NotInitialized);
        };

        let plan = self
            .controller
            .plan()
            .ok_or(CaptureError::GeometryNotConfigured)?;
        let actual = plan.geometry.total_bytes();
        if actual != prepared.target.frame_bytes {
            return Err(StreamError::FrameSizeMismatch {
                initialized: prepared.target.frame_bytes,
                actual,
            });
        }
        let state = self.controller.state();
        if state != CaptureState::Idle {
            return Err(CaptureError::InvalidState {
                operation: "StreamStart",
                state,
            }
            .into());
        }

        let sink = self.sinks.open(&prepared.target)?;
        let pool = prepared.pool.clone();
        let frame_timeout = interval.max(plan.exposure.frame_interval()) + self.config.receive_slack;

        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.stats.reset();

        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));

        let persister = {
            let shared = Arc::clone(&self.shared);
            let controller = Arc::clone(&self.controller);
            let log = self.log.clone();
            thread::Builder::new()
                .name("flipro-stream-disk".into())
                .spawn(move || {
                    let _log = log.enter();
                    persist(&shared, &controller, sink, rx, frame_count);
                })
                .map_err(StreamError::Spawn)?
        };

        let receiver = {
            let shared = Arc::clone(&self.shared);
            let controller = Arc::clone(&self.controller);
            let log = self.log.clone();
            let receiver = Receiver {
                queue_depth: self.config.queue_depth.max(1),
                max_timeouts: self.config.max_consecutive_timeouts,
                frame_timeout,
                frame_count,
            };
            thread::Builder::new()
                .name("flipro-stream-rx".into())
                .spawn(move || {
                    let _log = log.enter();
                    receiver.run(&shared, &controller, &pool, tx);
                })
        };
        let receiver = match receiver {
            Ok(handle) => handle,
            Err(err) => {
                // The sender went down with the closure, so the persister exits
                self.shared.stop.store(true, Ordering::SeqCst);
                self.shared.stats.freeze();
                join_worker("persister", persister);
                return Err(StreamError::Spawn(err));
            }
        };

        info!(
            frame_count,
            frame_bytes = actual,
            timeout_ms = frame_timeout.as_millis() as u64,
            "stream started"
        );
        inner.workers = Some(Workers {
            receiver,
            persister,
        });
        inner.phase = EnginePhase::Streaming;
        Ok(())
    }

    /// Stop streaming and wait for both threads.
    ///
    /// Statistics freeze at this point: a frame still being written is lost
    /// and never counted. Stopping a stream that is not running is a no-op.
    pub fn stop(&self) -> Result<()> {
        let _log = self.log.enter();
        let mut inner = self.inner.lock();
        let Some(workers) = inner.workers.take() else {
            return Ok(());
        };

        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.stats.freeze();
        if let Err(err) = self.controller.capture_abort() {
            debug!(error = %err, "no exposure to abort at stream stop");
        }
        join_worker("receiver", workers.receiver);
        join_worker("persister", workers.persister);

        inner.phase = EnginePhase::Initialized;
        let stats = self.shared.stats.snapshot();
        info!(
            received = stats.frames_received,
            written = stats.disk_frames_written,
            status = stats.status.code(),
            "stream stopped"
        );
        Ok(())
    }

    /// Release the frame pool and return to uninitialized, stopping first if needed.
    pub fn deinit(&self) -> Result<()> {
        self.stop()?;
        let _log = self.log.enter();
        let mut inner = self.inner.lock();
        if inner.phase == EnginePhase::Uninitialized {
            return Err(StreamError::NotInitialized);
        }
        inner.prepared = None;
        inner.phase = EnginePhase::Uninitialized;
        *self.shared.fatal.lock() = None;
        self.shared.preview.clear();
        info!("stream deinitialized");
        Ok(())
    }

    /// Current counters; safe to call at any time from any thread.
    #[must_use]
    pub fn statistics(&self) -> StreamStatistics {
        self.shared.stats.snapshot()
    }

    /// Copy the most recently received frame into `buf`.
    ///
    /// Returns the frame size, or `Ok(0)` when no frame arrived within
    /// `timeout`. Once any frame has arrived the latest one is returned
    /// immediately, even if it was returned before.
    pub fn get_preview_image(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let required = self.prepared_frame_bytes()?;
        if buf.len() < required {
            return Err(StreamError::BufferTooSmall {
                required,
                provided: buf.len(),
            });
        }
        match self.shared.preview.latest(timeout) {
            Some(frame) => {
                let len = frame.data.len();
                buf[..len].copy_from_slice(&frame.data);
                Ok(len)
            }
            None => Ok(0),
        }
    }

    /// The most recently received frame without copying, if any.
    pub fn preview_frame(&self, timeout: Duration) -> Result<Option<PreviewFrame>> {
        self.prepared_frame_bytes()?;
        Ok(self.shared.preview.latest(timeout))
    }

    /// Target of the current initialization.
    #[must_use]
    pub fn target(&self) -> Option<StreamTarget> {
        self.inner.lock().prepared.as_ref().map(|p| p.target.clone())
    }

    fn prepared_frame_bytes(&self) -> Result<usize> {
        self.inner
            .lock()
            .prepared
            .as_ref()
            .map(|p| p.target.frame_bytes)
            .ok_or(StreamError::NotInitialized)
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "stream stop on drop failed");
        }
    }
}

impl std::fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("phase", &self.phase())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn join_worker(name: &'static str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!(worker = name, "stream worker panicked");
    }
}

// =============================================================================
// Receiver
// =============================================================================

struct Receiver {
    queue_depth: usize,
    max_timeouts: u32,
    frame_timeout: Duration,
    frame_count: u32,
}

impl Receiver {
    fn run(
        &self,
        shared: &Shared,
        controller: &CaptureController,
        pool: &FramePool,
        tx: mpsc::Sender<QueuedFrame>,
    ) {
        if let Err(err) = controller.capture_start(self.frame_count) {
            shared.fail(&StreamError::from(err));
            return;
        }
        debug!("receiver running");

        if let Err(err) = self.receive(shared, controller, pool, &tx) {
            shared.fail(&err);
        }

        if let Err(err) = controller.capture_stop() {
            warn!(error = %err, "capture stop after stream failed");
        }
        debug!("receiver exiting");
    }

    fn receive(
        &self,
        shared: &Shared,
        controller: &CaptureController,
        pool: &FramePool,
        tx: &mpsc::Sender<QueuedFrame>,
    ) -> Result<()> {
        let mut sequence: u64 = 0;
        let mut timeouts: u32 = 0;
        let bounded = self.frame_count > 0;

        while !shared.stopping() && (!bounded || sequence < u64::from(self.frame_count)) {
            let Some(mut frame) = pool.try_acquire() else {
                return Err(StreamError::Backlog {
                    queue_depth: self.queue_depth,
                    sequence,
                });
            };

            let received = match controller.get_video_frame(frame.as_mut_slice(), self.frame_timeout) {
                Ok(received) => received,
                Err(_) if shared.stopping() => return Ok(()),
                Err(CaptureError::Timeout { timeout_ms }) => {
                    timeouts += 1;
                    warn!(timeouts, timeout_ms, "no frame within the receive timeout");
                    if timeouts > self.max_timeouts {
                        return Err(StreamError::Stalled { count: timeouts });
                    }
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            timeouts = 0;

            frame.set_len(received)?;
            let data = frame.freeze();
            shared.stats.record_received(received);
            shared.preview.publish(sequence, data.clone());

            match tx.try_send(QueuedFrame { sequence, data }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    return Err(StreamError::Backlog {
                        queue_depth: self.queue_depth,
                        sequence,
                    });
                }
                Err(TrySendError::Closed(_)) => return Ok(()),
            }
            sequence += 1;
        }
        Ok(())
    }
}

// =============================================================================
// Persister
// =============================================================================

fn persist(
    shared: &Shared,
    controller: &CaptureController,
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::Receiver<QueuedFrame>,
    frame_count: u32,
) {
    debug!("persister running");
    while let Some(frame) = rx.blocking_recv() {
        if shared.stopping() {
            break;
        }
        let started = Instant::now();
        match sink.write_frame(frame.sequence, &frame.data, &shared.stop) {
            Ok(WriteOutcome::Written { bytes }) => {
                let written = shared.stats.record_written(bytes, started.elapsed());
                if frame_count > 0 && written >= frame_count {
                    shared.stats.complete();
                    info!(frames = written, "all requested frames written");
                }
            }
            Ok(WriteOutcome::Cancelled) => break,
            Err(err) => {
                shared.fail(&err);
                // Wakes the receiver if it is waiting on the camera
                if let Err(err) = controller.capture_abort() {
                    debug!(error = %err, "no exposure to abort after disk failure");
                }
                break;
            }
        }
    }
    // Further sends report Closed
    rx.close();
    debug!("persister exiting");
}
