//! Stream engine driven end to end against the simulated camera.

use flipro_capture::sim::{frame_number_of, SimulatedCamera};
use flipro_capture::{CaptureSession, CaptureState, ControllerSettings};
use flipro_core::settings::ExposureSettings;
use flipro_core::LogContext;
use flipro_storage::{
    EnginePhase, FrameSink, Result, SinkFactory, StreamConfig, StreamEngine, StreamError,
    StreamStatistics, StreamStatus, StreamTarget, WriteOutcome,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DEADLINE: Duration = Duration::from_secs(15);

fn session_with_exposure(exposure: Duration) -> CaptureSession {
    let camera = Arc::new(SimulatedCamera::builder().sensor(64, 48).build());
    let mut session =
        CaptureSession::open(camera, ControllerSettings::default(), LogContext::disabled()).unwrap();
    session.set_exposure(ExposureSettings::new(exposure)).unwrap();
    session.configure().unwrap();
    session
}

fn engine_for(session: &CaptureSession, config: StreamConfig) -> StreamEngine {
    StreamEngine::new(
        Arc::clone(session.controller()),
        config,
        LogContext::disabled(),
    )
}

fn wait_until(engine: &StreamEngine, what: &str, done: impl Fn(&StreamStatistics) -> bool) -> StreamStatistics {
    let deadline = Instant::now() + DEADLINE;
    loop {
        let stats = engine.statistics();
        if done(&stats) {
            return stats;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}: {stats:?}");
        thread::sleep(Duration::from_millis(2));
    }
}

/// Sleeps per frame, giving up as soon as the stream is cancelled.
struct SlowSink {
    per_frame: Duration,
}

impl FrameSink for SlowSink {
    fn write_frame(&mut self, _sequence: u64, frame: &[u8], cancel: &AtomicBool) -> Result<WriteOutcome> {
        let deadline = Instant::now() + self.per_frame;
        while Instant::now() < deadline {
            if cancel.load(Ordering::SeqCst) {
                return Ok(WriteOutcome::Cancelled);
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(WriteOutcome::Written { bytes: frame.len() })
    }
}

struct SlowSinks(Duration);

impl SinkFactory for SlowSinks {
    fn open(&self, _target: &StreamTarget) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(SlowSink { per_frame: self.0 }))
    }
}

/// Fails every write while `broken` is set.
struct BrokenDisk {
    broken: Arc<AtomicBool>,
}

struct BrokenSink {
    broken: Arc<AtomicBool>,
    target: StreamTarget,
}

impl FrameSink for BrokenSink {
    fn write_frame(&mut self, sequence: u64, frame: &[u8], _cancel: &AtomicBool) -> Result<WriteOutcome> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StreamError::Write {
                path: self.target.frame_path(sequence),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        Ok(WriteOutcome::Written { bytes: frame.len() })
    }
}

impl SinkFactory for BrokenDisk {
    fn open(&self, target: &StreamTarget) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(BrokenSink {
            broken: Arc::clone(&self.broken),
            target: target.clone(),
        }))
    }
}

#[test]
fn test_bounded_stream_writes_every_frame_in_order() {
    let session = session_with_exposure(Duration::from_millis(5));
    let frame_bytes = session.frame_size().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_for(&session, StreamConfig::default());

    engine.init(frame_bytes, dir.path(), "run_").unwrap();
    assert_eq!(engine.phase(), EnginePhase::Initialized);
    engine.start(5, Duration::from_millis(5)).unwrap();
    assert_eq!(engine.phase(), EnginePhase::Streaming);

    let stats = wait_until(&engine, "completion", |s| s.status != StreamStatus::Streaming);
    assert_eq!(stats.status, StreamStatus::Stopped);
    assert_eq!(stats.frames_received, 5);
    assert_eq!(stats.disk_frames_written, 5);
    assert_eq!(stats.disk_bytes_written, 5 * frame_bytes as u64);
    assert!(stats.avg_disk_mbps > 0.0);
    assert!(stats.peak_disk_mbps >= stats.avg_disk_mbps * 0.999);
    engine.stop().unwrap();
    assert_eq!(engine.phase(), EnginePhase::Initialized);

    for sequence in 0..5u32 {
        let path = dir.path().join(format!("run_{sequence:08}.raw"));
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), frame_bytes);
        assert_eq!(frame_number_of(&data), Some(sequence));
    }
    assert!(!dir.path().join("run_00000005.raw").exists());
    assert_eq!(session.state(), CaptureState::Idle);
}

#[test]
fn test_stop_freezes_counters_before_disk_catches_up() {
    let session = session_with_exposure(Duration::from_millis(5));
    let frame_bytes = session.frame_size().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = StreamConfig {
        queue_depth: 32,
        ..StreamConfig::default()
    };
    let engine = StreamEngine::with_sink_factory(
        Arc::clone(session.controller()),
        config,
        Arc::new(SlowSinks(Duration::from_millis(300))),
        LogContext::disabled(),
    );
    engine.init(frame_bytes, dir.path(), "slow_").unwrap();
    engine.start(5, Duration::from_millis(5)).unwrap();

    let stats = wait_until(&engine, "all frames received", |s| s.frames_received == 5);
    assert!(stats.disk_frames_written < 5);
    assert_eq!(stats.status, StreamStatus::Streaming);

    engine.stop().unwrap();
    let frozen = engine.statistics();
    assert_eq!(frozen.status, StreamStatus::Stopped);
    assert_eq!(frozen.status.code(), 0);
    assert!(frozen.pending_frames() > 0);

    thread::sleep(Duration::from_millis(400));
    assert_eq!(engine.statistics(), frozen);

    // Stopping again is a no-op
    engine.stop().unwrap();
}

#[test]
fn test_preview_tracks_latest_frame() {
    let session = session_with_exposure(Duration::from_millis(300));
    let frame_bytes = session.frame_size().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_for(&session, StreamConfig::default());
    let mut preview = vec![0u8; frame_bytes];

    assert!(matches!(
        engine.get_preview_image(&mut preview, Duration::ZERO),
        Err(StreamError::NotInitialized)
    ));
    engine.init(frame_bytes, dir.path(), "pv_").unwrap();
    assert_eq!(
        engine.get_preview_image(&mut preview, Duration::from_millis(20)).unwrap(),
        0
    );
    assert!(matches!(
        engine.get_preview_image(&mut preview[..10], Duration::ZERO),
        Err(StreamError::BufferTooSmall { .. })
    ));

    engine.start(0, Duration::from_millis(300)).unwrap();
    assert_eq!(engine.get_preview_image(&mut preview, DEADLINE).unwrap(), frame_bytes);
    let first = preview.clone();
    assert_eq!(frame_number_of(&first), Some(0));

    // Within one frame interval the same frame comes back
    assert_eq!(engine.get_preview_image(&mut preview, Duration::ZERO).unwrap(), frame_bytes);
    assert_eq!(preview, first);

    wait_until(&engine, "second frame", |s| s.frames_received >= 2);
    engine.get_preview_image(&mut preview, Duration::ZERO).unwrap();
    assert_ne!(preview, first);
    let latest = engine.preview_frame(Duration::ZERO).unwrap().unwrap();
    assert!(latest.sequence >= 1);

    engine.stop().unwrap();
}

#[test]
fn test_preview_survives_restart_until_deinit() {
    let session = session_with_exposure(Duration::from_millis(300));
    let frame_bytes = session.frame_size().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_for(&session, StreamConfig::default());
    let mut preview = vec![0u8; frame_bytes];

    engine.init(frame_bytes, dir.path(), "keep_").unwrap();
    engine.start(1, Duration::from_millis(300)).unwrap();
    wait_until(&engine, "completion", |s| s.status != StreamStatus::Streaming);
    engine.stop().unwrap();
    assert_eq!(engine.get_preview_image(&mut preview, Duration::ZERO).unwrap(), frame_bytes);
    let previous = preview.clone();

    // The next frame is an exposure away; the old one is still served
    engine.start(0, Duration::from_millis(300)).unwrap();
    preview.fill(0);
    assert_eq!(engine.get_preview_image(&mut preview, Duration::ZERO).unwrap(), frame_bytes);
    assert_eq!(preview, previous);
    engine.stop().unwrap();

    engine.deinit().unwrap();
    engine.init(frame_bytes, dir.path(), "keep_").unwrap();
    assert_eq!(engine.get_preview_image(&mut preview, Duration::ZERO).unwrap(), 0);
}

#[test]
fn test_disk_failure_requires_reinitialize() {
    let session = session_with_exposure(Duration::from_millis(5));
    let frame_bytes = session.frame_size().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let broken = Arc::new(AtomicBool::new(true));
    let engine = StreamEngine::with_sink_factory(
        Arc::clone(session.controller()),
        StreamConfig::default(),
        Arc::new(BrokenDisk {
            broken: Arc::clone(&broken),
        }),
        LogContext::disabled(),
    );
    engine.init(frame_bytes, dir.path(), "bad_").unwrap();
    engine.start(0, Duration::from_millis(5)).unwrap();

    let stats = wait_until(&engine, "failure", |s| s.status.is_failed());
    assert_eq!(stats.status.code(), -1);
    assert!(stats.last_error.unwrap().contains("disk full"));

    engine.stop().unwrap();
    assert!(engine.statistics().status.is_failed());
    assert!(matches!(
        engine.start(0, Duration::from_millis(5)),
        Err(StreamError::RequiresReinitialize { .. })
    ));

    broken.store(false, Ordering::SeqCst);
    engine.deinit().unwrap();
    engine.init(frame_bytes, dir.path(), "bad_").unwrap();
    engine.start(3, Duration::from_millis(5)).unwrap();
    let stats = wait_until(&engine, "recovery", |s| s.status != StreamStatus::Streaming);
    assert_eq!(stats.status, StreamStatus::Stopped);
    assert_eq!(stats.disk_frames_written, 3);
    engine.stop().unwrap();
}

#[test]
fn test_disk_backlog_fails_stream() {
    let session = session_with_exposure(Duration::from_millis(5));
    let frame_bytes = session.frame_size().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = StreamConfig {
        queue_depth: 1,
        ..StreamConfig::default()
    };
    let engine = StreamEngine::with_sink_factory(
        Arc::clone(session.controller()),
        config,
        Arc::new(SlowSinks(Duration::from_millis(500))),
        LogContext::disabled(),
    );
    engine.init(frame_bytes, dir.path(), "lag_").unwrap();
    engine.start(0, Duration::from_millis(5)).unwrap();

    let stats = wait_until(&engine, "backlog", |s| s.status.is_failed());
    assert!(stats.last_error.unwrap().contains("behind"));
    engine.stop().unwrap();
    assert_eq!(session.state(), CaptureState::Idle);
}

#[test]
fn test_lifecycle_errors() {
    let session = session_with_exposure(Duration::from_millis(500));
    let frame_bytes = session.frame_size().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_for(&session, StreamConfig::default());

    assert!(matches!(
        engine.start(1, Duration::ZERO),
        Err(StreamError::NotInitialized)
    ));
    assert!(matches!(engine.deinit(), Err(StreamError::NotInitialized)));
    assert!(matches!(
        engine.init(0, dir.path(), "x_"),
        Err(StreamError::InvalidFrameSize)
    ));

    engine.init(frame_bytes + 1, dir.path(), "x_").unwrap();
    assert!(matches!(
        engine.init(frame_bytes, dir.path(), "x_"),
        Err(StreamError::AlreadyInitialized)
    ));
    match engine.start(1, Duration::ZERO) {
        Err(StreamError::FrameSizeMismatch { initialized, actual }) => {
            assert_eq!(initialized, frame_bytes + 1);
            assert_eq!(actual, frame_bytes);
        }
        other => panic!("expected a size mismatch, got {other:?}"),
    }

    engine.deinit().unwrap();
    engine.init(frame_bytes, dir.path(), "x_").unwrap();
    engine.start(0, Duration::from_millis(500)).unwrap();
    assert!(matches!(
        engine.start(0, Duration::from_millis(500)),
        Err(StreamError::AlreadyStreaming)
    ));

    // Deinit stops a running stream first
    engine.deinit().unwrap();
    assert_eq!(engine.phase(), EnginePhase::Uninitialized);
    assert_eq!(engine.statistics().status, StreamStatus::Stopped);
    assert_eq!(session.state(), CaptureState::Idle);
}
