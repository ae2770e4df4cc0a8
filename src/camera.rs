//! Camera facade used by the CLI.
//!
//! Applies the `[camera]` configuration section to a [`CaptureSession`] and
//! runs the two workflows the binary offers: a short unpacked capture with
//! per-plane statistics, and a bounded or timed stream to disk.

use crate::config::{CameraConfig, FliproConfig};
use crate::error::AppResult;
use flipro_capture::{
    CaptureSession, PlaneKind, PlaneRequest, StatsRequest, UnpackedImageSet, UnpackedStats,
};
use flipro_core::settings::{Binning, ExposureSettings, PixelConfig};
use flipro_core::{DeviceSession, LogContext};
use flipro_storage::{StreamEngine, StreamStatistics, StreamStatus};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[cfg(feature = "mock")]
use flipro_capture::sim::SimulatedCamera;

/// Simulated camera shaped by the `[camera]` section.
#[cfg(feature = "mock")]
#[must_use]
pub fn simulated_camera(config: &CameraConfig) -> Arc<SimulatedCamera> {
    let mut depths = vec![12, 16];
    if !depths.contains(&config.pixel_depth) {
        depths.push(config.pixel_depth);
    }
    Arc::new(
        SimulatedCamera::builder()
            .sensor(config.width, config.height)
            .metadata_size(config.metadata_size)
            .pixel_depths(&depths)
            .build(),
    )
}

/// Open a session on `device` and configure it from `config`.
pub fn open_session(
    device: Arc<dyn DeviceSession>,
    config: &FliproConfig,
    log: LogContext,
) -> AppResult<CaptureSession> {
    let mut session =
        CaptureSession::open(device, config.capture.controller_settings(), log)?;
    apply_camera_config(&mut session, &config.camera)?;
    let geometry = session.configure()?;
    info!(
        width = geometry.width(),
        height = geometry.height(),
        frame_bytes = geometry.total_bytes(),
        "camera configured"
    );
    Ok(session)
}

fn apply_camera_config(session: &mut CaptureSession, camera: &CameraConfig) -> AppResult<()> {
    session.set_pixel_config(PixelConfig::new(camera.pixel_depth))?;
    session.set_binning(Binning::new(camera.binning, camera.binning))?;
    session.set_reference_rows(camera.pre_reference_rows, camera.post_reference_rows)?;
    session.set_exposure(ExposureSettings {
        exposure: Duration::from_millis(camera.exposure_ms),
        frame_delay: Duration::from_millis(camera.frame_delay_ms),
    })?;

    let mode = session
        .sensor_modes()
        .iter()
        .find(|mode| mode.hdr == camera.hdr)
        .map(|mode| mode.index);
    match mode {
        Some(index) => session.set_sensor_mode(index)?,
        None if camera.hdr => warn!("camera has no HDR sensor mode; capturing LDR"),
        None => {}
    }
    Ok(())
}

/// Statistics of one unpacked frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// 0-based frame index within the capture
    pub index: u32,
    /// Raw bytes transferred
    pub bytes: usize,
    /// Plane width
    pub width: u32,
    /// Plane height
    pub height: u32,
    /// Per plane: kind, mean, median, dimmest and brightest value
    pub planes: Vec<(PlaneKind, f64, f64, u16, u16)>,
    /// Unpack failure, if the frame arrived but could not be decoded
    pub unpack_error: Option<String>,
}

/// Capture `frames` frames, unpack each and compute plane statistics.
pub fn capture_frames(
    session: &mut CaptureSession,
    frames: u32,
    timeout: Duration,
) -> AppResult<Vec<FrameReport>> {
    let hdr = session.settings().hdr;
    let mut request = PlaneRequest::only(PlaneKind::Low).with_metadata();
    if hdr {
        request = request.with(PlaneKind::High).with(PlaneKind::Merged);
    }
    let stats_request = StatsRequest::for_planes(PlaneRequest { metadata: false, ..request });

    let mut raw = session.acquire_raw_buffer()?;
    let mut set = UnpackedImageSet::new();
    let mut stats = UnpackedStats::default();
    let mut reports = Vec::new();

    session.capture_start(frames)?;
    for index in 0..frames {
        let retrieval = match session.get_video_frame_unpacked(
            raw.as_mut_slice(),
            timeout,
            request,
            &mut set,
            Some((&stats_request, &mut stats)),
        ) {
            Ok(retrieval) => retrieval,
            Err(err) => {
                if let Err(stop_err) = session.capture_stop() {
                    warn!(error = %stop_err, "capture stop after failed retrieval");
                }
                session.release_raw_buffer(raw);
                return Err(err.into());
            }
        };

        let planes = PlaneKind::ALL
            .iter()
            .filter_map(|&kind| {
                stats.plane(kind).map(|s| {
                    (kind, s.mean, s.median, s.dimmest.value, s.brightest.value)
                })
            })
            .collect();
        reports.push(FrameReport {
            index,
            bytes: retrieval.bytes_received,
            width: set.width(),
            height: set.height(),
            planes,
            unpack_error: retrieval.unpack.err().map(|err| err.to_string()),
        });
    }
    session.capture_stop()?;

    session.free_unpacked(&mut set, &mut stats);
    session.release_raw_buffer(raw);
    Ok(reports)
}

/// How long a stream runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRun {
    /// Frames to stream; 0 runs until `duration` elapses
    pub frames: u32,
    /// Upper bound on the run
    pub duration: Option<Duration>,
    /// Statistics polling period
    pub poll: Duration,
}

/// Stream to `root` until the run completes, fails or times out.
///
/// `progress` sees every polled snapshot. The returned statistics are taken
/// after the engine stopped.
pub fn stream_to_disk(
    session: &CaptureSession,
    config: &FliproConfig,
    run: StreamRun,
    root: &Path,
    prefix: &str,
    log: LogContext,
    mut progress: impl FnMut(&StreamStatistics),
) -> AppResult<StreamStatistics> {
    let engine = StreamEngine::new(
        Arc::clone(session.controller()),
        config.stream.engine_config(),
        log,
    );
    engine.init(session.frame_size()?, root, prefix)?;
    engine.start(run.frames, config.camera.frame_interval())?;

    let started = Instant::now();
    loop {
        thread::sleep(run.poll);
        let stats = engine.statistics();
        progress(&stats);
        if stats.status != StreamStatus::Streaming {
            break;
        }
        if run.duration.is_some_and(|limit| started.elapsed() >= limit) {
            info!("stream duration reached");
            break;
        }
    }

    engine.stop()?;
    let stats = engine.statistics();
    engine.deinit()?;
    Ok(stats)
}
