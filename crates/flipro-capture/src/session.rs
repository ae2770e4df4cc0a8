//! Capture session: settings, geometry and capture on one device.
//!
//! A `CaptureSession` owns the settings of one open camera. Every setter
//! invalidates the current geometry, so [`CaptureSession::configure`] must run
//! again before the next capture. Settings cannot change while a capture is
//! in progress.

use crate::controller::{CaptureController, CapturePlan, ControllerSettings};
use crate::error::{CaptureError, Result, UnpackError};
use crate::merge::ModelProfile;
use crate::state::CaptureState;
use crate::stats::{StatsRequest, UnpackedStats};
use crate::unpack::{ImageUnpacker, PlaneRequest, UnpackedImageSet};
use flipro_core::capabilities::Capabilities;
use flipro_core::error::GeometryError;
use flipro_core::settings::{
    Binning, ExposureSettings, FrameType, ImageArea, PixelConfig, SamplesPerPixel, SensorMode,
    TriggerMode,
};
use flipro_core::{DeviceSession, FrameGeometry, LogContext, SessionSettings};
use flipro_pool::{BufferPool, TrackedBuffer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RawFrameTag;

/// Outcome of a combined retrieve and unpack.
///
/// The raw transfer and the unpack are reported separately: a frame that was
/// received in full stays received even when a plane could not be sized.
#[derive(Debug)]
pub struct UnpackedRetrieval {
    /// Raw bytes transferred
    pub bytes_received: usize,
    /// Outcome of unpacking and statistics
    pub unpack: std::result::Result<(), UnpackError>,
}

/// Settings, geometry and capture control for one connected camera.
pub struct CaptureSession {
    device: Arc<dyn DeviceSession>,
    capabilities: Capabilities,
    sensor_modes: Vec<SensorMode>,
    sensor_mode: Option<u32>,
    settings: SessionSettings,
    geometry: Option<FrameGeometry>,
    controller: Arc<CaptureController>,
    unpacker: ImageUnpacker,
    raw_buffers: BufferPool<RawFrameTag, u8>,
    log: LogContext,
}

impl CaptureSession {
    /// Bind a session to a connected device, starting from full-sensor defaults.
    pub fn open(
        device: Arc<dyn DeviceSession>,
        controller_settings: ControllerSettings,
        log: LogContext,
    ) -> Result<Self> {
        let _log = log.enter();
        if !device.is_connected() {
            return Err(CaptureError::NotConnected);
        }
        let capabilities = device.capabilities()?;
        let sensor_modes = device.sensor_modes()?;
        let settings = SessionSettings::for_capabilities(&capabilities);
        let profile = ModelProfile::for_device(capabilities.device_type);
        let controller = Arc::new(CaptureController::new(
            Arc::clone(&device),
            controller_settings,
            log.clone(),
        ));

        info!(
            device_type = ?capabilities.device_type,
            max_width = capabilities.max_width,
            max_height = capabilities.max_height,
            modes = sensor_modes.len(),
            "capture session opened"
        );

        Ok(Self {
            device,
            capabilities,
            sensor_modes,
            sensor_mode: None,
            settings,
            geometry: None,
            controller,
            unpacker: ImageUnpacker::new(profile, log.clone()),
            raw_buffers: BufferPool::new(),
            log,
        })
    }

    /// Capability record read at open.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Readout modes the camera offers.
    #[must_use]
    pub fn sensor_modes(&self) -> &[SensorMode] {
        &self.sensor_modes
    }

    /// Selected sensor mode index, if one was chosen.
    #[must_use]
    pub fn sensor_mode(&self) -> Option<u32> {
        self.sensor_mode
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Geometry from the last successful `configure`, if still valid.
    #[must_use]
    pub fn geometry(&self) -> Option<&FrameGeometry> {
        self.geometry.as_ref()
    }

    /// Shared controller, for aborting or ending from another thread.
    #[must_use]
    pub fn controller(&self) -> &Arc<CaptureController> {
        &self.controller
    }

    /// Capture state.
    #[must_use]
    pub fn state(&self) -> CaptureState {
        self.controller.state()
    }

    /// Unpacker, for changing the model profile.
    pub fn unpacker_mut(&mut self) -> &mut ImageUnpacker {
        &mut self.unpacker
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Readout area in unbinned sensor pixels.
    pub fn set_image_area(&mut self, area: ImageArea) -> Result<()> {
        self.update("SetImageArea", |s| s.area = area)
    }

    /// Binning factors.
    pub fn set_binning(&mut self, binning: Binning) -> Result<()> {
        self.update("SetBinning", |s| s.binning = binning)
    }

    /// Pixel depth and LSB offset.
    pub fn set_pixel_config(&mut self, pixel: PixelConfig) -> Result<()> {
        self.update("SetPixelConfig", |s| s.pixel = pixel)
    }

    /// Reference rows before and after the image.
    pub fn set_reference_rows(&mut self, pre: u32, post: u32) -> Result<()> {
        self.update("SetReferenceRows", |s| {
            s.pre_reference_rows = pre;
            s.post_reference_rows = post;
        })
    }

    /// Dummy pixels on padded rows.
    pub fn set_dummy_pixels(&mut self, enabled: bool) -> Result<()> {
        self.update("SetDummyPixels", |s| s.dummy_pixels = enabled)
    }

    /// Whether image rows are produced at all.
    pub fn set_image_data(&mut self, enabled: bool) -> Result<()> {
        self.update("SetImageDataEnable", |s| s.image_data = enabled)
    }

    /// Correlated multiple sampling.
    pub fn set_samples_per_pixel(&mut self, spp: SamplesPerPixel) -> Result<()> {
        self.update("SetSamplesPerPixel", |s| s.samples_per_pixel = spp)
    }

    /// Software or external trigger.
    pub fn set_trigger(&mut self, trigger: TriggerMode) -> Result<()> {
        self.update("SetTrigger", |s| s.trigger = trigger)
    }

    /// Exposure time and frame delay.
    pub fn set_exposure(&mut self, exposure: ExposureSettings) -> Result<()> {
        self.update("SetExposure", |s| s.exposure = exposure)
    }

    /// Frame content selector.
    pub fn set_frame_type(&mut self, frame_type: FrameType) -> Result<()> {
        self.update("SetFrameType", |s| s.frame_type = frame_type)
    }

    /// Select a sensor mode; HDR readout follows the mode.
    pub fn set_sensor_mode(&mut self, index: u32) -> Result<()> {
        let hdr = self
            .sensor_modes
            .iter()
            .find(|mode| mode.index == index)
            .map(|mode| mode.hdr)
            .ok_or(GeometryError::UnknownSensorMode {
                index,
                count: self.sensor_modes.len(),
            })?;
        self.update("SetSensorMode", |s| s.hdr = hdr)?;
        self.sensor_mode = Some(index);
        Ok(())
    }

    fn update(&mut self, operation: &'static str, apply: impl FnOnce(&mut SessionSettings)) -> Result<()> {
        let state = self.controller.state();
        if state != CaptureState::Idle {
            return Err(CaptureError::InvalidState { operation, state });
        }
        apply(&mut self.settings);
        if self.geometry.take().is_some() {
            self.controller.set_plan(None)?;
            debug!(operation, "frame geometry invalidated");
        }
        Ok(())
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    /// Frame size the current settings would produce, without applying them.
    pub fn compute_frame_size(&self) -> Result<usize> {
        Ok(FrameGeometry::compute(&self.settings, &self.capabilities)?.total_bytes())
    }

    /// Validate the settings, push them to the camera and fix the geometry.
    pub fn configure(&mut self) -> Result<FrameGeometry> {
        let _log = self.log.enter();
        let state = self.controller.state();
        if state != CaptureState::Idle {
            return Err(CaptureError::InvalidState {
                operation: "Configure",
                state,
            });
        }

        let geometry = FrameGeometry::compute(&self.settings, &self.capabilities)?;
        self.device.apply_settings(&self.settings, &geometry)?;
        self.controller.set_plan(Some(CapturePlan {
            geometry,
            exposure: self.settings.exposure,
            trigger: self.settings.trigger,
        }))?;
        self.geometry = Some(geometry);

        info!(
            width = geometry.width(),
            height = geometry.height(),
            depth = geometry.pixel_depth(),
            hdr = geometry.hdr(),
            frame_bytes = geometry.total_bytes(),
            "frame geometry configured"
        );
        Ok(geometry)
    }

    /// Exact raw frame size of the configured geometry.
    pub fn frame_size(&self) -> Result<usize> {
        self.geometry
            .map(|g| g.total_bytes())
            .ok_or(CaptureError::GeometryNotConfigured)
    }

    /// Pooled raw frame buffer sized to the configured geometry.
    pub fn acquire_raw_buffer(&mut self) -> Result<TrackedBuffer<u8>> {
        let size = self.frame_size()?;
        Ok(self.raw_buffers.acquire(RawFrameTag, size)?)
    }

    /// Return a raw frame buffer to the pool.
    pub fn release_raw_buffer(&mut self, buffer: TrackedBuffer<u8>) {
        self.raw_buffers.release(RawFrameTag, buffer);
    }

    // =========================================================================
    // Capture
    // =========================================================================

    /// See [`CaptureController::capture_start`].
    pub fn capture_start(&self, frame_count: u32) -> Result<()> {
        self.controller.capture_start(frame_count)
    }

    /// See [`CaptureController::get_video_frame`].
    pub fn get_video_frame(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.controller.get_video_frame(buf, timeout)
    }

    /// See [`CaptureController::get_video_frame_ext`].
    pub fn get_video_frame_ext(&self, buf: &mut [u8]) -> Result<usize> {
        self.controller.get_video_frame_ext(buf)
    }

    /// See [`CaptureController::is_available`].
    pub fn is_available(&self) -> Result<bool> {
        self.controller.is_available()
    }

    /// See [`CaptureController::capture_abort`].
    pub fn capture_abort(&self) -> Result<()> {
        self.controller.capture_abort()
    }

    /// See [`CaptureController::capture_end`].
    pub fn capture_end(&self) -> Result<()> {
        self.controller.capture_end()
    }

    /// See [`CaptureController::capture_stop`].
    pub fn capture_stop(&self) -> Result<()> {
        self.controller.capture_stop()
    }

    /// Retrieve a frame into `raw`, then unpack it into `set`.
    ///
    /// Errors from the retrieval are returned as `Err`. Once the frame is in
    /// `raw`, unpack and statistics failures are reported in
    /// [`UnpackedRetrieval::unpack`] and `raw` keeps the frame.
    pub fn get_video_frame_unpacked(
        &mut self,
        raw: &mut [u8],
        timeout: Duration,
        request: PlaneRequest,
        set: &mut UnpackedImageSet,
        stats: Option<(&StatsRequest, &mut UnpackedStats)>,
    ) -> Result<UnpackedRetrieval> {
        let geometry = self.geometry.ok_or(CaptureError::GeometryNotConfigured)?;
        let bytes_received = self.controller.get_video_frame(raw, timeout)?;

        let unpack = self
            .unpacker
            .unpack(&raw[..bytes_received], &geometry, request, set)
            .and_then(|()| match stats {
                Some((stats_request, out)) => self.unpacker.statistics(set, stats_request, out),
                None => Ok(()),
            });
        if let Err(err) = &unpack {
            tracing::warn!(error = %err, bytes_received, "frame received but not unpacked");
        }
        Ok(UnpackedRetrieval {
            bytes_received,
            unpack,
        })
    }

    /// Unpack a frame already in memory with the configured geometry.
    pub fn unpack(
        &mut self,
        raw: &[u8],
        request: PlaneRequest,
        set: &mut UnpackedImageSet,
    ) -> std::result::Result<(), UnpackError> {
        match self.geometry {
            Some(geometry) => self.unpacker.unpack(raw, &geometry, request, set),
            None => Err(UnpackError::GeometryNotConfigured),
        }
    }

    /// Return the buffers of an unpacked set to the pools.
    pub fn free_unpacked(&mut self, set: &mut UnpackedImageSet, stats: &mut UnpackedStats) {
        self.unpacker.free(set, stats);
    }

    /// Stop any capture and release pooled buffers.
    pub fn close(mut self) -> Result<()> {
        let _log = self.log.enter();
        let stopped = if self.controller.state() == CaptureState::Idle {
            Ok(())
        } else {
            self.controller.capture_stop()
        };
        self.unpacker.clear();
        self.raw_buffers.clear();
        info!("capture session closed");
        stopped
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("device_type", &self.capabilities.device_type)
            .field("settings", &self.settings)
            .field("geometry", &self.geometry)
            .finish_non_exhaustive()
    }
}
