//! Simulated FLI Pro camera.
//!
//! Produces raw frames with exactly the layout the configured geometry
//! describes: a metadata prefix carrying the frame number, reference rows at a
//! fixed level, dummy pixels at zero and a diagonal test pattern in every
//! image row. Exposures complete on a timer in software trigger mode and on
//! [`SimulatedCamera::fire_external_trigger`] in external trigger mode.
//!
//! Abort, end and trigger requests wake any thread blocked in a transfer, the
//! same way a real link cancels outstanding requests.

use crate::unpack::packing::{depth_mask, pack_samples};
use flipro_core::capabilities::{
    BinningTable, Capabilities, DeviceType, DummyPixels, PixelDepths,
};
use flipro_core::settings::{SensorMode, SessionSettings};
use flipro_core::text::ModeName;
use flipro_core::{DeviceError, DeviceSession, FrameGeometry};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Value written to every reference row sample (masked to the pixel depth).
pub const SIM_REFERENCE_LEVEL: u16 = 64;

/// Pixel value the simulator writes for (`x`, `y`) of `channel` in frame `frame_number`.
#[must_use]
pub fn expected_pixel(frame_number: u32, channel: usize, x: u32, y: u32, depth: u32) -> u16 {
    let modulus = u64::from(depth_mask(depth)) + 1;
    let value = u64::from(x) + u64::from(y) + u64::from(frame_number) + channel as u64 * 97;
    (value % modulus) as u16
}

/// Frame number stored in the first four metadata bytes of a simulated frame.
#[must_use]
pub fn frame_number_of(raw: &[u8]) -> Option<u32> {
    raw.get(..4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// A failure the simulator delivers on the next transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimFault {
    /// The transfer fails with this error
    Error(DeviceError),
    /// The transfer delivers only half the frame
    ShortRead,
}

/// Calls the simulator has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounters {
    /// `apply_settings`
    pub applies: u64,
    /// `start_exposure`
    pub starts: u64,
    /// `trigger`
    pub triggers: u64,
    /// `end_exposure`
    pub ends: u64,
    /// `abort_exposure`
    pub aborts: u64,
    /// `stop_exposure`
    pub stops: u64,
    /// Complete frames delivered
    pub frames_sent: u64,
}

#[derive(Debug)]
struct SimState {
    geometry: Option<FrameGeometry>,
    exposure: Duration,
    interval: Duration,
    external: bool,
    armed: bool,
    frames_left: Option<u32>,
    ready_at: Option<Instant>,
    frame_number: u32,
    abort_epoch: u64,
    faults: VecDeque<SimFault>,
    transfer_delay: Duration,
    counters: SimCounters,
    samples: Vec<u16>,
    packed: Vec<u8>,
}

impl SimState {
    fn frame_ready(&self, now: Instant) -> bool {
        self.armed && self.ready_at.is_some_and(|at| at <= now)
    }
}

/// Outcome of waiting for a frame inside the simulator.
enum Wait {
    Ready,
    TimedOut,
    Cancelled,
}

/// In-process camera implementing [`DeviceSession`].
#[derive(Debug)]
pub struct SimulatedCamera {
    capabilities: Capabilities,
    modes: Vec<SensorMode>,
    connected: AtomicBool,
    state: Mutex<SimState>,
    signal: Condvar,
}

impl SimulatedCamera {
    /// Camera with the default 2048 x 2048 GSENSE-like capabilities.
    #[must_use]
    pub fn new() -> Self {
        SimulatedCameraBuilder::default().build()
    }

    /// Builder for custom capabilities.
    #[must_use]
    pub fn builder() -> SimulatedCameraBuilder {
        SimulatedCameraBuilder::default()
    }

    /// Simulate the cable being pulled or reconnected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.signal.notify_all();
    }

    /// Queue a failure for an upcoming transfer.
    pub fn inject_fault(&self, fault: SimFault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Extra latency added to every transfer after the frame is ready.
    pub fn set_transfer_delay(&self, delay: Duration) {
        self.state.lock().transfer_delay = delay;
    }

    /// Pulse the hardware trigger input.
    pub fn fire_external_trigger(&self) {
        let mut state = self.state.lock();
        if state.armed && state.external && state.ready_at.is_none() {
            state.ready_at = Some(Instant::now() + state.exposure);
            self.signal.notify_all();
        }
    }

    /// Number the next delivered frame will carry.
    #[must_use]
    pub fn next_frame_number(&self) -> u32 {
        self.state.lock().frame_number
    }

    /// Call counters.
    #[must_use]
    pub fn counters(&self) -> SimCounters {
        self.state.lock().counters
    }

    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::NotConnected)
        }
    }

    fn wait_for_frame(&self, state: &mut parking_lot::MutexGuard<'_, SimState>, timeout: Duration) -> Wait {
        let deadline = Instant::now() + timeout;
        let epoch = state.abort_epoch;
        loop {
            let now = Instant::now();
            if state.abort_epoch != epoch {
                return Wait::Cancelled;
            }
            if state.frame_ready(now) {
                return Wait::Ready;
            }
            if now >= deadline || !self.connected.load(Ordering::SeqCst) {
                return Wait::TimedOut;
            }
            let wake_at = match state.ready_at {
                Some(at) if state.armed => at.min(deadline),
                _ => deadline,
            };
            self.signal.wait_until(state, wake_at);
        }
    }

    fn render(state: &mut SimState, geometry: &FrameGeometry, buf: &mut [u8]) -> Result<(), DeviceError> {
        let frame_number = state.frame_number;
        let metadata = &mut buf[geometry.metadata_range()];
        metadata.fill(0);
        if let Some(prefix) = metadata.get_mut(..4) {
            prefix.copy_from_slice(&frame_number.to_le_bytes());
        }

        let depth = geometry.pixel_depth();
        let reference = SIM_REFERENCE_LEVEL & depth_mask(depth);
        let spp = geometry.samples_per_pixel() as usize;
        let width = geometry.width();
        let (pre_refs, post_refs) = geometry.reference_rows();
        let dummy = geometry.dummy_pixels();

        for channel in 0..geometry.channels() {
            let samples = &mut state.samples;
            samples.clear();
            let ref_samples = |rows: u32| rows as usize * width as usize * spp;
            samples.resize(ref_samples(pre_refs), reference);
            if geometry.image_data() {
                for y in 0..geometry.height() {
                    let padded = y % 2 == 1;
                    if padded {
                        samples.extend(std::iter::repeat(0).take(usize::from(dummy.pre_row)));
                    }
                    for x in 0..width {
                        let value = expected_pixel(frame_number, channel, x, y, depth);
                        samples.extend(std::iter::repeat(value).take(spp));
                    }
                    if padded {
                        samples.extend(std::iter::repeat(0).take(usize::from(dummy.post_row)));
                    }
                }
            }
            let len = samples.len();
            samples.resize(len + ref_samples(post_refs), reference);

            state.packed.clear();
            pack_samples(
                &state.samples,
                geometry.encoding(),
                depth,
                geometry.lsb_offset(),
                &mut state.packed,
            );
            let range = geometry
                .channel_range(channel)
                .ok_or_else(|| DeviceError::Link("simulated channel out of range".into()))?;
            if state.packed.len() != range.len() {
                return Err(DeviceError::Link(format!(
                    "simulated channel is {} bytes, geometry expects {}",
                    state.packed.len(),
                    range.len()
                )));
            }
            buf[range].copy_from_slice(&state.packed);
        }
        Ok(())
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSession for SimulatedCamera {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn capabilities(&self) -> Result<Capabilities, DeviceError> {
        self.ensure_connected()?;
        Ok(self.capabilities.clone())
    }

    fn sensor_modes(&self) -> Result<Vec<SensorMode>, DeviceError> {
        self.ensure_connected()?;
        Ok(self.modes.clone())
    }

    fn apply_settings(
        &self,
        settings: &SessionSettings,
        geometry: &FrameGeometry,
    ) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        if state.armed {
            return Err(DeviceError::Rejected {
                command: "apply_settings",
                message: "exposure in progress".into(),
            });
        }
        state.geometry = Some(*geometry);
        state.exposure = settings.exposure.exposure;
        state.interval = settings.exposure.frame_interval();
        state.external = settings.trigger.is_external();
        state.counters.applies += 1;
        debug!(frame_bytes = geometry.total_bytes(), "simulated settings applied");
        Ok(())
    }

    fn start_exposure(&self, frame_count: u32) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        if state.geometry.is_none() {
            return Err(DeviceError::Rejected {
                command: "start_exposure",
                message: "settings not applied".into(),
            });
        }
        state.armed = true;
        state.frames_left = (frame_count > 0).then_some(frame_count);
        state.ready_at = if state.external {
            None
        } else {
            Some(Instant::now() + state.exposure)
        };
        state.counters.starts += 1;
        self.signal.notify_all();
        Ok(())
    }

    fn trigger(&self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        self.state.lock().counters.triggers += 1;
        self.fire_external_trigger();
        Ok(())
    }

    fn end_exposure(&self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        if state.armed {
            state.ready_at = Some(Instant::now());
        }
        state.counters.ends += 1;
        self.signal.notify_all();
        Ok(())
    }

    fn abort_exposure(&self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        state.abort_epoch += 1;
        state.armed = false;
        state.ready_at = None;
        // The discarded exposure consumes its frame number
        state.frame_number = state.frame_number.wrapping_add(1);
        state.counters.aborts += 1;
        self.signal.notify_all();
        Ok(())
    }

    fn stop_exposure(&self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        state.armed = false;
        state.ready_at = None;
        state.frames_left = None;
        state.counters.stops += 1;
        self.signal.notify_all();
        Ok(())
    }

    fn frame_available(&self) -> Result<bool, DeviceError> {
        self.ensure_connected()?;
        Ok(self.state.lock().frame_ready(Instant::now()))
    }

    fn wait_frame_signal(&self, timeout: Duration) -> Result<bool, DeviceError> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        match self.wait_for_frame(&mut state, timeout) {
            Wait::Ready => Ok(true),
            Wait::TimedOut => Ok(false),
            Wait::Cancelled => Err(DeviceError::Cancelled),
        }
    }

    fn read_frame(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError> {
        self.ensure_connected()?;
        let mut state = self.state.lock();

        let short = match state.faults.pop_front() {
            Some(SimFault::Error(err)) => return Err(err),
            Some(SimFault::ShortRead) => true,
            None => false,
        };

        match self.wait_for_frame(&mut state, timeout) {
            Wait::Ready => {}
            Wait::Cancelled => return Err(DeviceError::Cancelled),
            Wait::TimedOut => {
                self.ensure_connected()?;
                return Err(DeviceError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }

        let delay = state.transfer_delay;
        if !delay.is_zero() {
            let epoch = state.abort_epoch;
            let done_at = Instant::now() + delay;
            while state.abort_epoch == epoch && Instant::now() < done_at {
                self.signal.wait_until(&mut state, done_at);
            }
            if state.abort_epoch != epoch {
                return Err(DeviceError::Cancelled);
            }
        }

        let geometry = state.geometry.ok_or_else(|| DeviceError::Rejected {
            command: "read_frame",
            message: "settings not applied".into(),
        })?;
        let total = geometry.total_bytes();
        let dest = buf.get_mut(..total).ok_or(DeviceError::ShortTransfer {
            expected: total,
            received: 0,
        })?;
        Self::render(&mut state, &geometry, dest)?;

        let number = state.frame_number;
        state.frame_number = number.wrapping_add(1);
        state.counters.frames_sent += 1;
        if let Some(left) = state.frames_left.as_mut() {
            *left = left.saturating_sub(1);
        }
        let more = state.frames_left.map_or(true, |left| left > 0);
        state.ready_at = match (more, state.external) {
            (true, false) => Some(Instant::now() + state.interval),
            _ => None,
        };
        if !more {
            state.armed = false;
        }
        trace!(frame = number, bytes = total, "simulated frame delivered");

        Ok(if short { total / 2 } else { total })
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds a [`SimulatedCamera`] with custom capabilities.
#[derive(Debug, Clone)]
pub struct SimulatedCameraBuilder {
    capabilities: Capabilities,
    modes: Option<Vec<SensorMode>>,
}

impl Default for SimulatedCameraBuilder {
    fn default() -> Self {
        Self {
            capabilities: Capabilities {
                device_type: DeviceType::Gsense4040,
                max_width: 2048,
                max_height: 2048,
                pixel_depths: PixelDepths::from_depths(&[12, 16]),
                binning_table: BinningTable::new(vec![0x8004_8004]),
                black_level_max: 4095,
                black_sun_max: 255,
                low_gain_entries: 4,
                high_gain_entries: 4,
                row_scan_time_ns: 10_000,
                dummy_pixels: DummyPixels::default(),
                horizontal_scan_invertible: true,
                vertical_scan_invertible: true,
                nv_storage_bytes: 4096,
                pre_frame_reference_rows: 16,
                post_frame_reference_rows: 16,
                metadata_size: 256,
            },
            modes: None,
        }
    }
}

impl SimulatedCameraBuilder {
    /// Sensor extent.
    #[must_use]
    pub fn sensor(mut self, width: u32, height: u32) -> Self {
        self.capabilities.max_width = width;
        self.capabilities.max_height = height;
        self
    }

    /// Metadata prefix size.
    #[must_use]
    pub fn metadata_size(mut self, bytes: u32) -> Self {
        self.capabilities.metadata_size = bytes;
        self
    }

    /// Allowed pixel depths.
    #[must_use]
    pub fn pixel_depths(mut self, depths: &[u32]) -> Self {
        self.capabilities.pixel_depths = PixelDepths::from_depths(depths);
        self
    }

    /// Binning table entries.
    #[must_use]
    pub fn binning_table(mut self, table: BinningTable) -> Self {
        self.capabilities.binning_table = table;
        self
    }

    /// Dummy pixels on padded rows.
    #[must_use]
    pub fn dummy_pixels(mut self, pre_row: u16, post_row: u16) -> Self {
        self.capabilities.dummy_pixels = DummyPixels { pre_row, post_row };
        self
    }

    /// Reference row counts.
    #[must_use]
    pub fn reference_rows(mut self, pre: u32, post: u32) -> Self {
        self.capabilities.pre_frame_reference_rows = pre;
        self.capabilities.post_frame_reference_rows = post;
        self
    }

    /// Camera model family.
    #[must_use]
    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.capabilities.device_type = device_type;
        self
    }

    /// Sensor modes to report instead of the default LDR and HDR pair.
    #[must_use]
    pub fn sensor_modes(mut self, modes: Vec<SensorMode>) -> Self {
        self.modes = Some(modes);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> SimulatedCamera {
        let modes = self.modes.unwrap_or_else(|| {
            [(0, "LDR", false), (1, "HDR", true)]
                .into_iter()
                .filter_map(|(index, name, hdr)| {
                    ModeName::new("sensor mode", name)
                        .ok()
                        .map(|name| SensorMode { index, name, hdr })
                })
                .collect()
        });
        SimulatedCamera {
            capabilities: self.capabilities,
            modes,
            connected: AtomicBool::new(true),
            state: Mutex::new(SimState {
                geometry: None,
                exposure: Duration::ZERO,
                interval: Duration::ZERO,
                external: false,
                armed: false,
                frames_left: None,
                ready_at: None,
                frame_number: 0,
                abort_epoch: 0,
                faults: VecDeque::new(),
                transfer_delay: Duration::ZERO,
                counters: SimCounters::default(),
                samples: Vec::new(),
                packed: Vec::new(),
            }),
            signal: Condvar::new(),
        }
    }
}
