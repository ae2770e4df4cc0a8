//! Capture controller: exposure lifecycle and frame retrieval.
//!
//! One thread owns a capture sequence (`capture_start`, repeated
//! `get_video_frame`, `capture_stop`). Any other thread may call
//! `capture_abort` or `capture_end` to interrupt it, and during an external
//! trigger wait may call `capture_start` to force a trigger.
//!
//! A retrieval first sleeps on a condition variable for part of the caller's
//! timeout, without touching the device, so an abort or end from another
//! thread wakes it immediately. It then issues one transfer with the
//! remaining time. Every abort bumps an epoch counter; a transfer that
//! completes under a stale epoch belongs to an aborted exposure and is thrown
//! away.

use crate::error::{CaptureError, Result};
use crate::state::{next_state, CaptureEvent, CaptureState};
use flipro_core::settings::{ExposureSettings, TriggerMode};
use flipro_core::{DeviceError, DeviceSession, FrameGeometry, LogContext};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timing knobs for frame retrieval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    /// Share of a retrieval timeout spent waiting before the transfer is issued
    pub pre_wait_fraction: f64,
    /// Poll slice while blocked on an external trigger
    pub external_wait_slice: Duration,
    /// Transfer timeout once an external trigger has signalled data
    pub external_transfer_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            pre_wait_fraction: 0.9,
            external_wait_slice: Duration::from_millis(50),
            external_transfer_timeout: Duration::from_millis(5000),
        }
    }
}

/// What the next capture will produce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturePlan {
    /// Frame layout
    pub geometry: FrameGeometry,
    /// Exposure timing, used to schedule the pre-wait
    pub exposure: ExposureSettings,
    /// Software or hardware triggered
    pub trigger: TriggerMode,
}

#[derive(Debug)]
struct Inner {
    state: CaptureState,
    plan: Option<CapturePlan>,
    frame_budget: Option<u32>,
    retrieved: u32,
    owner: Option<ThreadId>,
    epoch: u64,
    resources_held: bool,
    exposure_due: Option<Instant>,
    external_wait: bool,
}

impl Inner {
    fn transition(&mut self, event: CaptureEvent, operation: &'static str) -> Result<CaptureState> {
        let next = next_state(self.state, event).map_err(|rejected| CaptureError::InvalidState {
            operation,
            state: rejected.state,
        })?;
        self.state = next;
        Ok(next)
    }

    fn check_owner(&self, operation: &'static str) -> Result<()> {
        match self.owner {
            Some(owner) if owner != thread::current().id() => {
                Err(CaptureError::WrongThread { operation })
            }
            _ => Ok(()),
        }
    }

    fn more_expected(&self) -> bool {
        self.frame_budget.map_or(true, |budget| self.retrieved < budget)
    }
}

/// Drives the exposure state machine of one device.
pub struct CaptureController {
    device: Arc<dyn DeviceSession>,
    inner: Mutex<Inner>,
    wake: Condvar,
    settings: ControllerSettings,
    log: LogContext,
}

impl CaptureController {
    /// Controller for a connected device.
    #[must_use]
    pub fn new(device: Arc<dyn DeviceSession>, settings: ControllerSettings, log: LogContext) -> Self {
        Self {
            device,
            inner: Mutex::new(Inner {
                state: CaptureState::Idle,
                plan: None,
                frame_budget: None,
                retrieved: 0,
                owner: None,
                epoch: 0,
                resources_held: false,
                exposure_due: None,
                external_wait: false,
            }),
            wake: Condvar::new(),
            settings,
            log,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CaptureState {
        self.inner.lock().state
    }

    /// Frames retrieved since the last `capture_start`.
    #[must_use]
    pub fn frames_retrieved(&self) -> u32 {
        self.inner.lock().retrieved
    }

    /// The plan the next capture will use.
    #[must_use]
    pub fn plan(&self) -> Option<CapturePlan> {
        self.inner.lock().plan
    }

    /// Replace the plan. Only allowed while idle.
    pub fn set_plan(&self, plan: Option<CapturePlan>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != CaptureState::Idle {
            return Err(CaptureError::InvalidState {
                operation: "Configure",
                state: inner.state,
            });
        }
        inner.plan = plan;
        Ok(())
    }

    /// The device this controller drives.
    #[must_use]
    pub fn device(&self) -> &Arc<dyn DeviceSession> {
        &self.device
    }

    /// Begin exposing `frame_count` frames; 0 means until stopped.
    ///
    /// Called from a thread other than the one blocked in
    /// [`CaptureController::get_video_frame_ext`], this forces a trigger
    /// instead.
    pub fn capture_start(&self, frame_count: u32) -> Result<()> {
        let _log = self.log.enter();
        if !self.device.is_connected() {
            return Err(CaptureError::NotConnected);
        }

        let mut inner = self.inner.lock();
        let caller = thread::current().id();
        if inner.external_wait && inner.owner != Some(caller) {
            self.device.trigger()?;
            info!("trigger forced during external wait");
            return Ok(());
        }

        let plan = inner.plan.ok_or(CaptureError::GeometryNotConfigured)?;
        next_state(inner.state, CaptureEvent::Start).map_err(|rejected| {
            CaptureError::InvalidState {
                operation: "CaptureStart",
                state: rejected.state,
            }
        })?;
        self.device.start_exposure(frame_count)?;

        inner.transition(CaptureEvent::Start, "CaptureStart")?;
        inner.frame_budget = (frame_count > 0).then_some(frame_count);
        inner.retrieved = 0;
        inner.owner = Some(caller);
        inner.resources_held = true;
        inner.exposure_due = match plan.trigger {
            TriggerMode::Software => Some(Instant::now() + plan.exposure.exposure),
            TriggerMode::External(_) => None,
        };
        info!(
            frame_count,
            frame_bytes = plan.geometry.total_bytes(),
            "capture started"
        );
        Ok(())
    }

    /// Retrieve the next frame into `buf`, waiting at most `timeout`.
    ///
    /// Returns the number of bytes received, always the geometry's full frame
    /// size. A timeout leaves the state where it was.
    pub fn get_video_frame(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let _log = self.log.enter();
        if !self.device.is_connected() {
            return Err(CaptureError::NotConnected);
        }

        let mut inner = self.inner.lock();
        inner.check_owner("GetVideoFrame")?;
        let plan = inner.plan.ok_or(CaptureError::GeometryNotConfigured)?;
        let required = plan.geometry.total_bytes();
        if buf.len() < required {
            return Err(CaptureError::BufferTooSmall {
                required,
                provided: buf.len(),
            });
        }

        let started = Instant::now();
        let was_ready = inner.state == CaptureState::FrameReady;
        inner.transition(CaptureEvent::BeginRetrieve, "GetVideoFrame")?;
        let epoch = inner.epoch;

        if !was_ready {
            let deadline = started + self.pre_wait(&inner, &plan, timeout, started);
            while inner.epoch == epoch && inner.state == CaptureState::Exposing {
                if self.wake.wait_until(&mut inner, deadline).timed_out() {
                    break;
                }
            }
            if inner.epoch != epoch {
                debug!("retrieval interrupted by abort");
                return Err(CaptureError::Aborted);
            }
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        let result = MutexGuard::unlocked(&mut inner, || {
            self.device.read_frame(&mut buf[..required], remaining)
        });
        self.finish_retrieval(&mut inner, epoch, required, timeout, result)
    }

    /// Wait without a timeout for an externally triggered frame.
    ///
    /// `capture_start` is optional; when the controller is idle the device is
    /// armed for a single frame. Only `capture_abort` or `capture_end` from
    /// another thread ends the wait early. Balance every call with
    /// `capture_stop`.
    pub fn get_video_frame_ext(&self, buf: &mut [u8]) -> Result<usize> {
        let _log = self.log.enter();
        if !self.device.is_connected() {
            return Err(CaptureError::NotConnected);
        }

        let mut inner = self.inner.lock();
        inner.check_owner("GetVideoFrameExt")?;
        let plan = inner.plan.ok_or(CaptureError::GeometryNotConfigured)?;
        let required = plan.geometry.total_bytes();
        if buf.len() < required {
            return Err(CaptureError::BufferTooSmall {
                required,
                provided: buf.len(),
            });
        }

        let from_idle = inner.state == CaptureState::Idle;
        next_state(inner.state, CaptureEvent::BeginExternalWait).map_err(|rejected| {
            CaptureError::InvalidState {
                operation: "GetVideoFrameExt",
                state: rejected.state,
            }
        })?;
        if from_idle {
            self.device.start_exposure(1)?;
            inner.frame_budget = Some(1);
            inner.retrieved = 0;
            inner.resources_held = true;
            inner.exposure_due = None;
        }
        inner.transition(CaptureEvent::BeginExternalWait, "GetVideoFrameExt")?;
        inner.owner = Some(thread::current().id());
        inner.external_wait = true;
        let epoch = inner.epoch;
        debug!("waiting for external trigger");

        loop {
            if inner.state == CaptureState::FrameReady {
                break;
            }
            let slice = self.settings.external_wait_slice;
            let signalled =
                MutexGuard::unlocked(&mut inner, || self.device.wait_frame_signal(slice));
            if inner.epoch != epoch {
                inner.external_wait = false;
                debug!("external wait interrupted by abort");
                return Err(CaptureError::Aborted);
            }
            match signalled {
                Ok(true) => break,
                Ok(false) => continue,
                Err(err) => {
                    inner.external_wait = false;
                    if inner.state == CaptureState::Exposing {
                        inner.transition(CaptureEvent::NoFrame, "GetVideoFrameExt")?;
                    }
                    return Err(err.into());
                }
            }
        }

        let timeout = self.settings.external_transfer_timeout;
        let result = MutexGuard::unlocked(&mut inner, || {
            self.device.read_frame(&mut buf[..required], timeout)
        });
        inner.external_wait = false;
        self.finish_retrieval(&mut inner, epoch, required, timeout, result)
    }

    /// Non-blocking: is a complete frame waiting on the device?
    pub fn is_available(&self) -> Result<bool> {
        if !self.device.is_connected() {
            return Err(CaptureError::NotConnected);
        }
        Ok(self.device.frame_available()?)
    }

    /// Cancel the current exposure and discard any partial frame.
    ///
    /// Safe to call from any thread. Only valid while armed or exposing.
    pub fn capture_abort(&self) -> Result<()> {
        let _log = self.log.enter();
        let mut inner = self.inner.lock();
        next_state(inner.state, CaptureEvent::Abort).map_err(|rejected| {
            CaptureError::InvalidState {
                operation: "CaptureAbort",
                state: rejected.state,
            }
        })?;
        self.device.abort_exposure()?;

        inner.transition(CaptureEvent::Abort, "CaptureAbort")?;
        inner.epoch += 1;
        inner.exposure_due = None;
        self.wake.notify_all();
        info!(retrieved = inner.retrieved, "capture aborted");
        Ok(())
    }

    /// Finish the current exposure early; the frame stays retrievable.
    ///
    /// Safe to call from any thread. Only valid while armed or exposing.
    pub fn capture_end(&self) -> Result<()> {
        let _log = self.log.enter();
        let mut inner = self.inner.lock();
        next_state(inner.state, CaptureEvent::End).map_err(|rejected| {
            CaptureError::InvalidState {
                operation: "CaptureEnd",
                state: rejected.state,
            }
        })?;
        self.device.end_exposure()?;

        inner.transition(CaptureEvent::End, "CaptureEnd")?;
        inner.exposure_due = None;
        self.wake.notify_all();
        info!("capture ended early");
        Ok(())
    }

    /// Release capture resources and return to idle.
    ///
    /// Valid in every state and a no-op on the device when no capture holds
    /// resources. Local state is always released; a device error is still
    /// reported.
    pub fn capture_stop(&self) -> Result<()> {
        let _log = self.log.enter();
        let mut inner = self.inner.lock();
        inner.check_owner("CaptureStop")?;

        let held = inner.resources_held;
        inner.transition(CaptureEvent::Stop, "CaptureStop")?;
        inner.epoch += 1;
        inner.owner = None;
        inner.resources_held = false;
        inner.frame_budget = None;
        inner.exposure_due = None;
        inner.external_wait = false;
        self.wake.notify_all();

        if held {
            if let Err(err) = self.device.stop_exposure() {
                warn!(error = %err, "device stop failed");
                return Err(err.into());
            }
            info!(retrieved = inner.retrieved, "capture stopped");
        }
        Ok(())
    }

    /// Time to sleep before issuing the transfer.
    fn pre_wait(&self, inner: &Inner, plan: &CapturePlan, timeout: Duration, now: Instant) -> Duration {
        if plan.trigger.is_external() {
            return Duration::ZERO;
        }
        let share = timeout.mul_f64(self.settings.pre_wait_fraction.clamp(0.0, 1.0));
        let until_due = inner
            .exposure_due
            .map_or(Duration::ZERO, |due| due.saturating_duration_since(now));
        share.min(until_due)
    }

    fn finish_retrieval(
        &self,
        inner: &mut Inner,
        epoch: u64,
        required: usize,
        timeout: Duration,
        result: std::result::Result<usize, DeviceError>,
    ) -> Result<usize> {
        if inner.epoch != epoch {
            debug!("discarding transfer from aborted exposure");
            return Err(CaptureError::Aborted);
        }

        let failure = match result {
            Ok(received) if received == required => {
                inner.retrieved += 1;
                let more_expected = inner.more_expected();
                inner.transition(CaptureEvent::Retrieved { more_expected }, "GetVideoFrame")?;
                inner.exposure_due = match (more_expected, inner.plan) {
                    (true, Some(plan)) if !plan.trigger.is_external() => {
                        Some(Instant::now() + plan.exposure.frame_interval())
                    }
                    _ => None,
                };
                debug!(
                    bytes = received,
                    retrieved = inner.retrieved,
                    more_expected,
                    "frame retrieved"
                );
                return Ok(received);
            }
            Ok(received) => CaptureError::Transport(DeviceError::ShortTransfer {
                expected: required,
                received,
            }),
            Err(DeviceError::Timeout { .. }) => CaptureError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            Err(err) => CaptureError::from(err),
        };

        inner.transition(CaptureEvent::NoFrame, "GetVideoFrame")?;
        if !matches!(failure, CaptureError::Timeout { .. }) {
            warn!(error = %failure, "frame retrieval failed");
        }
        Err(failure)
    }
}

impl std::fmt::Debug for CaptureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureController")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
