//! Contract with the device transport.
//!
//! Opening, enumerating and closing cameras happen elsewhere. The capture core
//! only needs a connected handle with a capabilities query, a handful of
//! exposure commands and a blocking byte transfer with a timeout.

use crate::capabilities::Capabilities;
use crate::error::DeviceError;
use crate::geometry::FrameGeometry;
use crate::settings::{SensorMode, SessionSettings};
use std::time::Duration;

/// A connected camera.
///
/// Implementations must be callable from several threads at once: the thread
/// driving a capture blocks in [`DeviceSession::read_frame`] or
/// [`DeviceSession::wait_frame_signal`] while another thread issues
/// [`DeviceSession::abort_exposure`] or [`DeviceSession::end_exposure`].
/// An abort must make any outstanding read or wait return promptly with
/// [`DeviceError::Cancelled`] and discard the frame in flight.
pub trait DeviceSession: Send + Sync {
    /// Whether the link to the camera is up.
    fn is_connected(&self) -> bool;

    /// Static capability record.
    fn capabilities(&self) -> Result<Capabilities, DeviceError>;

    /// Readout modes the sensor offers.
    fn sensor_modes(&self) -> Result<Vec<SensorMode>, DeviceError>;

    /// Push the validated settings to the camera registers.
    fn apply_settings(
        &self,
        settings: &SessionSettings,
        geometry: &FrameGeometry,
    ) -> Result<(), DeviceError>;

    /// Start exposing `frame_count` frames (0 = until stopped).
    fn start_exposure(&self, frame_count: u32) -> Result<(), DeviceError>;

    /// Force a trigger while waiting for an external trigger.
    fn trigger(&self) -> Result<(), DeviceError>;

    /// Finish the current exposure early; the frame stays retrievable.
    fn end_exposure(&self) -> Result<(), DeviceError>;

    /// Cancel the current exposure and discard any partial frame.
    fn abort_exposure(&self) -> Result<(), DeviceError>;

    /// Release capture resources on the camera.
    fn stop_exposure(&self) -> Result<(), DeviceError>;

    /// Non-blocking query: is a complete frame ready for transfer?
    fn frame_available(&self) -> Result<bool, DeviceError>;

    /// Block until the camera signals frame data or `timeout` expires.
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait_frame_signal(&self, timeout: Duration) -> Result<bool, DeviceError>;

    /// Transfer one frame into `buf`, waiting at most `timeout` for data.
    ///
    /// Returns the number of bytes received.
    fn read_frame(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError>;
}
