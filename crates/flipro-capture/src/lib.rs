//! Capture control and image unpacking for FLI Pro cameras.
//!
//! - [`controller`]: the exposure state machine and frame retrieval
//! - [`session`]: settings, geometry and buffers bound to one device
//! - [`unpack`]: raw frame to pixel planes, with pooled buffers
//! - [`stats`]: per-plane statistics over unpacked planes
//! - [`merge`]: HDR channel merging and per-model unpack profiles
//! - [`sim`]: an in-process simulated camera (feature `mock`)
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "mock")]
//! # fn main() -> Result<(), flipro_capture::CaptureError> {
//! use flipro_capture::sim::SimulatedCamera;
//! use flipro_capture::{CaptureSession, ControllerSettings};
//! use flipro_core::LogContext;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let mut session = CaptureSession::open(
//!     Arc::new(SimulatedCamera::new()),
//!     ControllerSettings::default(),
//!     LogContext::current(),
//! )?;
//! let geometry = session.configure()?;
//! let mut raw = vec![0u8; geometry.total_bytes()];
//! session.capture_start(1)?;
//! session.get_video_frame(&mut raw, Duration::from_secs(5))?;
//! session.capture_stop()?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "mock"))]
//! # fn main() {}
//! ```

pub mod controller;
pub mod error;
pub mod merge;
pub mod session;
#[cfg(feature = "mock")]
pub mod sim;
pub mod state;
pub mod stats;
pub mod unpack;

pub use controller::{CaptureController, CapturePlan, ControllerSettings};
pub use error::{CaptureError, Result, UnpackError};
pub use merge::{ChannelOrder, HighPreferredMerge, MergePolicy, ModelProfile};
pub use session::{CaptureSession, UnpackedRetrieval};
pub use state::CaptureState;
pub use stats::{PlaneStatistics, StatsRequest, UnpackedStats};
pub use unpack::{ImageUnpacker, PlaneKind, PlaneRequest, ProcessedMetadata, UnpackedImageSet};
