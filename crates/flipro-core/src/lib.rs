//! Core types for the FLI Pro capture stack.
//!
//! This crate holds everything the capture, unpacking and streaming layers
//! agree on:
//!
//! - [`capabilities`]: what the connected camera can do
//! - [`settings`]: what the session has configured
//! - [`geometry`]: the exact raw frame size and layout those imply
//! - [`device`]: the transport contract implemented by real or simulated cameras
//! - [`error`]: the shared error taxonomy
//! - [`text`]: bounded-length strings validated at the device boundary
//! - [`logging`]: the injectable logging context
//!
//! # Example
//!
//! ```no_run
//! use flipro_core::geometry::FrameGeometry;
//! use flipro_core::settings::SessionSettings;
//! # fn caps() -> flipro_core::capabilities::Capabilities { unimplemented!() }
//!
//! let caps = caps();
//! let settings = SessionSettings::for_capabilities(&caps);
//! let geometry = FrameGeometry::compute(&settings, &caps)?;
//! println!("raw frame is {} bytes", geometry.total_bytes());
//! # Ok::<(), flipro_core::error::GeometryError>(())
//! ```

pub mod capabilities;
pub mod device;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod settings;
pub mod text;

pub use capabilities::Capabilities;
pub use device::DeviceSession;
pub use error::{DeviceError, ErrorCategory, GeometryError, TextError};
pub use geometry::FrameGeometry;
pub use logging::{LogContext, LogLevel};
pub use settings::SessionSettings;
