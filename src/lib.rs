//! # flipro_daq
//!
//! Capture and disk-streaming core for FLI Pro scientific cameras.
//!
//! The member crates do the work; this crate ties them to configuration and
//! logging:
//!
//! - [`flipro_core`]: frame geometry, capabilities, settings, device contract
//! - [`flipro_pool`]: reusable frame and plane buffers
//! - [`flipro_capture`]: the exposure state machine, unpacking and statistics
//! - [`flipro_storage`]: streaming frames to disk at frame rate
//!
//! Application-level modules:
//!
//! - [`config`]: figment configuration (`config/flipro.toml` + `FLIPRO_*`)
//! - [`telemetry`]: `tracing` dispatchers built from configuration
//! - [`camera`]: the workflows behind the `flipro` binary
//! - [`error`]: the aggregate [`FliproError`]

pub mod camera;
pub mod config;
pub mod error;
pub mod telemetry;

pub use config::FliproConfig;
pub use error::{AppResult, FliproError};

pub use flipro_capture;
pub use flipro_core;
pub use flipro_pool;
pub use flipro_storage;
