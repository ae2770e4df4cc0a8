//! Configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/flipro.toml` (or a file given explicitly)
//! 2. Environment variables prefixed with `FLIPRO_`, nested with `__`
//!
//! Every section and field has a default, so an empty file (or none at all)
//! yields a working configuration.
//!
//! # Example
//! ```no_run
//! use flipro_daq::config::FliproConfig;
//!
//! # fn main() -> Result<(), flipro_daq::FliproError> {
//! // FLIPRO_STREAM__QUEUE_DEPTH=16 overrides stream.queue_depth
//! let config = FliproConfig::load()?;
//! config.validate()?;
//! println!("queue depth: {}", config.stream.queue_depth);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, FliproError};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use flipro_capture::ControllerSettings;
use flipro_core::LogLevel;
use flipro_storage::StreamConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/flipro.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FliproConfig {
    /// Log level, format and destination
    pub logging: LoggingConfig,
    /// Frame retrieval timing
    pub capture: CaptureConfig,
    /// Disk streaming
    pub stream: StreamSection,
    /// Simulated camera used by the CLI
    pub camera: CameraConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// Newline-delimited JSON
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// none, error, warning, info, debug or trace
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Append to this file instead of writing to stderr
    pub file: Option<PathBuf>,
    /// Include thread names (receiver and persister threads are named)
    pub with_thread_names: bool,
    /// Include source file and line
    pub with_file_and_line: bool,
    /// ANSI colors; ignored for files and JSON
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            file: None,
            with_thread_names: true,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Parsed level, if valid.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        LogLevel::parse(&self.level)
    }
}

/// Frame retrieval timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Share of a retrieval timeout spent waiting before the transfer
    pub pre_wait_fraction: f64,
    /// Poll slice while waiting for an external trigger
    pub external_wait_slice_ms: u64,
    /// Transfer timeout after an external trigger
    pub external_transfer_timeout_ms: u64,
    /// Retrieval timeout used by the CLI
    pub default_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let defaults = ControllerSettings::default();
        Self {
            pre_wait_fraction: defaults.pre_wait_fraction,
            external_wait_slice_ms: duration_ms(defaults.external_wait_slice),
            external_transfer_timeout_ms: duration_ms(defaults.external_transfer_timeout),
            default_timeout_ms: 5000,
        }
    }
}

impl CaptureConfig {
    /// Controller timing built from this section.
    #[must_use]
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            pre_wait_fraction: self.pre_wait_fraction,
            external_wait_slice: Duration::from_millis(self.external_wait_slice_ms),
            external_transfer_timeout: Duration::from_millis(self.external_transfer_timeout_ms),
        }
    }

    /// Retrieval timeout.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Disk streaming configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// Frames allowed between receiver and disk writer
    pub queue_depth: usize,
    /// Bytes per write call
    pub write_chunk_bytes: usize,
    /// Frame file extension
    pub file_extension: String,
    /// Zero padding of frame file sequence numbers
    pub sequence_digits: usize,
    /// Added to the frame interval to form the receive timeout
    pub receive_slack_ms: u64,
    /// Receive timeouts in a row before the stream fails
    pub max_consecutive_timeouts: u32,
}

impl Default for StreamSection {
    fn default() -> Self {
        let defaults = StreamConfig::default();
        Self {
            queue_depth: defaults.queue_depth,
            write_chunk_bytes: defaults.write_chunk_bytes,
            file_extension: defaults.file_extension,
            sequence_digits: defaults.sequence_digits,
            receive_slack_ms: duration_ms(defaults.receive_slack),
            max_consecutive_timeouts: defaults.max_consecutive_timeouts,
        }
    }
}

impl StreamSection {
    /// Engine tuning built from this section.
    #[must_use]
    pub fn engine_config(&self) -> StreamConfig {
        StreamConfig {
            queue_depth: self.queue_depth,
            write_chunk_bytes: self.write_chunk_bytes,
            file_extension: self.file_extension.clone(),
            sequence_digits: self.sequence_digits,
            receive_slack: Duration::from_millis(self.receive_slack_ms),
            max_consecutive_timeouts: self.max_consecutive_timeouts,
        }
    }
}

/// Simulated camera and its capture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Sensor width in pixels
    pub width: u32,
    /// Sensor height in pixels
    pub height: u32,
    /// Bits per pixel
    pub pixel_depth: u32,
    /// Per-frame metadata block
    pub metadata_size: u32,
    /// Exposure time
    pub exposure_ms: u64,
    /// Delay between frames of a sequence
    pub frame_delay_ms: u64,
    /// Select the HDR sensor mode
    pub hdr: bool,
    /// Reference rows read before the image
    pub pre_reference_rows: u32,
    /// Reference rows read after the image
    pub post_reference_rows: u32,
    /// Horizontal and vertical binning
    pub binning: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            pixel_depth: 12,
            metadata_size: 256,
            exposure_ms: 50,
            frame_delay_ms: 0,
            hdr: false,
            pre_reference_rows: 0,
            post_reference_rows: 0,
            binning: 1,
        }
    }
}

impl CameraConfig {
    /// Exposure plus inter-frame delay.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.exposure_ms + self.frame_delay_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl FliproConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment
    ///
    /// Environment variables use the `FLIPRO_` prefix and `__` between keys,
    /// e.g. `FLIPRO_LOGGING__LEVEL=debug`.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Self::figment(path).extract()?;
        Ok(config)
    }

    /// The provider stack behind [`FliproConfig::load_from`].
    #[must_use]
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("FLIPRO_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        if self.logging.log_level().is_none() {
            return Err(FliproError::Configuration(format!(
                "Invalid logging.level '{}'. Must be one of: none, error, warning, info, debug, trace",
                self.logging.level
            )));
        }

        if !(0.0..=1.0).contains(&self.capture.pre_wait_fraction) {
            return Err(FliproError::Configuration(format!(
                "Invalid capture.pre_wait_fraction {}. Must be within 0.0-1.0",
                self.capture.pre_wait_fraction
            )));
        }
        if self.capture.external_wait_slice_ms == 0 {
            return Err(FliproError::Configuration(
                "capture.external_wait_slice_ms must be positive".to_string(),
            ));
        }

        let stream = &self.stream;
        if stream.queue_depth == 0 {
            return Err(FliproError::Configuration(
                "stream.queue_depth must be at least 1".to_string(),
            ));
        }
        if stream.write_chunk_bytes == 0 {
            return Err(FliproError::Configuration(
                "stream.write_chunk_bytes must be positive".to_string(),
            ));
        }
        if stream.file_extension.is_empty()
            || stream.file_extension.contains(['.', '/', '\\'])
        {
            return Err(FliproError::Configuration(format!(
                "Invalid stream.file_extension '{}'",
                stream.file_extension
            )));
        }
        if !(1..=20).contains(&stream.sequence_digits) {
            return Err(FliproError::Configuration(format!(
                "Invalid stream.sequence_digits {}. Must be 1-20",
                stream.sequence_digits
            )));
        }

        let camera = &self.camera;
        if camera.width == 0 || camera.height == 0 {
            return Err(FliproError::Configuration(format!(
                "Invalid camera sensor {}x{}",
                camera.width, camera.height
            )));
        }
        if !(1..=16).contains(&camera.pixel_depth) {
            return Err(FliproError::Configuration(format!(
                "Invalid camera.pixel_depth {}. Must be 1-16",
                camera.pixel_depth
            )));
        }
        if camera.binning == 0 {
            return Err(FliproError::Configuration(
                "camera.binning must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_validate() {
        let config = FliproConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stream.engine_config(), StreamConfig::default());
        assert_eq!(
            config.capture.controller_settings(),
            ControllerSettings::default()
        );
    }

    #[test]
    fn test_load_file_and_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "flipro.toml",
                r#"
                [logging]
                level = "debug"
                format = "json"

                [stream]
                queue_depth = 4
                file_extension = "bin"

                [camera]
                width = 320
                height = 240
                hdr = true
                "#,
            )?;
            jail.set_env("FLIPRO_STREAM__QUEUE_DEPTH", "16");
            jail.set_env("FLIPRO_CAMERA__EXPOSURE_MS", "5");

            let config = FliproConfig::figment("flipro.toml").extract::<FliproConfig>()?;
            assert_eq!(config.logging.log_level(), Some(LogLevel::Debug));
            assert_eq!(config.logging.format, LogFormat::Json);
            assert_eq!(config.stream.queue_depth, 16);
            assert_eq!(config.stream.file_extension, "bin");
            assert_eq!(config.stream.sequence_digits, 8);
            assert_eq!((config.camera.width, config.camera.height), (320, 240));
            assert!(config.camera.hdr);
            assert_eq!(config.camera.exposure_ms, 5);
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = FliproConfig::figment("absent.toml").extract::<FliproConfig>()?;
            assert_eq!(config, FliproConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = FliproConfig::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(FliproError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_stream_values() {
        let mut config = FliproConfig::default();
        config.stream.queue_depth = 0;
        assert!(config.validate().is_err());

        let mut config = FliproConfig::default();
        config.stream.file_extension = "tar.gz".to_string();
        assert!(config.validate().is_err());

        let mut config = FliproConfig::default();
        config.capture.pre_wait_fraction = 1.5;
        assert!(config.validate().is_err());
    }
}
