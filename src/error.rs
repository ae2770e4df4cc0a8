//! Application error type.
//!
//! `FliproError` collects the errors of the member crates so that an
//! application built on `flipro_daq` can use `?` across capture, unpacking,
//! streaming and configuration:
//!
//! - **`Capture`** / **`Unpack`**: exposure control and frame decoding
//! - **`Stream`**: the frame-to-disk engine
//! - **`Config`**: figment extraction failures (missing file, bad types)
//! - **`Configuration`**: values that parse but make no sense, caught by
//!   `FliproConfig::validate`
//! - **`LogFile`**: the configured log file cannot be opened

use flipro_capture::{CaptureError, UnpackError};
use flipro_core::{ErrorCategory, GeometryError, TextError};
use flipro_storage::StreamError;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, FliproError>;

/// Any failure surfaced by the `flipro_daq` library.
#[derive(Error, Debug)]
pub enum FliproError {
    /// The configuration could not be extracted
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A configuration value is out of range
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The log file could not be opened for appending
    #[error("Cannot open log file {path:?}: {source}")]
    LogFile {
        /// Configured log file
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// Capture control failed
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// A frame could not be unpacked
    #[error(transparent)]
    Unpack(#[from] UnpackError),

    /// Streaming to disk failed
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Settings describe an impossible frame
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// A path or name exceeds its limit
    #[error(transparent)]
    Text(#[from] TextError),
}

impl From<figment::Error> for FliproError {
    fn from(err: figment::Error) -> Self {
        FliproError::Config(Box::new(err))
    }
}

impl FliproError {
    /// Position in the shared error taxonomy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            FliproError::Config(_) | FliproError::Configuration(_) => ErrorCategory::Configuration,
            FliproError::LogFile { .. } => ErrorCategory::Resource,
            FliproError::Capture(err) => err.category(),
            FliproError::Unpack(err) => err.category(),
            FliproError::Stream(err) => err.category(),
            FliproError::Geometry(_) => ErrorCategory::Configuration,
            FliproError::Text(err) => err.category(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_follows_source() {
        let err = FliproError::from(CaptureError::Timeout { timeout_ms: 5 });
        assert_eq!(err.category(), ErrorCategory::Timing);

        let err = FliproError::from(StreamError::Stalled { count: 4 });
        assert_eq!(err.category(), ErrorCategory::FatalStream);

        let err = FliproError::Configuration("queue_depth must be at least 1".into());
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }
}
