//! Capture and unpack error types.

use crate::state::CaptureState;
use crate::unpack::PlaneKind;
use flipro_core::{DeviceError, ErrorCategory, GeometryError};
use flipro_pool::PoolError;
use thiserror::Error;

/// Failures of the capture state machine and session control.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The device link is down.
    #[error("No camera connection")]
    NotConnected,

    /// No frame arrived before the deadline. State is unchanged.
    #[error("Timeout: no frame within {timeout_ms} ms")]
    Timeout {
        /// Caller supplied timeout
        timeout_ms: u64,
    },

    /// The destination cannot hold a full frame.
    #[error("Buffer too small: frame needs {required} bytes, buffer holds {provided}")]
    BufferTooSmall {
        /// Bytes the geometry requires
        required: usize,
        /// Bytes the caller supplied
        provided: usize,
    },

    /// The operation is not valid where the state machine currently is.
    #[error("Invalid state for {operation}: capture is {state}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,
        /// State at the time of the call
        state: CaptureState,
    },

    /// Settings changed or were never turned into a geometry.
    #[error("Frame geometry not configured")]
    GeometryNotConfigured,

    /// The exposure was aborted; any partial frame is gone.
    #[error("Capture aborted")]
    Aborted,

    /// The capture sequence is owned by another thread.
    #[error("{operation} must be called from the thread that started the capture")]
    WrongThread {
        /// Rejected operation
        operation: &'static str,
    },

    /// Settings rejected by geometry validation.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// Link failure during a transfer or command.
    #[error("Transport error: {0}")]
    Transport(DeviceError),

    /// A raw frame buffer could not be sized.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl From<DeviceError> for CaptureError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::NotConnected => CaptureError::NotConnected,
            DeviceError::Timeout { timeout_ms } => CaptureError::Timeout { timeout_ms },
            DeviceError::Cancelled => CaptureError::Aborted,
            other => CaptureError::Transport(other),
        }
    }
}

impl CaptureError {
    /// Position in the shared taxonomy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            CaptureError::NotConnected => ErrorCategory::Transport,
            CaptureError::Timeout { .. } => ErrorCategory::Timing,
            CaptureError::BufferTooSmall { .. } | CaptureError::Pool(_) => ErrorCategory::Resource,
            CaptureError::InvalidState { .. }
            | CaptureError::Aborted
            | CaptureError::WrongThread { .. } => ErrorCategory::State,
            CaptureError::GeometryNotConfigured | CaptureError::Geometry(_) => {
                ErrorCategory::Configuration
            }
            CaptureError::Transport(err) => err.category(),
        }
    }
}

/// Result alias for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Failures while decoding a raw frame into planes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnpackError {
    /// The raw buffer is shorter than the geometry says.
    #[error("Raw frame holds {provided} bytes, geometry needs {required}")]
    RawTooShort {
        /// Bytes the geometry requires
        required: usize,
        /// Bytes supplied
        provided: usize,
    },

    /// A plane or histogram buffer could not be sized.
    #[error("Plane buffer could not be sized: {0}")]
    Pool(#[from] PoolError),

    /// No geometry to interpret the raw frame with.
    #[error("Frame geometry not configured")]
    GeometryNotConfigured,

    /// Statistics were requested for a plane that was not unpacked.
    #[error("{0} plane was not unpacked")]
    PlaneMissing(PlaneKind),

    /// Cutoff fractions outside `0 <= lower <= upper <= 1`.
    #[error("Cutoff fractions must satisfy 0 <= lower <= upper <= 1, got {lower}..{upper}")]
    InvalidCutoffs {
        /// Lower fraction
        lower: f64,
        /// Upper fraction
        upper: f64,
    },
}

impl UnpackError {
    /// Position in the shared taxonomy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            UnpackError::RawTooShort { .. } | UnpackError::Pool(_) => ErrorCategory::Resource,
            UnpackError::PlaneMissing(_) => ErrorCategory::State,
            UnpackError::GeometryNotConfigured | UnpackError::InvalidCutoffs { .. } => {
                ErrorCategory::Configuration
            }
        }
    }
}
