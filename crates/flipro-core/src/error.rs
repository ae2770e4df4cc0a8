//! Error types shared by every layer of the capture stack.
//!
//! Each failure is classified into one of six categories so callers can
//! decide how to react without matching on individual variants:
//!
//! - **Configuration**: an invalid geometry or mode combination, detected
//!   before any transfer takes place. No side effects.
//! - **Transport**: link failure or a stalled pipe, detected during transfer.
//! - **Timing**: a timeout expired with no data.
//! - **Resource**: a buffer could not be sized.
//! - **State**: the operation is not valid for the current state machine position.
//! - **FatalStream**: disk exhaustion or desynchronization while streaming;
//!   the stream must be stopped and reinitialized.
//!
//! Crates further up the stack define their own error enums and expose the
//! same `category()` accessor.

use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Coarse classification of every error in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid geometry or mode combination.
    Configuration,
    /// Link failure or stalled transfer.
    Transport,
    /// No data arrived before the deadline.
    Timing,
    /// A buffer could not be allocated or sized.
    Resource,
    /// Operation not valid in the current state.
    State,
    /// Unrecoverable streaming failure.
    FatalStream,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Timing => "timing",
            ErrorCategory::Resource => "resource",
            ErrorCategory::State => "state",
            ErrorCategory::FatalStream => "fatal_stream",
        };
        write!(f, "{}", label)
    }
}

// =============================================================================
// Geometry Errors
// =============================================================================

/// Rejected frame geometry. Always a configuration error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// Zero width or height requested.
    #[error("Image area must be non-empty, got {width}x{height}")]
    EmptyArea {
        /// Requested width in sensor pixels
        width: u32,
        /// Requested height in sensor pixels
        height: u32,
    },

    /// The image area does not fit on the sensor.
    #[error(
        "Image area {width}x{height} at ({col_offset},{row_offset}) exceeds sensor maximum {max_width}x{max_height}"
    )]
    AreaOutOfBounds {
        /// Start column
        col_offset: u32,
        /// Start row
        row_offset: u32,
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
        /// Sensor width limit
        max_width: u32,
        /// Sensor height limit
        max_height: u32,
    },

    /// The binning pair is not listed in the binning table.
    #[error("Binning {horizontal}x{vertical} is not supported by this camera")]
    UnsupportedBinning {
        /// Horizontal binning factor
        horizontal: u32,
        /// Vertical binning factor
        vertical: u32,
    },

    /// Binning leaves no output pixels in one direction.
    #[error("Binning {horizontal}x{vertical} leaves no pixels in a {width}x{height} area")]
    BinnedAreaEmpty {
        /// Horizontal binning factor
        horizontal: u32,
        /// Vertical binning factor
        vertical: u32,
        /// Area width
        width: u32,
        /// Area height
        height: u32,
    },

    /// The pixel depth is not in the capability bitmask.
    #[error("Pixel depth {depth} is not available (depth mask {mask:#010x})")]
    UnsupportedPixelDepth {
        /// Requested depth in bits
        depth: u32,
        /// Capability bitmask of allowed depths
        mask: u32,
    },

    /// The LSB offset pushes the sample outside its container.
    #[error("Pixel LSB offset {lsb_offset} with depth {depth} does not fit a {container_bits}-bit sample")]
    InvalidLsbOffset {
        /// Requested LSB offset
        lsb_offset: u32,
        /// Requested depth
        depth: u32,
        /// Width of the sample container
        container_bits: u32,
    },

    /// More pre-frame reference rows than the hardware supports.
    #[error("{requested} pre-frame reference rows requested, maximum is {max}")]
    TooManyPreReferenceRows {
        /// Requested rows
        requested: u32,
        /// Capability limit
        max: u32,
    },

    /// More post-frame reference rows than any frame may carry.
    #[error("{requested} post-frame reference rows requested, maximum is {max}")]
    TooManyPostReferenceRows {
        /// Requested rows
        requested: u32,
        /// Hard limit
        max: u32,
    },

    /// The sensor mode index is not in the camera's mode list.
    #[error("Sensor mode {index} does not exist (camera reports {count} modes)")]
    UnknownSensorMode {
        /// Requested mode index
        index: u32,
        /// Number of modes the camera reports
        count: usize,
    },

    /// The computed byte count does not fit in memory addressing.
    #[error("Frame size overflows: {detail}")]
    Overflow {
        /// Which term overflowed
        detail: &'static str,
    },
}

impl GeometryError {
    /// Geometry problems are always detected before transfer.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

// =============================================================================
// Device Errors
// =============================================================================

/// Failures reported by the device transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device handle is closed or the cable was pulled.
    #[error("No camera connection")]
    NotConnected,

    /// The transfer primitive timed out with no data.
    #[error("Transfer timed out after {timeout_ms} ms")]
    Timeout {
        /// Effective timeout in milliseconds
        timeout_ms: u64,
    },

    /// The transfer was cancelled by an abort request.
    #[error("Transfer cancelled by abort")]
    Cancelled,

    /// Link level failure (USB stall, fibre loss of sync).
    #[error("Link failure: {0}")]
    Link(String),

    /// Fewer bytes arrived than the frame geometry requires.
    #[error("Short transfer: expected {expected} bytes, received {received}")]
    ShortTransfer {
        /// Bytes the geometry requires
        expected: usize,
        /// Bytes actually received
        received: usize,
    },

    /// The device refused a command.
    #[error("Device rejected '{command}': {message}")]
    Rejected {
        /// Command name
        command: &'static str,
        /// Device supplied reason
        message: String,
    },
}

impl DeviceError {
    /// Maps the transport failure onto the shared taxonomy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            DeviceError::Timeout { .. } => ErrorCategory::Timing,
            DeviceError::Cancelled => ErrorCategory::State,
            DeviceError::Rejected { .. } => ErrorCategory::Configuration,
            DeviceError::NotConnected | DeviceError::Link(_) | DeviceError::ShortTransfer { .. } => {
                ErrorCategory::Transport
            }
        }
    }
}

// =============================================================================
// Text Errors
// =============================================================================

/// A text value failed boundary validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TextError {
    /// Longer than the fixed field it must fit into.
    #[error("{field} is {len} characters long, at most {max} are allowed")]
    TooLong {
        /// Field being validated
        field: &'static str,
        /// Character count of the rejected value
        len: usize,
        /// Maximum character count
        max: usize,
    },

    /// Empty values are not meaningful for this field.
    #[error("{field} must not be empty")]
    Empty {
        /// Field being validated
        field: &'static str,
    },

    /// Embedded NUL would truncate the value on the wire.
    #[error("{field} contains a NUL character")]
    InteriorNul {
        /// Field being validated
        field: &'static str,
    },
}

impl TextError {
    /// Text is always validated at the boundary, before any transfer.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}
