//! Stream engine errors.

use flipro_capture::CaptureError;
use flipro_core::{ErrorCategory, TextError};
use flipro_pool::PoolError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the frame-to-disk stream.
#[derive(Error, Debug)]
pub enum StreamError {
    /// `init` has not been called, or `deinit` already ran.
    #[error("Stream engine is not initialized")]
    NotInitialized,

    /// `init` was called twice without `deinit`.
    #[error("Stream engine is already initialized")]
    AlreadyInitialized,

    /// `start` was called while a stream is running.
    #[error("Stream is already running")]
    AlreadyStreaming,

    /// The engine hit a fatal error; only `deinit` and `init` clear it.
    #[error("Stream must be stopped and reinitialized after a fatal error: {reason}")]
    RequiresReinitialize {
        /// The error that ended the last stream
        reason: String,
    },

    /// Frame size of zero.
    #[error("Frame size must be non-zero")]
    InvalidFrameSize,

    /// The capture geometry no longer matches the size given at `init`.
    #[error("Capture produces {actual} byte frames but the stream was initialized for {initialized}")]
    FrameSizeMismatch {
        /// Size given at `init`
        initialized: usize,
        /// Size of the configured capture geometry
        actual: usize,
    },

    /// Root path or file prefix rejected.
    #[error(transparent)]
    Text(#[from] TextError),

    /// The output directory cannot be used.
    #[error("Stream root {path:?} is not usable: {source}")]
    InvalidRoot {
        /// Requested root
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// Writing a frame file failed, usually because the disk is full.
    #[error("Failed to write {path:?}: {source}")]
    Write {
        /// Frame file being written
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// The persister fell further behind than the queue allows.
    #[error("Disk writer fell {queue_depth} frames behind; frame {sequence} has nowhere to go")]
    Backlog {
        /// Configured queue depth
        queue_depth: usize,
        /// Frame that could not be queued
        sequence: u64,
    },

    /// Too many frame intervals passed without a frame.
    #[error("No frame for {count} consecutive intervals")]
    Stalled {
        /// Consecutive timeouts observed
        count: u32,
    },

    /// Preview destination too small for a frame.
    #[error("Preview buffer holds {provided} bytes, frames are {required}")]
    BufferTooSmall {
        /// Frame size
        required: usize,
        /// Destination size
        provided: usize,
    },

    /// A worker thread could not be started.
    #[error("Failed to spawn stream thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Capture control failed.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The frame pool could not be allocated.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl StreamError {
    /// Position in the shared taxonomy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::NotInitialized
            | StreamError::AlreadyInitialized
            | StreamError::AlreadyStreaming => ErrorCategory::State,
            StreamError::RequiresReinitialize { .. }
            | StreamError::Write { .. }
            | StreamError::Backlog { .. }
            | StreamError::Stalled { .. } => ErrorCategory::FatalStream,
            StreamError::InvalidFrameSize
            | StreamError::FrameSizeMismatch { .. }
            | StreamError::InvalidRoot { .. } => ErrorCategory::Configuration,
            StreamError::Text(err) => err.category(),
            StreamError::BufferTooSmall { .. } | StreamError::Spawn(_) => ErrorCategory::Resource,
            StreamError::Capture(err) => err.category(),
            StreamError::Pool(err) => err.category(),
        }
    }
}

/// Result alias for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;
