//! Streaming of raw camera frames to disk.
//!
//! [`StreamEngine`] pulls frames from a [`flipro_capture::CaptureController`]
//! on a dedicated receiver thread and hands them to a persister thread
//! through a bounded queue. Each frame lands in its own file, byte for byte
//! as the camera delivered it. [`StreamStatistics`] can be read at any time
//! and the most recent frame is always available as a preview.
//!
//! Frame ordering on disk is FIFO, and a full queue fails the stream rather
//! than dropping frames.

pub mod engine;
pub mod error;
pub mod preview;
pub mod sink;
pub mod stats;

pub use engine::{EnginePhase, StreamConfig, StreamEngine};
pub use error::{Result, StreamError};
pub use preview::PreviewFrame;
pub use sink::{DiskSink, DiskSinkFactory, FrameSink, SinkFactory, StreamTarget, WriteOutcome};
pub use stats::{StreamStatistics, StreamStatus};
