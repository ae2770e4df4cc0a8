//! Frame sinks: where the persister puts each received frame.
//!
//! [`DiskSink`] writes one file per frame, the raw bytes verbatim, named
//! `{prefix}{sequence}.{extension}` with a zero-padded sequence number.
//! Writes go out in chunks and check the cancel flag between chunks; a
//! cancelled frame's partial file is removed so that only complete frames
//! are ever left on disk.

use crate::error::{Result, StreamError};
use flipro_core::text::{DevicePath, UsbString};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// Outcome of one frame write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The whole frame is persisted
    Written {
        /// Bytes written
        bytes: usize,
    },
    /// The stream stopped mid-write; nothing of this frame remains
    Cancelled,
}

/// Destination of streamed frames.
pub trait FrameSink: Send {
    /// Persist frame `sequence`, giving up early when `cancel` is set.
    fn write_frame(&mut self, sequence: u64, frame: &[u8], cancel: &AtomicBool) -> Result<WriteOutcome>;
}

/// Where and how a stream's files are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    /// Output directory
    pub root: DevicePath,
    /// File name prefix
    pub prefix: UsbString,
    /// Exact size of every frame
    pub frame_bytes: usize,
    /// File extension, without the dot
    pub extension: String,
    /// Zero padding of the sequence number
    pub sequence_digits: usize,
    /// Bytes per write call
    pub write_chunk_bytes: usize,
}

impl StreamTarget {
    /// Path of the file holding frame `sequence`.
    #[must_use]
    pub fn frame_path(&self, sequence: u64) -> PathBuf {
        let name = format!(
            "{}{:0width$}.{}",
            self.prefix.as_str(),
            sequence,
            self.extension,
            width = self.sequence_digits
        );
        Path::new(self.root.as_str()).join(name)
    }
}

/// Builds a fresh sink for every stream start.
pub trait SinkFactory: Send + Sync {
    /// Open a sink for `target`.
    fn open(&self, target: &StreamTarget) -> Result<Box<dyn FrameSink>>;
}

/// Default factory: one file per frame under the target root.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskSinkFactory;

impl SinkFactory for DiskSinkFactory {
    fn open(&self, target: &StreamTarget) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(DiskSink::new(target.clone())?))
    }
}

/// Writes each frame to its own file.
#[derive(Debug)]
pub struct DiskSink {
    target: StreamTarget,
}

impl DiskSink {
    /// Sink for `target`, creating the root directory if needed.
    pub fn new(target: StreamTarget) -> Result<Self> {
        let root = PathBuf::from(target.root.as_str());
        fs::create_dir_all(&root).map_err(|source| StreamError::InvalidRoot {
            path: root.clone(),
            source,
        })?;
        debug!(root = %root.display(), prefix = target.prefix.as_str(), "disk sink ready");
        Ok(Self { target })
    }

    /// Target this sink writes to.
    #[must_use]
    pub fn target(&self) -> &StreamTarget {
        &self.target
    }
}

impl FrameSink for DiskSink {
    fn write_frame(&mut self, sequence: u64, frame: &[u8], cancel: &AtomicBool) -> Result<WriteOutcome> {
        let path = self.target.frame_path(sequence);
        let write_error = |source| StreamError::Write {
            path: path.clone(),
            source,
        };

        let mut file = File::create(&path).map_err(write_error)?;
        for chunk in frame.chunks(self.target.write_chunk_bytes.max(1)) {
            if cancel.load(Ordering::SeqCst) {
                drop(file);
                // Best effort
                let _ = fs::remove_file(&path);
                debug!(sequence, "frame write cancelled");
                return Ok(WriteOutcome::Cancelled);
            }
            if let Err(source) = file.write_all(chunk) {
                drop(file);
                let _ = fs::remove_file(&path);
                return Err(write_error(source));
            }
        }
        file.flush().map_err(write_error)?;

        trace!(sequence, bytes = frame.len(), "frame written");
        Ok(WriteOutcome::Written { bytes: frame.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(root: &Path) -> StreamTarget {
        StreamTarget {
            root: DevicePath::new("root", root.to_string_lossy()).unwrap(),
            prefix: UsbString::new("prefix", "run_").unwrap(),
            frame_bytes: 10,
            extension: "raw".into(),
            sequence_digits: 8,
            write_chunk_bytes: 3,
        }
    }

    #[test]
    fn test_frame_path_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = target(dir.path()).frame_path(42);
        assert_eq!(path.file_name().unwrap(), "run_00000042.raw");
    }

    #[test]
    fn test_writes_frame_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DiskSink::new(target(dir.path())).unwrap();
        let frame: Vec<u8> = (0..10).collect();
        let outcome = sink.write_frame(0, &frame, &AtomicBool::new(false)).unwrap();
        assert_eq!(outcome, WriteOutcome::Written { bytes: 10 });
        assert_eq!(fs::read(dir.path().join("run_00000000.raw")).unwrap(), frame);
    }

    #[test]
    fn test_cancelled_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DiskSink::new(target(dir.path())).unwrap();
        let outcome = sink.write_frame(3, &[0; 10], &AtomicBool::new(true)).unwrap();
        assert_eq!(outcome, WriteOutcome::Cancelled);
        assert!(!dir.path().join("run_00000003.raw").exists());
    }

    #[test]
    fn test_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        DiskSink::new(target(&nested)).unwrap();
        assert!(nested.is_dir());
    }
}
