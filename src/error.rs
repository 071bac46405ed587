//! Error types for ts-demux-pin.
//!
//! Only a few conditions ever reach the caller:
//! - **Hard errors** ([`DemuxError`]): negotiation failures, capture files
//!   that cannot be opened, samples whose bounds are invalid
//! - **Stream-quality issues** (scrambling, corruption, resync): counted by the
//!   [`PacketProcessor`](crate::PacketProcessor), never escalated
//! - **Capture write failures**: logged, reported as
//!   [`DemuxEvent::CaptureFailed`](crate::DemuxEvent::CaptureFailed), and the
//!   capture is disabled while delivery continues

use std::path::PathBuf;

use crate::format::MediaFormat;

/// Errors surfaced by the demultiplexing node.
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    /// The downstream receiver accepted none of the offered formats.
    #[error("format mismatch: receiver accepts none of {offered:?}")]
    FormatMismatch {
        /// Formats that were offered during negotiation.
        offered: Vec<MediaFormat>,
    },

    /// Forwarding or a buffer pool change was attempted with no downstream.
    #[error("output is not connected")]
    NotConnected,

    /// The capture file could not be created or written.
    #[error("capture file error: {path}: {source}")]
    CaptureIo {
        /// Path of the capture file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A sample was unusable (bad bounds, zero length).
    #[error("invalid sample: {reason}")]
    InvalidSample {
        /// Why the sample was rejected.
        reason: String,
    },
}

impl DemuxError {
    /// Creates a capture I/O error for the given path.
    pub fn capture_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CaptureIo {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid sample error with the given reason.
    pub fn invalid_sample(reason: impl Into<String>) -> Self {
        Self::InvalidSample {
            reason: reason.into(),
        }
    }

    /// Status code reported through the host-facing delivery entry point.
    ///
    /// Negative values denote an unrecoverable local error.
    #[must_use]
    pub fn status(&self) -> i32 {
        match self {
            Self::FormatMismatch { .. } => -2,
            Self::NotConnected => -3,
            Self::CaptureIo { .. } => -4,
            Self::InvalidSample { .. } => -1,
        }
    }
}
