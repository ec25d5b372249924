//! Error taxonomy for the acquisition and recording pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::capture::frame::FrameShape;

/// Errors reported by a hardware frame source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No frame arrived within the pull timeout. Retryable.
    #[error("timed out waiting for the next frame")]
    Timeout,
    /// Device-level failure (disconnect, invalid handle). Ends the session.
    #[error("source failure: {0}")]
    Fatal(String),
}

/// Terminal outcome of a failed acquisition loop.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("source failure: {0}")]
    Source(String),
    #[error("{0} consecutive pull timeouts, giving up on the source")]
    TimeoutCeiling(u32),
}

/// Failures opening or creating a frame store. Recording does not start;
/// live viewing is unaffected.
#[derive(Debug, Error)]
pub enum StoreOpenError {
    #[error("frame shape {0} has zero area")]
    ZeroArea(FrameShape),
    #[error("path exists but is not a frame store: {0}")]
    NotAStore(PathBuf),
    #[error("shape mismatch: store holds {stored} frames, session produces {new}")]
    ShapeMismatch { stored: FrameShape, new: FrameShape },
    #[error("unsupported store format version {0}")]
    UnsupportedVersion(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failures while appending to or finalizing an open frame store.
#[derive(Debug, Error)]
pub enum StoreWriteError {
    #[error("payload is {got} bytes, store shape requires {want}")]
    PayloadShape { got: usize, want: usize },
    /// Payload and metadata sequences disagree in length. A programming
    /// defect; the recording session must abort rather than continue with
    /// every subsequent frame misaligned.
    #[error("payload/metadata misalignment: {payloads} payloads vs {metadata} metadata rows")]
    Misaligned { payloads: u64, metadata: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors surfaced by the session control surface.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("acquisition is not running")]
    NotAcquiring,
    #[error("acquisition is already running")]
    AlreadyAcquiring,
    #[error("recording is already in progress")]
    AlreadyRecording,
    #[error("no recording in progress")]
    NotRecording,
    #[error("no frame available from the source")]
    NoFrame,
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error(transparent)]
    StoreOpen(#[from] StoreOpenError),
    #[error(transparent)]
    StoreWrite(#[from] StoreWriteError),
}
