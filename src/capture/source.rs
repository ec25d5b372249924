//! The capability boundary between the pipeline and a vendor camera SDK.

use std::time::{Duration, SystemTime};

use bytes::Bytes;

use crate::capture::frame::{ColorFilter, FrameShape};
use crate::error::SourceError;

/// A frame as delivered by the sensor, before the pipeline assigns its own
/// sequence id.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub hardware_frame_id: u64,
    pub shape: FrameShape,
    pub pixel_data: Bytes,
    pub exposure_us: u32,
    pub color_filter: ColorFilter,
    pub captured_at: SystemTime,
}

/// What the pipeline needs from a camera handle.
///
/// The handle is not thread-safe: the acquisition loop owns it exclusively
/// for the lifetime of a session and no other thread may touch it.
pub trait HardwareSource: Send {
    /// Blocks up to `timeout` for the next frame. `SourceError::Timeout`
    /// is retryable; anything else ends the session.
    fn pull_next(&mut self, timeout: Duration) -> Result<RawFrame, SourceError>;

    fn current_exposure_us(&self) -> u32;

    fn is_valid(&self) -> bool;
}
