use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One captured image plus its acquisition-time metadata.
///
/// Created exclusively by the acquisition loop. Once published it is
/// shared read-only behind an `Arc`; consumers that need to transform
/// pixel data clone it first.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic pipeline-assigned counter, gap-free.
    pub sequence_id: u64,
    /// Frame counter as reported by the sensor. May have gaps.
    pub hardware_frame_id: u64,
    pub shape: FrameShape,
    /// Row-major samples, little-endian, `shape.bytes_per_sample` wide.
    pub pixel_data: Bytes,
    pub exposure_us: u32,
    pub color_filter: ColorFilter,
    pub captured_at: SystemTime,
}

/// Fixed frame geometry. A store's shape is set from its first frame and
/// every later payload must match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub bytes_per_sample: u32,
}

impl FrameShape {
    /// Native 16-bit raw sensor samples.
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bytes_per_sample: 2,
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_sample as usize
    }

    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0 || self.bytes_per_sample == 0
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{}B",
            self.width, self.height, self.bytes_per_sample
        )
    }
}

/// Color filter array of the sensor, camera-family dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFilter {
    None,
    BayerRggb,
    BayerBggr,
    BayerGrbg,
    BayerGbrg,
    Cmyg,
    Rgr,
    PolarA,
}

impl ColorFilter {
    /// Stable string form used in the on-disk metadata sequence.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorFilter::None => "none",
            ColorFilter::BayerRggb => "bayer_rggb",
            ColorFilter::BayerBggr => "bayer_bggr",
            ColorFilter::BayerGrbg => "bayer_grbg",
            ColorFilter::BayerGbrg => "bayer_gbrg",
            ColorFilter::Cmyg => "cmyg",
            ColorFilter::Rgr => "rgr",
            ColorFilter::PolarA => "polar_a",
        }
    }
}

impl fmt::Display for ColorFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
