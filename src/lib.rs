pub mod capture;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod session;
pub mod utils;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::frame::{ColorFilter, Frame, FrameShape};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub acquisition: AcquisitionConfig,
    pub recording: RecordingConfig,
}

/// Frame geometry and exposure the session runs with. A real sensor dictates
/// these; the simulated source reads them from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub exposure_us: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Lower bound on the time between two hardware pulls.
    pub poll_interval_ms: u64,
    /// Pull timeout as a multiple of the poll interval.
    pub timeout_multiplier: u32,
    /// Consecutive pull timeouts tolerated before acquisition gives up.
    pub max_consecutive_timeouts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Record every nth hardware frame; 0 records every frame.
    pub skip_every_n: u32,
    /// Depth of the queue feeding the recording worker.
    pub queue_depth: usize,
    /// Flush the metadata sidecar every n appends; 0 flushes only on finalize.
    pub meta_flush_every: u32,
    /// Directory where new stores are created by default.
    pub output_dir: String,
}

impl AcquisitionConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pull_timeout(&self) -> std::time::Duration {
        self.poll_interval() * self.timeout_multiplier.max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                width: 512,
                height: 272,
                exposure_us: 40_000,
            },
            acquisition: AcquisitionConfig {
                poll_interval_ms: 40,
                timeout_multiplier: 5,
                max_consecutive_timeouts: 10,
            },
            recording: RecordingConfig {
                skip_every_n: 0,
                queue_depth: 16,
                meta_flush_every: 64,
                output_dir: "recordings".into(),
            },
        }
    }
}

impl Config {
    /// Loads configuration from an optional TOML file layered over defaults.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder.build()?.try_deserialize()
    }
}
