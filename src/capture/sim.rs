//! Deterministic synthetic source for the demo runner and tests.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, SystemTime};

use bytes::Bytes;

use crate::capture::frame::{ColorFilter, FrameShape};
use crate::capture::source::{HardwareSource, RawFrame};
use crate::error::SourceError;

/// One scripted pull outcome.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// Deliver a frame carrying this hardware id.
    Frame(u64),
    /// Report a pull timeout.
    Timeout,
    /// Report a fatal device error.
    Fatal(String),
}

/// Synthetic camera producing fixed-shape 16-bit frames.
///
/// With no script it delivers an endless in-order id sequence starting at 1.
/// A script (gaps, duplicates, timeouts, fatal errors) takes precedence;
/// once exhausted every further pull times out, as a stalled sensor would.
pub struct SimulatedSource {
    shape: FrameShape,
    exposure_us: u32,
    color_filter: ColorFilter,
    script: Option<VecDeque<SimEvent>>,
    next_auto_id: u64,
    frame_delay: Duration,
    valid: bool,
}

impl SimulatedSource {
    pub fn new(shape: FrameShape) -> Self {
        Self {
            shape,
            exposure_us: 40_000,
            color_filter: ColorFilter::None,
            script: None,
            next_auto_id: 1,
            frame_delay: Duration::ZERO,
            valid: true,
        }
    }

    /// Replaces the endless id sequence with an explicit event script.
    pub fn with_script(mut self, events: impl IntoIterator<Item = SimEvent>) -> Self {
        self.script = Some(events.into_iter().collect());
        self
    }

    /// Convenience for scripting only hardware ids.
    pub fn with_hardware_ids(self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.with_script(ids.into_iter().map(SimEvent::Frame))
    }

    pub fn with_exposure(mut self, exposure_us: u32) -> Self {
        self.exposure_us = exposure_us;
        self
    }

    pub fn with_color_filter(mut self, color_filter: ColorFilter) -> Self {
        self.color_filter = color_filter;
        self
    }

    /// Simulated sensor cadence; each delivered frame takes this long.
    pub fn with_frame_delay(mut self, frame_delay: Duration) -> Self {
        self.frame_delay = frame_delay;
        self
    }

    fn make_frame(&self, hardware_frame_id: u64) -> RawFrame {
        // Deterministic gradient so payloads differ per frame and tests can
        // tell them apart.
        let samples = self.shape.width as usize * self.shape.height as usize;
        let mut data = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let sample = (hardware_frame_id as u16).wrapping_add(i as u16);
            data.extend_from_slice(&sample.to_le_bytes());
        }
        RawFrame {
            hardware_frame_id,
            shape: self.shape,
            pixel_data: Bytes::from(data),
            exposure_us: self.exposure_us,
            color_filter: self.color_filter,
            captured_at: SystemTime::now(),
        }
    }
}

impl HardwareSource for SimulatedSource {
    fn pull_next(&mut self, timeout: Duration) -> Result<RawFrame, SourceError> {
        let event = match self.script.as_mut() {
            Some(script) => script.pop_front().unwrap_or(SimEvent::Timeout),
            None => {
                let id = self.next_auto_id;
                self.next_auto_id += 1;
                SimEvent::Frame(id)
            }
        };
        match event {
            SimEvent::Frame(id) => {
                if !self.frame_delay.is_zero() {
                    thread::sleep(self.frame_delay.min(timeout));
                }
                Ok(self.make_frame(id))
            }
            SimEvent::Timeout => {
                thread::sleep(timeout.min(Duration::from_millis(50)));
                Err(SourceError::Timeout)
            }
            SimEvent::Fatal(msg) => {
                self.valid = false;
                Err(SourceError::Fatal(msg))
            }
        }
    }

    fn current_exposure_us(&self) -> u32 {
        self.exposure_us
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}
