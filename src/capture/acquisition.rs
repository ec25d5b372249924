//! The polling producer: owns the hardware handle on a dedicated thread and
//! refreshes the shared mailbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::capture::source::HardwareSource;
use crate::error::{AcquireError, SourceError};
use crate::pipeline::mailbox::{FrameMailbox, Publish};
use crate::AcquisitionConfig;

/// Handle to the running polling thread.
///
/// Shutdown is explicit and awaitable: `stop` sets the flag and joins, so
/// once it returns no further publish can race a store finalization.
pub struct AcquisitionLoop {
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<Result<(), AcquireError>>,
}

impl AcquisitionLoop {
    /// Spawns the polling thread. The source handle moves in and is never
    /// touched from anywhere else while the loop runs.
    pub fn start(
        source: Box<dyn HardwareSource>,
        mailbox: Arc<FrameMailbox>,
        config: AcquisitionConfig,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::spawn(move || run(source, mailbox, config, flag));
        Self { stop, thread }
    }

    /// True once the loop thread has exited, whether cleanly or with an
    /// acquisition error.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Requests termination and joins the loop thread, returning its final
    /// outcome. Does not return before the thread has actually exited.
    pub fn stop(self) -> Result<(), AcquireError> {
        self.stop.store(true, Ordering::Release);
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(_) => Err(AcquireError::Source("acquisition thread panicked".into())),
        }
    }
}

fn run(
    mut source: Box<dyn HardwareSource>,
    mailbox: Arc<FrameMailbox>,
    config: AcquisitionConfig,
    stop: Arc<AtomicBool>,
) -> Result<(), AcquireError> {
    let poll_interval = config.poll_interval();
    let pull_timeout = config.pull_timeout();
    let mut consecutive_timeouts = 0u32;
    info!(?poll_interval, ?pull_timeout, "acquisition loop started");

    let outcome = loop {
        if stop.load(Ordering::Acquire) {
            break Ok(());
        }
        let iteration_start = Instant::now();
        match source.pull_next(pull_timeout) {
            Ok(raw) => {
                consecutive_timeouts = 0;
                match mailbox.publish(raw) {
                    Publish::Stored { sequence_id } => {
                        counter!("selene_frames_published").increment(1);
                        debug!(sequence_id, "published frame");
                    }
                    Publish::Duplicate { hardware_frame_id } => {
                        counter!("selene_frames_duplicate").increment(1);
                        warn!(hardware_frame_id, "duplicate delivery from source, not published");
                    }
                }
            }
            Err(SourceError::Timeout) => {
                consecutive_timeouts += 1;
                counter!("selene_pull_timeouts").increment(1);
                warn!(consecutive_timeouts, "frame pull timed out");
                if consecutive_timeouts >= config.max_consecutive_timeouts {
                    error!(
                        ceiling = config.max_consecutive_timeouts,
                        "timeout ceiling reached, stopping acquisition"
                    );
                    break Err(AcquireError::TimeoutCeiling(consecutive_timeouts));
                }
            }
            Err(SourceError::Fatal(msg)) => {
                error!(%msg, "fatal source error, stopping acquisition");
                break Err(AcquireError::Source(msg));
            }
        }
        if stop.load(Ordering::Acquire) {
            break Ok(());
        }
        // Rate-limit independently of how fast the source serves frames.
        if let Some(budget) = poll_interval.checked_sub(iteration_start.elapsed()) {
            thread::sleep(budget);
        }
    };
    // whatever ended the loop, downstream must learn of it: waiters parked
    // in wait_for_next are released and recording streams see Closed
    mailbox.close();
    info!(stats = ?mailbox.stats(), valid = source.is_valid(), "acquisition loop exiting");
    outcome
}
