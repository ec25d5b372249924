//! Session control surface: start/stop acquisition, start/stop recording,
//! single-shot snapshot captures.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::capture::acquisition::AcquisitionLoop;
use crate::capture::source::HardwareSource;
use crate::error::{SessionError, StoreWriteError};
use crate::pipeline::mailbox::{FrameMailbox, MailboxStats, Subscription, WaitOutcome};
use crate::record::sink::{RecordPolicy, RecordStats, RecordingSink};
use crate::{AcquisitionConfig, RecordingConfig};

/// How often the recording forwarder re-checks its stop flag while idle.
const FORWARD_POLL: Duration = Duration::from_millis(50);

/// One camera session: a producer loop, a shared mailbox, and at most one
/// recording stream. Multiple sessions can coexist; nothing here is global.
pub struct CameraSession {
    mailbox: Arc<FrameMailbox>,
    acquisition_config: AcquisitionConfig,
    recording_config: RecordingConfig,
    acquisition: Option<AcquisitionLoop>,
    recording: Option<ActiveRecording>,
}

struct ActiveRecording {
    stop: Arc<AtomicBool>,
    // the forwarder owns the sink and finalizes it when the stream ends,
    // whether by stop_recording or by the mailbox closing under it
    forwarder: thread::JoinHandle<Result<RecordStats, StoreWriteError>>,
}

impl CameraSession {
    pub fn new(acquisition_config: AcquisitionConfig, recording_config: RecordingConfig) -> Self {
        Self {
            mailbox: Arc::new(FrameMailbox::new()),
            acquisition_config,
            recording_config,
            acquisition: None,
            recording: None,
        }
    }

    /// Spawns the acquisition loop on a fresh mailbox. The source handle
    /// moves in and stays owned by the loop thread until `stop_acquisition`.
    pub fn start_acquisition(
        &mut self,
        source: Box<dyn HardwareSource>,
    ) -> Result<(), SessionError> {
        if self.acquisition.is_some() {
            return Err(SessionError::AlreadyAcquiring);
        }
        self.mailbox = Arc::new(FrameMailbox::new());
        self.acquisition = Some(AcquisitionLoop::start(
            source,
            Arc::clone(&self.mailbox),
            self.acquisition_config.clone(),
        ));
        info!("acquisition started");
        Ok(())
    }

    /// Stops recording (if active), then joins the acquisition loop and
    /// closes the mailbox. Returns the final drop-accounting counters; a
    /// fatal acquisition error surfaces after cleanup has run.
    pub fn stop_acquisition(&mut self) -> Result<MailboxStats, SessionError> {
        let acquisition = self.acquisition.take().ok_or(SessionError::NotAcquiring)?;
        if self.recording.is_some() {
            // recording must be fully stopped before the loop is joined, so
            // a finalization can never race one last in-flight append
            match self.stop_recording() {
                Ok(stats) => info!(?stats, "recording stopped with acquisition"),
                Err(err) => warn!(%err, "recording did not stop cleanly"),
            }
        }
        let outcome = acquisition.stop();
        self.mailbox.close();
        let stats = self.mailbox.stats();
        info!(?stats, "acquisition stopped");
        outcome?;
        Ok(stats)
    }

    /// True while the loop thread is alive. The loop can end on its own
    /// after a fatal source error; `stop_acquisition` then reports it.
    pub fn is_acquiring(&self) -> bool {
        self.acquisition
            .as_ref()
            .map(|acq| !acq.is_finished())
            .unwrap_or(false)
    }

    /// Read access for display/diagnostics consumers.
    pub fn subscribe(&self) -> Subscription {
        Subscription::new(Arc::clone(&self.mailbox))
    }

    pub fn mailbox_stats(&self) -> MailboxStats {
        self.mailbox.stats()
    }

    /// Opens a store at `path` (shape taken from the current frame) and
    /// spawns the forwarder bridging the mailbox to the recording sink.
    /// Failure to open the store leaves live viewing untouched.
    pub fn start_recording(&mut self, path: &Path) -> Result<(), SessionError> {
        if self.recording.is_some() {
            return Err(SessionError::AlreadyRecording);
        }
        if self.acquisition.is_none() {
            return Err(SessionError::NotAcquiring);
        }
        let mut subscription = self.subscribe();
        let first = self.await_frame(&mut subscription)?;
        let sink = RecordingSink::begin(
            path,
            first.shape,
            RecordPolicy {
                skip_every_n: self.recording_config.skip_every_n,
            },
            self.recording_config.queue_depth,
            self.recording_config.meta_flush_every,
        )?;
        sink.consume(first, false);

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let forwarder = thread::spawn(move || {
            loop {
                if flag.load(Ordering::Acquire) {
                    break;
                }
                match subscription.wait_for_next_timeout(FORWARD_POLL) {
                    WaitOutcome::Frame(frame) => sink.consume(frame, false),
                    WaitOutcome::TimedOut => continue,
                    WaitOutcome::Closed => break,
                }
            }
            // finalize here: a closed mailbox (fatal source error included)
            // flushes metadata without waiting for the controller
            sink.end()
        });
        self.recording = Some(ActiveRecording { stop, forwarder });
        info!(path = %path.display(), "recording started");
        Ok(())
    }

    /// Stops the forwarder, drains the sink and finalizes the store.
    pub fn stop_recording(&mut self) -> Result<RecordStats, SessionError> {
        let recording = self.recording.take().ok_or(SessionError::NotRecording)?;
        recording.stop.store(true, Ordering::Release);
        let stats = recording
            .forwarder
            .join()
            .map_err(|_| {
                SessionError::StoreWrite(StoreWriteError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "recording forwarder panicked",
                )))
            })??;
        info!(?stats, "recording stopped");
        Ok(stats)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Records `count` frames to a dedicated store at `path`, bypassing the
    /// skip cadence (calibration shots must always land on disk).
    pub fn capture_snapshots(&self, path: &Path, count: u32) -> Result<RecordStats, SessionError> {
        if self.acquisition.is_none() {
            return Err(SessionError::NotAcquiring);
        }
        if count == 0 {
            return Ok(RecordStats::default());
        }
        let mut subscription = self.subscribe();
        let first = self.await_frame(&mut subscription)?;
        let sink = RecordingSink::begin(
            path,
            first.shape,
            RecordPolicy {
                skip_every_n: self.recording_config.skip_every_n,
            },
            self.recording_config.queue_depth,
            self.recording_config.meta_flush_every,
        )?;
        sink.consume(first, true);
        for _ in 1..count {
            match subscription.wait_for_next_timeout(self.acquisition_config.pull_timeout()) {
                WaitOutcome::Frame(frame) => sink.consume(frame, true),
                WaitOutcome::TimedOut => {
                    warn!("timed out waiting for a snapshot frame");
                    break;
                }
                WaitOutcome::Closed => break,
            }
        }
        let stats = sink.end()?;
        info!(?stats, path = %path.display(), "snapshots captured");
        Ok(stats)
    }

    /// Latest frame if one exists, otherwise a bounded wait for the first
    /// publish of the session.
    fn await_frame(
        &self,
        subscription: &mut Subscription,
    ) -> Result<Arc<crate::capture::frame::Frame>, SessionError> {
        if let Some((_, frame)) = subscription.try_read() {
            return Ok(frame);
        }
        match subscription.wait_for_next_timeout(self.acquisition_config.pull_timeout()) {
            WaitOutcome::Frame(frame) => Ok(frame),
            WaitOutcome::TimedOut | WaitOutcome::Closed => Err(SessionError::NoFrame),
        }
    }
}
