//! Recording worker: bridges the frame stream to a store without ever
//! blocking the acquisition thread on disk I/O.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::utils::CachePadded;
use flume::{Receiver, Sender, TrySendError};
use metrics::counter;
use tracing::{error, info, warn};

use crate::capture::frame::{Frame, FrameShape};
use crate::error::{StoreOpenError, StoreWriteError};
use crate::record::store::{FrameMeta, FrameStore};

/// Recording cadence. `skip_every_n == 0` records every frame; otherwise a
/// frame is recorded when its hardware id is a multiple of `skip_every_n`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordPolicy {
    pub skip_every_n: u32,
}

impl RecordPolicy {
    /// Decimation is keyed to the hardware id so the cadence stays stable
    /// across frames the pipeline itself never saw.
    pub fn should_record(&self, hardware_frame_id: u64, ignore_skip: bool) -> bool {
        ignore_skip
            || self.skip_every_n == 0
            || hardware_frame_id % self.skip_every_n as u64 == 0
    }
}

/// Final counts returned by `end` for audit logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordStats {
    /// Frames appended to the store.
    pub recorded: u64,
    /// Frames intentionally not recorded by the skip cadence. Not drops.
    pub decimated: u64,
    /// Frames lost because the writer queue was full.
    pub overflow_dropped: u64,
}

struct Command {
    frame: Arc<Frame>,
    ignore_skip: bool,
}

/// Handle to the single-writer recording worker.
///
/// All appends for the store happen on the worker thread, fed by a bounded
/// queue; that is the whole single-writer discipline.
pub struct RecordingSink {
    tx: Sender<Command>,
    worker: thread::JoinHandle<Result<RecordStats, StoreWriteError>>,
    overflow: Arc<CachePadded<AtomicU64>>,
}

impl RecordingSink {
    /// Opens (or reopens) the store synchronously, so open errors surface to
    /// the caller before any frame is consumed, then starts the worker.
    pub fn begin(
        path: &Path,
        shape: FrameShape,
        policy: RecordPolicy,
        queue_depth: usize,
        meta_flush_every: u32,
    ) -> Result<Self, StoreOpenError> {
        let store = FrameStore::create_or_append(path, shape, meta_flush_every)?;
        let (tx, rx) = flume::bounded(queue_depth.max(1));
        let overflow = Arc::new(CachePadded::new(AtomicU64::new(0)));
        let worker = thread::spawn(move || run_writer(store, rx, policy));
        Ok(Self {
            tx,
            worker,
            overflow,
        })
    }

    /// Enqueues a frame for the writer. Never blocks: a full queue means the
    /// writer is behind, and the frame is dropped with a warning.
    pub fn consume(&self, frame: Arc<Frame>, ignore_skip: bool) {
        match self.tx.try_send(Command { frame, ignore_skip }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
                counter!("selene_sink_overflow").increment(1);
                warn!("recording queue full, dropping frame");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("recording worker already stopped, frame not recorded");
            }
        }
    }

    /// Closes the queue, joins the writer and finalizes the store. Returns
    /// the final counts, or the write error that stopped the worker.
    pub fn end(self) -> Result<RecordStats, StoreWriteError> {
        drop(self.tx);
        let overflow_dropped = self.overflow.load(Ordering::Relaxed);
        match self.worker.join() {
            Ok(Ok(mut stats)) => {
                stats.overflow_dropped = overflow_dropped;
                Ok(stats)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(StoreWriteError::Io(io::Error::new(
                io::ErrorKind::Other,
                "recording worker panicked",
            ))),
        }
    }
}

fn run_writer(
    mut store: FrameStore,
    rx: Receiver<Command>,
    policy: RecordPolicy,
) -> Result<RecordStats, StoreWriteError> {
    let mut stats = RecordStats::default();
    for Command { frame, ignore_skip } in rx.iter() {
        if !policy.should_record(frame.hardware_frame_id, ignore_skip) {
            stats.decimated += 1;
            counter!("selene_frames_decimated").increment(1);
            continue;
        }
        let meta = FrameMeta {
            exposure_us: frame.exposure_us,
            hardware_frame_id: frame.hardware_frame_id,
            color_filter: frame.color_filter,
        };
        if let Err(err) = store.append(&frame.pixel_data, meta) {
            error!(%err, "append failed, closing the store with what is on disk");
            // keep everything recorded so far readable
            if let Err(fin_err) = store.finalize() {
                warn!(%fin_err, "best-effort finalize after append failure also failed");
            }
            return Err(err);
        }
        stats.recorded += 1;
        counter!("selene_frames_recorded").increment(1);
    }
    store.finalize()?;
    info!(?stats, "recording worker finished");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use bytes::Bytes;

    use super::*;
    use crate::capture::frame::ColorFilter;

    fn frame(shape: FrameShape, hardware_frame_id: u64) -> Arc<Frame> {
        Arc::new(Frame {
            sequence_id: hardware_frame_id,
            hardware_frame_id,
            shape,
            pixel_data: Bytes::from(vec![hardware_frame_id as u8; shape.frame_bytes()]),
            exposure_us: 2000,
            color_filter: ColorFilter::None,
            captured_at: SystemTime::now(),
        })
    }

    #[test]
    fn policy_records_every_frame_when_cadence_is_zero() {
        let policy = RecordPolicy { skip_every_n: 0 };
        for id in 1..=6 {
            assert!(policy.should_record(id, false));
        }
    }

    #[test]
    fn policy_decimates_to_multiples_of_the_cadence() {
        let policy = RecordPolicy { skip_every_n: 3 };
        let recorded: Vec<u64> = (1..=6).filter(|id| policy.should_record(*id, false)).collect();
        assert_eq!(recorded, vec![3, 6]);
    }

    #[test]
    fn ignore_skip_overrides_the_cadence() {
        let policy = RecordPolicy { skip_every_n: 3 };
        assert!(!policy.should_record(4, false));
        assert!(policy.should_record(4, true));
    }

    #[test]
    fn sink_records_with_cadence_and_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let shape = FrameShape::new(4, 2);
        let sink = RecordingSink::begin(&path, shape, RecordPolicy { skip_every_n: 3 }, 16, 0)
            .unwrap();
        for id in 1..=6u64 {
            sink.consume(frame(shape, id), false);
        }
        let stats = sink.end().unwrap();
        assert_eq!(stats.recorded, 2); // ids 3 and 6
        assert_eq!(stats.decimated, 4);
        assert_eq!(stats.overflow_dropped, 0);

        let store = FrameStore::create_or_append(&path, shape, 0).unwrap();
        assert_eq!(store.payload_count(), 2);
        assert_eq!(store.hardware_frame_ids(), &[3, 6]);
    }

    #[test]
    fn sink_records_everything_without_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let shape = FrameShape::new(4, 2);
        let sink =
            RecordingSink::begin(&path, shape, RecordPolicy::default(), 16, 0).unwrap();
        for id in [1u64, 2, 5, 6] {
            sink.consume(frame(shape, id), false);
        }
        let stats = sink.end().unwrap();
        assert_eq!(stats.recorded, 4);
        assert_eq!(stats.decimated, 0);
    }

    #[test]
    fn full_queue_drops_without_blocking_the_caller() {
        use std::time::{Duration, Instant};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        // 2 MiB payloads keep the writer on the disk while the caller floods
        let shape = FrameShape::new(1024, 1024);
        let sink =
            RecordingSink::begin(&path, shape, RecordPolicy::default(), 1, 0).unwrap();
        let big = frame(shape, 1);

        let flood_start = Instant::now();
        for _ in 0..100 {
            sink.consume(Arc::clone(&big), false);
        }
        let flood_elapsed = flood_start.elapsed();
        let stats = sink.end().unwrap();

        // enqueueing is all the caller ever does; with a queue of one the
        // writer cannot keep up and the excess is dropped, not waited for
        assert!(flood_elapsed < Duration::from_secs(1));
        assert!(stats.overflow_dropped > 0);
        assert_eq!(stats.recorded + stats.overflow_dropped, 100);
        assert_eq!(stats.decimated, 0);

        // the store still finalizes aligned
        let store = FrameStore::create_or_append(&path, shape, 0).unwrap();
        assert_eq!(store.payload_count(), stats.recorded);
        assert_eq!(store.hardware_frame_ids().len() as u64, stats.recorded);
        assert_eq!(store.exposure_us().len() as u64, stats.recorded);
    }

    #[test]
    fn open_error_surfaces_before_any_consume() {
        let dir = tempfile::tempdir().unwrap();
        let result = RecordingSink::begin(
            dir.path().join("store").as_path(),
            FrameShape::new(0, 4),
            RecordPolicy::default(),
            4,
            0,
        );
        assert!(matches!(result, Err(StoreOpenError::ZeroArea(_))));
    }
}
