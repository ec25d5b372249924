//! Single-slot, latest-value-wins buffer between the producer and consumers.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::capture::frame::Frame;
use crate::capture::source::RawFrame;

/// Shared mailbox holding the most recent frame.
///
/// The internal lock is held only for handle swap and accounting, never
/// across pixel copies or disk I/O; consumers clone the cheap `Arc` handle
/// and release the lock before doing real work. Publishing is the single
/// mutation point of the whole pipeline.
pub struct FrameMailbox {
    slot: Mutex<Slot>,
    updated: Condvar,
}

#[derive(Default)]
struct Slot {
    latest: Option<Arc<Frame>>,
    /// 0 until the first publish.
    sequence_id: u64,
    closed: bool,
    accounting: Accounting,
}

/// Gap/duplicate bookkeeping. Lives inside the slot lock so an identity
/// decision can never race the frame it was computed from.
#[derive(Debug, Default)]
struct Accounting {
    expected_next_hardware_id: Option<u64>,
    stats: MailboxStats,
}

/// Snapshot of the mailbox counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStats {
    /// Frames published into the slot.
    pub published: u64,
    /// Hardware ids missing between consecutive deliveries (unintentional
    /// gaps, distinct from recording decimation).
    pub skipped: u64,
    /// Repeated or regressed hardware ids that were not published.
    pub duplicates: u64,
}

/// Outcome of a publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    Stored { sequence_id: u64 },
    /// The source re-delivered a stale buffer; nothing was published and
    /// accounting did not advance.
    Duplicate { hardware_frame_id: u64 },
}

/// Outcome of a bounded wait.
#[derive(Debug)]
pub enum WaitOutcome {
    Frame(Arc<Frame>),
    TimedOut,
    Closed,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            updated: Condvar::new(),
        }
    }

    // A poisoned slot only means a reader panicked while holding the guard;
    // the slot itself is a swap-only handle and stays coherent.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the current frame, assigns the next sequence id and wakes
    /// waiters. O(1) beyond the handle move; never blocks on consumers.
    ///
    /// Hardware ids that repeat or regress are treated as duplicate
    /// deliveries: not published, accounting unchanged. Ids that jump ahead
    /// add the gap size to the skipped counter.
    pub fn publish(&self, raw: RawFrame) -> Publish {
        let mut slot = self.lock();
        match slot.accounting.expected_next_hardware_id {
            Some(expected) if raw.hardware_frame_id < expected => {
                slot.accounting.stats.duplicates += 1;
                return Publish::Duplicate {
                    hardware_frame_id: raw.hardware_frame_id,
                };
            }
            Some(expected) if raw.hardware_frame_id > expected => {
                slot.accounting.stats.skipped += raw.hardware_frame_id - expected;
            }
            _ => {}
        }
        slot.accounting.expected_next_hardware_id = Some(raw.hardware_frame_id + 1);
        slot.accounting.stats.published += 1;
        slot.sequence_id += 1;
        let sequence_id = slot.sequence_id;
        slot.latest = Some(Arc::new(Frame {
            sequence_id,
            hardware_frame_id: raw.hardware_frame_id,
            shape: raw.shape,
            pixel_data: raw.pixel_data,
            exposure_us: raw.exposure_us,
            color_filter: raw.color_filter,
            captured_at: raw.captured_at,
        }));
        self.updated.notify_all();
        Publish::Stored { sequence_id }
    }

    /// Non-blocking read of the current frame. `None` only before the first
    /// publish.
    pub fn try_read(&self) -> Option<(u64, Arc<Frame>)> {
        let slot = self.lock();
        slot.latest
            .as_ref()
            .map(|frame| (slot.sequence_id, Arc::clone(frame)))
    }

    /// Blocks until a frame newer than `since` is available, or the mailbox
    /// is closed.
    pub fn wait_for_next(&self, since: u64) -> Option<Arc<Frame>> {
        let mut slot = self.lock();
        loop {
            if slot.sequence_id > since {
                return slot.latest.clone();
            }
            if slot.closed {
                return None;
            }
            slot = self
                .updated
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// `wait_for_next` with an upper bound, so waiters can periodically
    /// re-check their own stop conditions.
    pub fn wait_for_next_timeout(&self, since: u64, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if slot.sequence_id > since {
                // latest is Some whenever sequence_id > 0
                match slot.latest.clone() {
                    Some(frame) => return WaitOutcome::Frame(frame),
                    None => return WaitOutcome::Closed,
                }
            }
            if slot.closed {
                return WaitOutcome::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (guard, _) = self
                .updated
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }

    /// Marks the mailbox as closed and wakes every waiter. Called at session
    /// stop; a closed mailbox delivers no further frames.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        self.updated.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn stats(&self) -> MailboxStats {
        self.lock().accounting.stats
    }
}

impl Default for FrameMailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-consumer read cursor over a shared mailbox. Reads are monotonic in
/// sequence id; slow consumers observe only the latest frame, never a queue.
pub struct Subscription {
    mailbox: Arc<FrameMailbox>,
    last_seen: u64,
}

impl Subscription {
    pub fn new(mailbox: Arc<FrameMailbox>) -> Self {
        Self {
            mailbox,
            last_seen: 0,
        }
    }

    pub fn try_read(&mut self) -> Option<(u64, Arc<Frame>)> {
        let read = self.mailbox.try_read();
        if let Some((sequence_id, _)) = read {
            self.last_seen = self.last_seen.max(sequence_id);
        }
        read
    }

    /// Blocks until a frame this subscription has not yet seen arrives.
    pub fn wait_for_next(&mut self) -> Option<Arc<Frame>> {
        let frame = self.mailbox.wait_for_next(self.last_seen)?;
        self.last_seen = frame.sequence_id;
        Some(frame)
    }

    pub fn wait_for_next_timeout(&mut self, timeout: Duration) -> WaitOutcome {
        let outcome = self.mailbox.wait_for_next_timeout(self.last_seen, timeout);
        if let WaitOutcome::Frame(frame) = &outcome {
            self.last_seen = frame.sequence_id;
        }
        outcome
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::SystemTime;

    use bytes::Bytes;

    use super::*;
    use crate::capture::frame::{ColorFilter, FrameShape};

    fn raw(hardware_frame_id: u64) -> RawFrame {
        RawFrame {
            hardware_frame_id,
            shape: FrameShape::new(4, 2),
            pixel_data: Bytes::from_static(&[0u8; 16]),
            exposure_us: 1000,
            color_filter: ColorFilter::None,
            captured_at: SystemTime::now(),
        }
    }

    #[test]
    fn try_read_is_none_before_first_publish() {
        let mailbox = FrameMailbox::new();
        assert!(mailbox.try_read().is_none());
    }

    #[test]
    fn latest_wins_without_queueing() {
        let mailbox = FrameMailbox::new();
        for id in 1..=5 {
            mailbox.publish(raw(id));
        }
        let (sequence_id, frame) = mailbox.try_read().unwrap();
        assert_eq!(sequence_id, 5);
        assert_eq!(frame.hardware_frame_id, 5);
    }

    #[test]
    fn sequence_ids_are_monotonic_per_subscription() {
        let mailbox = Arc::new(FrameMailbox::new());
        let mut sub = Subscription::new(Arc::clone(&mailbox));
        let mut previous = 0;
        for id in 1..=10 {
            mailbox.publish(raw(id));
            if let Some((sequence_id, _)) = sub.try_read() {
                assert!(sequence_id >= previous);
                previous = sequence_id;
            }
        }
    }

    #[test]
    fn gap_accounting_counts_missing_ids() {
        let mailbox = FrameMailbox::new();
        for id in [1u64, 2, 5, 6] {
            assert!(matches!(mailbox.publish(raw(id)), Publish::Stored { .. }));
        }
        let stats = mailbox.stats();
        assert_eq!(stats.published, 4);
        assert_eq!(stats.skipped, 2); // ids 3 and 4 never arrived
        assert_eq!(stats.duplicates, 0);
    }

    #[test]
    fn duplicate_and_regressed_ids_are_no_ops() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(raw(4));
        assert!(matches!(
            mailbox.publish(raw(4)),
            Publish::Duplicate {
                hardware_frame_id: 4
            }
        ));
        assert!(matches!(
            mailbox.publish(raw(2)),
            Publish::Duplicate { .. }
        ));
        let stats = mailbox.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.duplicates, 2);
        assert_eq!(stats.skipped, 0);
        // the slot still holds the original frame
        let (sequence_id, frame) = mailbox.try_read().unwrap();
        assert_eq!(sequence_id, 1);
        assert_eq!(frame.hardware_frame_id, 4);
    }

    #[test]
    fn wait_for_next_wakes_on_publish() {
        let mailbox = Arc::new(FrameMailbox::new());
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || mailbox.wait_for_next(0))
        };
        thread::sleep(Duration::from_millis(20));
        mailbox.publish(raw(1));
        let frame = waiter.join().unwrap().unwrap();
        assert_eq!(frame.hardware_frame_id, 1);
    }

    #[test]
    fn close_unblocks_waiters() {
        let mailbox = Arc::new(FrameMailbox::new());
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || mailbox.wait_for_next(0))
        };
        thread::sleep(Duration::from_millis(20));
        mailbox.close();
        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn wait_timeout_reports_elapsed_deadline() {
        let mailbox = FrameMailbox::new();
        assert!(matches!(
            mailbox.wait_for_next_timeout(0, Duration::from_millis(10)),
            WaitOutcome::TimedOut
        ));
    }
}
