//! Lock-free SPSC capture queue.
//!
//! Carries completed [`CaptureRecord`]s from the sampler to the streaming
//! consumer.
//!
//! # Architecture
//!
//! ```text
//! ContinuousSampler ──try_enqueue──▶ CaptureQueue ──dequeue──▶ StreamingConsumer
//!   (producer, RT)                   (fixed slots)             (best effort)
//! ```
//!
//! # Rules
//!
//! - Exactly one producer and one consumer (not enforced by the type system)
//! - Only atomic operations for index coordination
//! - The producer never blocks beyond its timeout and never evicts
//! - Overflow drops the newest record: the rejected record is handed back
//!
//! Slots hold the record header only; sample payloads stay on the heap, so the
//! slot footprint is independent of `samples_per_chirp`.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::QUEUE_CAPACITY;
use crate::hal::{wait_step, Clock};
use crate::record::CaptureRecord;
use crate::sync::Notify;

/// Poll interval while the queue is full and the producer still has time.
const FULL_POLL_US: u32 = 50;

const EMPTY_SLOT: Option<CaptureRecord> = None;

/// Fixed-capacity single-producer single-consumer ring of capture records.
///
/// # Memory Ordering
///
/// - Producer publishes a slot with `Release` on `tail`, consumer observes with `Acquire`
/// - Consumer frees a slot with `Release` on `head`, producer observes with `Acquire`
pub struct CaptureQueue<N, const CAP: usize = QUEUE_CAPACITY> {
    slots: UnsafeCell<[Option<CaptureRecord>; CAP]>,

    /// Next slot to read (consumer-owned).
    head: AtomicU32,

    /// Next slot to write (producer-owned).
    tail: AtomicU32,

    /// Records handed back to the producer because the queue stayed full.
    rejected: AtomicU32,

    /// Wakes the blocked consumer.
    available: N,
}

// SAFETY: One producer writes only slot `tail`, one consumer reads only slot
// `head`; they never touch the same slot concurrently because the indices are
// published with Release/Acquire after the slot access.
unsafe impl<N: Notify, const CAP: usize> Sync for CaptureQueue<N, CAP> {}
unsafe impl<N: Notify + Send, const CAP: usize> Send for CaptureQueue<N, CAP> {}

impl<N: Notify, const CAP: usize> CaptureQueue<N, CAP> {
    const MASK: u32 = CAP as u32 - 1;

    /// Create an empty queue.
    ///
    /// # Panics
    ///
    /// Panics at compile time if CAP is not a power of 2.
    pub const fn new(available: N) -> Self {
        assert!(CAP.is_power_of_two(), "Queue capacity must be power of 2");

        Self {
            slots: UnsafeCell::new([EMPTY_SLOT; CAP]),
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            rejected: AtomicU32::new(0),
            available,
        }
    }

    /// Offer a record, retrying until `timeout_us` elapses.
    ///
    /// Never waits past the deadline, even on a tick-granular clock.
    ///
    /// On failure the record is returned; the caller drops it.
    pub fn try_enqueue<C: Clock + ?Sized>(
        &self,
        record: CaptureRecord,
        timeout_us: u64,
        clock: &C,
    ) -> Result<(), CaptureRecord> {
        let mut record = record;
        let deadline = clock.now_us().saturating_add(timeout_us);
        loop {
            match self.push(record) {
                Ok(()) => {
                    self.available.notify();
                    return Ok(());
                }
                Err(back) => record = back,
            }

            if clock.now_us() >= deadline {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(record);
            }
            wait_step(clock, deadline, FULL_POLL_US);
        }
    }

    /// Single non-blocking insertion attempt.
    #[inline]
    fn push(&self, record: CaptureRecord) -> Result<(), CaptureRecord> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= CAP as u32 {
            return Err(record);
        }

        // SAFETY: Single producer; slot `tail` is not visible to the consumer
        // until the Release store below.
        unsafe {
            (*self.slots.get())[(tail & Self::MASK) as usize] = Some(record);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Take the oldest record if one is queued.
    #[inline]
    pub fn try_dequeue(&self) -> Option<CaptureRecord> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        // SAFETY: Single consumer; slot `head` was published by the producer's
        // Release store on `tail`, and the producer won't reuse it until the
        // Release store on `head` below.
        let record = unsafe { (*self.slots.get())[(head & Self::MASK) as usize].take() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        record
    }

    /// Block until a record is available.
    ///
    /// `None` timeout waits forever. Returns `None` only on timeout.
    pub fn dequeue(&self, timeout_us: Option<u64>) -> Option<CaptureRecord> {
        loop {
            if let Some(record) = self.try_dequeue() {
                return Some(record);
            }
            if !self.available.wait(timeout_us) {
                return self.try_dequeue();
            }
        }
    }

    /// Records currently queued.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        CAP
    }

    /// Total records rejected because the queue was full.
    #[inline]
    pub fn rejected(&self) -> u32 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordLedger;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicBool, AtomicU64};

    struct FlagNotify(AtomicBool);

    impl Notify for FlagNotify {
        fn notify(&self) {
            self.0.store(true, Ordering::Release);
        }

        fn wait(&self, _timeout_us: Option<u64>) -> bool {
            self.0.swap(false, Ordering::AcqRel)
        }
    }

    struct StepClock(AtomicU64);

    impl Clock for StepClock {
        fn now_us(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }

        fn delay_us(&self, us: u32) {
            self.0.fetch_add(us as u64, Ordering::Relaxed);
        }
    }

    fn queue<const CAP: usize>() -> CaptureQueue<FlagNotify, CAP> {
        CaptureQueue::new(FlagNotify(AtomicBool::new(false)))
    }

    #[test]
    fn test_fifo_order() {
        let ledger = Arc::new(RecordLedger::new());
        let clock = StepClock(AtomicU64::new(0));
        let q = queue::<4>();

        for i in 0..3u64 {
            let mut rec = CaptureRecord::try_new(32, &ledger).unwrap();
            rec.capture_start_us = i;
            q.try_enqueue(rec, 0, &clock).unwrap();
        }
        assert_eq!(q.len(), 3);

        for i in 0..3u64 {
            assert_eq!(q.try_dequeue().unwrap().capture_start_us, i);
        }
        assert!(q.try_dequeue().is_none());
    }

    #[test]
    fn test_full_returns_record_after_timeout() {
        let ledger = Arc::new(RecordLedger::new());
        let clock = StepClock(AtomicU64::new(0));
        let q = queue::<2>();

        for _ in 0..2 {
            let rec = CaptureRecord::try_new(32, &ledger).unwrap();
            q.try_enqueue(rec, 0, &clock).unwrap();
        }
        let rec = CaptureRecord::try_new(32, &ledger).unwrap();
        let back = q.try_enqueue(rec, 500, &clock);
        assert!(back.is_err());
        assert!(clock.now_us() >= 500);
        assert_eq!(q.rejected(), 1);

        drop(back);
        assert_eq!(ledger.live(), 2);
    }

    #[test]
    fn test_dequeue_wakes_on_notify() {
        let ledger = Arc::new(RecordLedger::new());
        let clock = StepClock(AtomicU64::new(0));
        let q = queue::<2>();

        assert!(q.dequeue(Some(10)).is_none());

        let rec = CaptureRecord::try_new(32, &ledger).unwrap();
        q.try_enqueue(rec, 0, &clock).unwrap();
        assert!(q.dequeue(Some(10)).is_some());
        assert!(q.is_empty());
    }

    #[test]
    fn test_wraparound() {
        let ledger = Arc::new(RecordLedger::new());
        let clock = StepClock(AtomicU64::new(0));
        let q = queue::<2>();

        for i in 0..10u64 {
            let mut rec = CaptureRecord::try_new(32, &ledger).unwrap();
            rec.capture_stop_us = i;
            q.try_enqueue(rec, 0, &clock).unwrap();
            assert_eq!(q.try_dequeue().unwrap().capture_stop_us, i);
        }
        assert_eq!(ledger.live(), 0);
    }
}
