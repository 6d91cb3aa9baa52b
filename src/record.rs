//! Capture record: one chirp's worth of calibrated samples.
//!
//! A record is a single owned aggregate. The four channel buffers are reserved
//! together at creation; if any reservation fails nothing is kept. Ownership
//! moves producer → queue → consumer and the record is freed by `Drop`
//! wherever it ends up.
//!
//! # Wire format
//!
//! ```text
//! [I1 × spc][Q1 × spc][Q2 × spc][I2 × spc][start_us][stop_us]
//!   u16 BE    u16 BE    u16 BE    u16 BE    u64 BE    u64 BE
//! ```
//!
//! Total `8 · spc + 16` bytes, no length prefix.

use alloc::collections::TryReserveError;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::CHANNEL_COUNT;

/// Allocation accounting for capture records.
///
/// `allocated == freed + live` holds at every instant.
#[derive(Debug, Default)]
pub struct RecordLedger {
    allocated: AtomicU32,
    freed: AtomicU32,
}

/// Point-in-time copy of a [`RecordLedger`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub allocated: u32,
    pub freed: u32,
}

impl LedgerSnapshot {
    #[inline]
    pub fn live(&self) -> u32 {
        self.allocated.wrapping_sub(self.freed)
    }
}

impl RecordLedger {
    pub const fn new() -> Self {
        Self {
            allocated: AtomicU32::new(0),
            freed: AtomicU32::new(0),
        }
    }

    /// Read both counters. `freed` is read first so `live()` never underflows.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let freed = self.freed.load(Ordering::Acquire);
        let allocated = self.allocated.load(Ordering::Acquire);
        LedgerSnapshot { allocated, freed }
    }

    #[inline]
    pub fn live(&self) -> u32 {
        self.snapshot().live()
    }
}

/// Four equal-length channel buffers plus capture timestamps.
pub struct CaptureRecord {
    channels: [Vec<u16>; CHANNEL_COUNT],
    samples_per_chirp: usize,
    /// Monotonic µs at ADC start.
    pub capture_start_us: u64,
    /// Monotonic µs when the last channel filled.
    pub capture_stop_us: u64,
    ledger: Arc<RecordLedger>,
}

impl CaptureRecord {
    /// Reserve all four channel buffers for `samples_per_chirp` entries each.
    ///
    /// Fails without side effects if any reservation fails.
    pub fn try_new(
        samples_per_chirp: usize,
        ledger: &Arc<RecordLedger>,
    ) -> Result<Self, TryReserveError> {
        let mut channels: [Vec<u16>; CHANNEL_COUNT] = Default::default();
        for buf in channels.iter_mut() {
            buf.try_reserve_exact(samples_per_chirp)?;
        }
        ledger.allocated.fetch_add(1, Ordering::AcqRel);
        Ok(Self {
            channels,
            samples_per_chirp,
            capture_start_us: 0,
            capture_stop_us: 0,
            ledger: Arc::clone(ledger),
        })
    }

    #[inline]
    pub fn samples_per_chirp(&self) -> usize {
        self.samples_per_chirp
    }

    /// Samples captured so far on `channel`.
    #[inline]
    pub fn channel(&self, channel: usize) -> &[u16] {
        &self.channels[channel]
    }

    #[inline]
    pub fn is_channel_full(&self, channel: usize) -> bool {
        self.channels[channel].len() >= self.samples_per_chirp
    }

    /// Append a sample. Returns `false` (and discards it) if the channel is full.
    ///
    /// Never reallocates: capacity was reserved at creation.
    #[inline]
    pub fn push(&mut self, channel: usize, value: u16) -> bool {
        let buf = &mut self.channels[channel];
        if buf.len() >= self.samples_per_chirp {
            return false;
        }
        buf.push(value);
        true
    }

    /// Every channel holds exactly `samples_per_chirp` samples.
    pub fn is_complete(&self) -> bool {
        self.channels
            .iter()
            .all(|buf| buf.len() == self.samples_per_chirp)
    }

    /// Encoded size in bytes.
    #[inline]
    pub fn wire_len(&self) -> usize {
        wire_len(self.samples_per_chirp)
    }

    /// Serialize into `out`, replacing its contents.
    ///
    /// `out` is reused across records; it only grows when a record is larger
    /// than any seen before.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.wire_len());
        for buf in &self.channels {
            for &sample in buf {
                out.extend_from_slice(&sample.to_be_bytes());
            }
        }
        out.extend_from_slice(&self.capture_start_us.to_be_bytes());
        out.extend_from_slice(&self.capture_stop_us.to_be_bytes());
    }
}

impl Drop for CaptureRecord {
    fn drop(&mut self) {
        self.ledger.freed.fetch_add(1, Ordering::AcqRel);
    }
}

impl core::fmt::Debug for CaptureRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CaptureRecord")
            .field("samples_per_chirp", &self.samples_per_chirp)
            .field("capture_start_us", &self.capture_start_us)
            .field("capture_stop_us", &self.capture_stop_us)
            .finish()
    }
}

/// Encoded frame size for `samples_per_chirp` samples per channel.
#[inline]
pub const fn wire_len(samples_per_chirp: usize) -> usize {
    CHANNEL_COUNT * samples_per_chirp * 2 + 16
}
