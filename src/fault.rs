//! Recoverable fault bookkeeping.
//!
//! Nothing here stops acquisition. A fault means one cycle (or one record)
//! was lost; the pipeline records what happened and carries on. The last
//! fault is kept with a small data word, and every kind has its own
//! counter so a flaky client shows up differently from a failing ADC.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

/// What went wrong. The `data` word recorded alongside is noted per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultCode {
    None = 0,
    /// Record buffers unavailable. Data: samples per chirp.
    AllocationFailed = 1,
    /// ADC left the running state during a capture.
    AdcInvalidState = 2,
    /// Data: driver error code, 0 when stopping failed.
    AdcDriver = 3,
    /// Record dropped at the queue. Data: samples per chirp.
    QueueFull = 4,
    /// Client send failed and the link was unbound.
    SendFailed = 5,
    /// Data: ADC driver error code, otherwise 0.
    ReconfigureFailed = 6,
    /// No chirp start seen in time.
    ChirpTimeout = 7,
    /// Runtime lock not taken in time. Data: 0/1 sampler phase, 2 reconfig.
    LockBusy = 8,
}

/// Counted kinds, in discriminant order.
const KINDS: [FaultCode; 8] = [
    FaultCode::AllocationFailed,
    FaultCode::AdcInvalidState,
    FaultCode::AdcDriver,
    FaultCode::QueueFull,
    FaultCode::SendFailed,
    FaultCode::ReconfigureFailed,
    FaultCode::ChirpTimeout,
    FaultCode::LockBusy,
];

/// Number of counted kinds (`None` excluded).
pub const FAULT_KINDS: usize = KINDS.len();

impl FaultCode {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::None,
            n => KINDS.get(usize::from(n) - 1).copied().unwrap_or(Self::None),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AllocationFailed => "record allocation failed",
            Self::AdcInvalidState => "adc not running",
            Self::AdcDriver => "adc driver error",
            Self::QueueFull => "capture queue full",
            Self::SendFailed => "client send failed",
            Self::ReconfigureFailed => "reconfiguration failed",
            Self::ChirpTimeout => "no chirp start",
            Self::LockBusy => "runtime lock busy",
        }
    }

    fn slot(self) -> Option<usize> {
        (self as usize).checked_sub(1)
    }
}

/// Last fault plus per-kind counters, shared by the sampler, consumer and
/// reconfiguration contexts.
pub struct FaultState {
    pending: AtomicBool,
    last_code: AtomicU8,
    last_data: AtomicU32,
    total: AtomicU32,
    by_kind: [AtomicU32; FAULT_KINDS],
}

impl FaultState {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            last_code: AtomicU8::new(FaultCode::None as u8),
            last_data: AtomicU32::new(0),
            total: AtomicU32::new(0),
            by_kind: [const { AtomicU32::new(0) }; FAULT_KINDS],
        }
    }

    #[inline]
    pub fn set(&self, code: FaultCode, data: u32) {
        if let Some(i) = code.slot() {
            self.by_kind[i].fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        self.last_code.store(code as u8, Ordering::Relaxed);
        self.last_data.store(data, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }

    /// A fault was recorded since the last [`clear`](Self::clear) or
    /// [`take`](Self::take).
    #[inline]
    pub fn is_active(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn code(&self) -> FaultCode {
        FaultCode::from_u8(self.last_code.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn data(&self) -> u32 {
        self.last_data.load(Ordering::Relaxed)
    }

    /// Faults since boot.
    #[inline]
    pub fn count(&self) -> u32 {
        self.total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn count_of(&self, code: FaultCode) -> u32 {
        code.slot()
            .map_or(0, |i| self.by_kind[i].load(Ordering::Relaxed))
    }

    /// Drop the active flag; counters keep running.
    #[inline]
    pub fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> FaultSnapshot {
        FaultSnapshot {
            active: self.is_active(),
            code: self.code(),
            data: self.data(),
            count: self.count(),
        }
    }

    /// Snapshot and clear in one step, `None` when nothing new was recorded.
    pub fn take(&self) -> Option<FaultSnapshot> {
        if !self.pending.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(FaultSnapshot {
            active: true,
            code: self.code(),
            data: self.data(),
            count: self.count(),
        })
    }
}

impl Default for FaultState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultSnapshot {
    pub active: bool,
    pub code: FaultCode,
    pub data: u32,
    pub count: u32,
}
