//! Non-blocking log ring for the capture loop.
//!
//! The sampler runs under a chirp deadline and cannot sit on the console
//! UART, so it formats into a fixed slot and moves on. The drain task in
//! [`crate::log_drain`] hands the slots to the `log` facade later.
//!
//! ```text
//! sampler ── rt_warn!() ──▶ LogStream<64> ──▶ LogDrain::poll ──▶ log::warn!
//!            (stack fmt)    (SPSC slots)      (low priority)
//! ```
//!
//! Meant for one producer and one consumer per stream. A push that finds
//! another push in progress, or a full ring, drops the new message and bumps
//! a counter the drain reports periodically.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Longest message kept per slot, in bytes.
pub const MAX_MSG_LEN: usize = 120;

/// Slots in the pipeline's stream.
pub const LOG_BUFFER_SIZE: usize = 64;

/// Severity carried with each slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }
}

/// One formatted message, copied out of the ring by value.
#[derive(Clone, Copy)]
pub struct LogEntry {
    /// Clock reading when the message was formatted.
    pub timestamp_us: u64,
    pub level: LogLevel,
    pub len: u8,
    pub msg: [u8; MAX_MSG_LEN],
}

impl LogEntry {
    pub const EMPTY: Self = Self {
        timestamp_us: 0,
        level: LogLevel::Info,
        len: 0,
        msg: [0; MAX_MSG_LEN],
    };

    /// Message as text, stopping before any incomplete UTF-8 sequence.
    pub fn text(&self) -> &str {
        let bytes = &self.msg[..usize::from(self.len)];
        let valid = match core::str::from_utf8(bytes) {
            Ok(_) => bytes.len(),
            Err(e) => e.valid_up_to(),
        };
        core::str::from_utf8(&bytes[..valid]).unwrap_or_default()
    }

    fn fill(&mut self, timestamp_us: u64, level: LogLevel, msg: &[u8]) {
        let len = msg.len().min(MAX_MSG_LEN);
        self.timestamp_us = timestamp_us;
        self.level = level;
        self.msg[..len].copy_from_slice(&msg[..len]);
        self.len = len as u8;
    }
}

impl Default for LogEntry {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Ring of [`LogEntry`] slots for one producer and one consumer.
///
/// `head` counts pushes and `tail` counts drains; both wrap freely and the
/// slot index is the count masked by `N - 1`. The `writing`/`reading` flags
/// turn a second concurrent producer (or consumer) into a dropped message
/// (or an empty drain) instead of a shared slot.
pub struct LogStream<const N: usize = LOG_BUFFER_SIZE> {
    slots: UnsafeCell<[LogEntry; N]>,
    head: AtomicU32,
    tail: AtomicU32,
    lost: AtomicU32,
    writing: AtomicBool,
    reading: AtomicBool,
}

// SAFETY: holding `writing`, a producer only touches slot `head`, which the
// consumer cannot see until `head` advances (Release). Holding `reading`, the
// consumer only reads slot `tail`, which the producer cannot reuse until
// `tail` advances (Release). The flags admit one of each at a time.
unsafe impl<const N: usize> Sync for LogStream<N> {}
unsafe impl<const N: usize> Send for LogStream<N> {}

impl<const N: usize> LogStream<N> {
    pub const fn new() -> Self {
        assert!(N.is_power_of_two(), "LogStream size must be a power of two");
        Self {
            slots: UnsafeCell::new([LogEntry::EMPTY; N]),
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            lost: AtomicU32::new(0),
            writing: AtomicBool::new(false),
            reading: AtomicBool::new(false),
        }
    }

    #[inline]
    fn claim(flag: &AtomicBool) -> bool {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    fn slot(count: u32) -> usize {
        count as usize & (N - 1)
    }

    /// Queue a message. Returns `false` when the ring is full or another
    /// push is in progress; the message is counted as dropped instead.
    #[inline]
    pub fn push(&self, timestamp_us: u64, level: LogLevel, msg: &[u8]) -> bool {
        if !Self::claim(&self.writing) {
            self.lost.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let head = self.head.load(Ordering::Relaxed);
        let pushed = head.wrapping_sub(self.tail.load(Ordering::Acquire)) < N as u32;
        if pushed {
            // SAFETY: `writing` held, slot not yet published.
            let slot = unsafe { &mut (*self.slots.get())[Self::slot(head)] };
            slot.fill(timestamp_us, level, msg);
            self.head.store(head.wrapping_add(1), Ordering::Release);
        } else {
            self.lost.fetch_add(1, Ordering::Relaxed);
        }

        self.writing.store(false, Ordering::Release);
        pushed
    }

    /// Take the oldest message, if any. `None` as well while another drain
    /// is in progress.
    #[inline]
    pub fn drain(&self) -> Option<LogEntry> {
        if !Self::claim(&self.reading) {
            return None;
        }

        let tail = self.tail.load(Ordering::Relaxed);
        let entry = if tail == self.head.load(Ordering::Acquire) {
            None
        } else {
            // SAFETY: `reading` held, slot published by the producer.
            let entry = unsafe { (*self.slots.get())[Self::slot(tail)] };
            self.tail.store(tail.wrapping_add(1), Ordering::Release);
            Some(entry)
        };

        self.reading.store(false, Ordering::Release);
        entry
    }

    /// Messages dropped since the last [`take_dropped`](Self::take_dropped).
    #[inline]
    pub fn dropped(&self) -> u32 {
        self.lost.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn take_dropped(&self) -> u32 {
        self.lost.swap(0, Ordering::Relaxed)
    }

    #[inline]
    pub fn pending(&self) -> u32 {
        self.head
            .load(Ordering::Acquire)
            .wrapping_sub(self.tail.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn has_entries(&self) -> bool {
        self.pending() > 0
    }
}

impl<const N: usize> Default for LogStream<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// `fmt::Write` over a byte slice that stops at capacity without splitting a
/// character.
struct Truncating<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl fmt::Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// Format `args` into `buf`, truncating at capacity. Returns bytes written.
#[inline]
pub fn format_to_buffer(buf: &mut [u8], args: fmt::Arguments<'_>) -> usize {
    let mut out = Truncating { buf, len: 0 };
    let _ = fmt::write(&mut out, args);
    out.len
}

/// Format on the stack and push into a [`LogStream`].
///
/// Each stream has one producer context; a push racing another push on the
/// same stream is dropped and counted, never interleaved.
///
/// ```ignore
/// rt_log!(LogLevel::Warn, self.links.log, self.now(), "record alloc failed spc={}", spc);
/// ```
#[macro_export]
macro_rules! rt_log {
    ($level:expr, $stream:expr, $timestamp:expr, $($arg:tt)*) => {{
        let mut msg = [0u8; $crate::logging::MAX_MSG_LEN];
        let n = $crate::logging::format_to_buffer(&mut msg, format_args!($($arg)*));
        $stream.push($timestamp, $level, &msg[..n]);
    }};
}

#[macro_export]
macro_rules! rt_error {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::rt_log!($crate::logging::LogLevel::Error, $stream, $timestamp, $($arg)*)
    };
}

#[macro_export]
macro_rules! rt_warn {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::rt_log!($crate::logging::LogLevel::Warn, $stream, $timestamp, $($arg)*)
    };
}

#[macro_export]
macro_rules! rt_debug {
    ($stream:expr, $timestamp:expr, $($arg:tt)*) => {
        $crate::rt_log!($crate::logging::LogLevel::Debug, $stream, $timestamp, $($arg)*)
    };
}
