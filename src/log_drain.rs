//! Forward RT log entries to the `log` facade.
//!
//! The capture loop writes into a [`LogStream`]; a low-priority task calls
//! [`drain_into_log`] periodically. On device the facade is backed by
//! `EspLogger`, which writes to the console UART.
//!
//! ```text
//! LogStream ──drain──▶ log::log!(target: "rt", ..) ──▶ EspLogger ──▶ UART0
//! ```

use crate::logging::{LogEntry, LogLevel, LogStream};

/// Log target used for forwarded entries.
pub const RT_TARGET: &str = "rt";

/// How often the drain task reports dropped messages.
pub const DROPPED_REPORT_PERIOD_US: u64 = 10_000_000;

/// Map an RT level to the facade level.
#[inline]
pub fn to_log_level(level: LogLevel) -> log::Level {
    match level {
        LogLevel::Error => log::Level::Error,
        LogLevel::Warn => log::Level::Warn,
        LogLevel::Info => log::Level::Info,
        LogLevel::Debug => log::Level::Debug,
        LogLevel::Trace => log::Level::Trace,
    }
}

fn forward(entry: &LogEntry) {
    log::log!(
        target: RT_TARGET,
        to_log_level(entry.level),
        "[{:10}] {}",
        entry.timestamp_us,
        entry.text()
    );
}

/// Drain every pending entry. Returns the number forwarded.
pub fn drain_into_log<const N: usize>(stream: &LogStream<N>) -> usize {
    let mut count = 0;
    while let Some(entry) = stream.drain() {
        forward(&entry);
        count += 1;
    }
    count
}

/// Periodic drain state: forwards entries and reports drops at most every
/// [`DROPPED_REPORT_PERIOD_US`].
pub struct LogDrain {
    last_report_us: u64,
}

impl LogDrain {
    pub const fn new() -> Self {
        Self { last_report_us: 0 }
    }

    /// Run one drain pass at time `now_us`. Returns entries forwarded.
    pub fn poll<const N: usize>(&mut self, stream: &LogStream<N>, now_us: u64) -> usize {
        let count = drain_into_log(stream);

        if now_us.saturating_sub(self.last_report_us) >= DROPPED_REPORT_PERIOD_US {
            let dropped = stream.take_dropped();
            if dropped > 0 {
                log::warn!(target: RT_TARGET, "dropped {} log messages", dropped);
            }
            self.last_report_us = now_us;
        }
        count
    }
}

impl Default for LogDrain {
    fn default() -> Self {
        Self::new()
    }
}
