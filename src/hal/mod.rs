//! Hardware Abstraction Layer for the radar front-end.
//!
//! The core never touches vendor APIs directly. Everything hardware-specific
//! sits behind these traits; `platform::esp` implements them on ESP-IDF and the
//! integration tests implement them with scripted doubles.

pub mod adc;
pub mod dac;
pub mod gpio;
pub mod timer;

pub use adc::{
    AdcError, AdcFactory, AdcPattern, Attenuation, CalibrationCurve, CalibrationError,
    CalibrationScheme, ContinuousAdc, Pad, RawConversion,
};
pub use dac::{DacChannel, WaveformOutput};
pub use gpio::EnableOutput;
pub use timer::ChirpTimer;

/// Generic driver error for timer, DAC and GPIO peripherals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Vendor driver returned an error code.
    Driver(i32),
    /// Argument rejected before reaching the driver.
    InvalidArgument,
}

impl core::fmt::Display for HalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Driver(code) => write!(f, "driver error {}", code),
            Self::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

/// Monotonic device clock.
pub trait Clock: Sync {
    /// Microseconds since boot.
    fn now_us(&self) -> u64;

    /// Yield the calling task for about `us`. Never called from interrupt
    /// context.
    ///
    /// The scheduler may round this to whole [`tick_us`](Self::tick_us)
    /// periods, so callers with a sub-tick deadline use [`spin_us`](Self::spin_us).
    fn delay_us(&self, us: u32);

    /// Busy-wait `us` without yielding.
    fn spin_us(&self, us: u32) {
        self.delay_us(us)
    }

    /// Scheduler tick: the granularity of [`delay_us`](Self::delay_us).
    fn tick_us(&self) -> u32 {
        1
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn delay_us(&self, us: u32) {
        (**self).delay_us(us)
    }

    fn spin_us(&self, us: u32) {
        (**self).spin_us(us)
    }

    fn tick_us(&self) -> u32 {
        (**self).tick_us()
    }
}

/// Wait one poll step of at most `step_us`, never past `deadline_us`.
///
/// Yields whole scheduler ticks while at least one fits before the deadline,
/// then spins for the remainder.
pub fn wait_step<C: Clock + ?Sized>(clock: &C, deadline_us: u64, step_us: u32) {
    let remaining = deadline_us.saturating_sub(clock.now_us());
    if remaining == 0 {
        return;
    }
    let tick = u64::from(clock.tick_us().max(1));
    let step = u64::from(step_us.max(1));
    if remaining >= tick {
        // step.max(tick) fits in u32, and so does the result
        let us = step.max(tick).min(remaining) / tick * tick;
        clock.delay_us(us as u32);
    } else {
        clock.spin_us(step.min(remaining) as u32);
    }
}
