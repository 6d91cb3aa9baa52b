//! Periodic hardware timer driving the chirp generator.

use super::HalError;

/// Hardware timer with periodic alarm.
///
/// The platform registers the chirp ISR context when the timer is created;
/// this trait only covers the control operations the core needs.
pub trait ChirpTimer {
    /// Program the alarm period and start counting.
    fn start(&mut self, tick_us: u32) -> Result<(), HalError>;

    fn stop(&mut self) -> Result<(), HalError>;
}
