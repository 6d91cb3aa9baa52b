//! GPIO HAL for the radar-enable output.

use super::HalError;

/// Radar front-end power/enable pin.
pub trait EnableOutput {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), HalError>;
}

