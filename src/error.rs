//! Crate-level error.
//!
//! Each layer keeps its own error enum; this one wraps them for the paths
//! that cross layers (bring-up, reconfiguration).

use crate::config::ConfigError;
use crate::hal::adc::{AdcError, CalibrationError};
use crate::hal::HalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Config(ConfigError),
    Adc(AdcError),
    Calibration(CalibrationError),
    Hal(HalError),
    /// A timeout-bounded lock was not acquired.
    Busy,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {}", e),
            Self::Adc(e) => write!(f, "adc: {}", e),
            Self::Calibration(e) => write!(f, "calibration: {}", e),
            Self::Hal(e) => write!(f, "hal: {}", e),
            Self::Busy => write!(f, "lock busy"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<AdcError> for Error {
    fn from(e: AdcError) -> Self {
        Self::Adc(e)
    }
}

impl From<CalibrationError> for Error {
    fn from(e: CalibrationError) -> Self {
        Self::Calibration(e)
    }
}

impl From<HalError> for Error {
    fn from(e: HalError) -> Self {
        Self::Hal(e)
    }
}
