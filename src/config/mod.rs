//! Module: config
//!
//! Purpose: Typed acquisition configuration for the radar front-end.
//!
//! Architecture:
//! - Compile-time constants: queue sizing, sample clamps, timeouts, board wiring
//! - `ChirpConfig`: transmit waveform timing (validated)
//! - `SamplingConfig`: ADC rate, oversampling, attenuation, pad map (validated)
//! - `settings`: externally owned settings snapshot and its JSON form
//!
//! Safety: Safe. Plain `Copy` values; shared access goes through `settings::SettingsStore`.

pub mod settings;

use crate::hal::adc::{AdcPattern, Attenuation, Pad};
use crate::hal::dac::DAC_MAX_CODE;

pub use settings::{ChirpSettings, SamplingSettings, Settings, SettingsStore};

/// Number of receive channels (I1, Q1, Q2, I2).
pub const CHANNEL_COUNT: usize = 4;

/// Logical channel indices, in wire order.
pub const CHANNEL_I1: usize = 0;
pub const CHANNEL_Q1: usize = 1;
pub const CHANNEL_Q2: usize = 2;
pub const CHANNEL_I2: usize = 3;

/// Lower clamp for samples per channel per chirp.
pub const MIN_SAMPLES_PER_CHIRP: usize = 8;

/// Upper clamp for samples per channel per chirp (bounds record memory).
pub const MAX_SAMPLES_PER_CHIRP: usize = 1024;

/// Maximum raw conversions averaged into one output sample.
pub const MAX_OVERSAMPLE: u32 = 16;

/// Capture queue slots.
pub const QUEUE_CAPACITY: usize = 8;

/// Conversions per DMA frame (16 per channel).
pub const FRAME_CONVERSIONS: usize = CHANNEL_COUNT * 16;

/// ADC result width in bits.
pub const ADC_BIT_WIDTH: u8 = 12;

/// Supported continuous conversion rate range (ESP32-S3).
pub const ADC_MIN_CONVERSION_HZ: u32 = 611;
pub const ADC_MAX_CONVERSION_HZ: u32 = 83_333;

/// Producer enqueue attempt bound.
pub const ENQUEUE_TIMEOUT_US: u64 = 500;

/// Lock bound inside the reconfiguration timer callback.
pub const RECONFIG_LOCK_TIMEOUT_US: u64 = 5_000;

/// Lock bound when the sampler starts a capture window.
pub const CYCLE_LOCK_TIMEOUT_US: u64 = 2_000;

/// Longest wait for a chirp start before the cycle is abandoned.
pub const CHIRP_WAIT_TIMEOUT_US: u64 = 1_000_000;

/// Longest wait for the network send gate.
pub const SEND_GATE_TIMEOUT_US: u64 = 100_000;

/// Settings store lock bound.
pub const SETTINGS_LOCK_TIMEOUT_US: u64 = 2_000;

/// Reconfiguration poll period.
pub const RECONFIG_PERIOD_US: u64 = 1_000_000;

/// Radar carrier base frequency (Hz), reported in metadata.
pub const BASE_FREQUENCY_HZ: i64 = 24_125_000_000;

/// Antenna field of view (degrees), reported in metadata.
pub const X_FOV_DEG: u32 = 80;
pub const Y_FOV_DEG: u32 = 34;

/// Configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Chirp period is zero.
    ZeroPeriod,
    /// `active_us > period_us`.
    ActiveExceedsPeriod,
    /// `steps == 0`.
    ZeroSteps,
    /// `steps > active_us` (tick would be shorter than 1 µs).
    StepsExceedActive,
    /// `2 * padding >= steps`.
    PaddingTooLarge,
    /// Sample rate is zero.
    ZeroSampleRate,
    /// Oversample count outside `1..=MAX_OVERSAMPLE`.
    OversampleOutOfRange,
    /// Attenuation value not one of the supported steps.
    InvalidAttenuation(u32),
    /// The same pad appears twice in the channel map.
    DuplicatePad(u8),
    /// The capture at the ADC's effective rate outlasts the chirp ramp.
    CaptureExceedsChirp,
    /// Malformed settings document.
    Parse,
    /// Settings store lock timed out.
    Busy,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ZeroPeriod => write!(f, "chirp period must be non-zero"),
            Self::ActiveExceedsPeriod => write!(f, "chirp duration exceeds period"),
            Self::ZeroSteps => write!(f, "chirp steps must be non-zero"),
            Self::StepsExceedActive => write!(f, "chirp steps exceed duration in µs"),
            Self::PaddingTooLarge => write!(f, "chirp padding must be less than half the steps"),
            Self::ZeroSampleRate => write!(f, "sample rate must be non-zero"),
            Self::OversampleOutOfRange => {
                write!(f, "oversample count must be in 1..={}", MAX_OVERSAMPLE)
            }
            Self::InvalidAttenuation(v) => write!(f, "invalid attenuation {}", v),
            Self::DuplicatePad(p) => write!(f, "pad {} mapped twice", p),
            Self::CaptureExceedsChirp => write!(f, "capture window exceeds chirp duration"),
            Self::Parse => write!(f, "malformed settings"),
            Self::Busy => write!(f, "settings store busy"),
        }
    }
}

/// Chirp waveform timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChirpConfig {
    /// Full chirp period (µs).
    pub period_us: u32,
    /// Ramp duration within the period (µs).
    pub active_us: u32,
    /// DAC updates emitted across `active_us`.
    pub steps: u32,
    /// Sub-ramp length in steps (0 = single ramp).
    pub padding: u32,
    /// Code increment per step.
    pub resolution: u32,
}

impl ChirpConfig {
    /// Validate and construct.
    pub fn new(
        period_us: u32,
        active_us: u32,
        steps: u32,
        padding: u32,
        resolution: u32,
    ) -> Result<Self, ConfigError> {
        let cfg = Self {
            period_us,
            active_us,
            steps,
            padding,
            resolution,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_us == 0 {
            return Err(ConfigError::ZeroPeriod);
        }
        if self.active_us > self.period_us {
            return Err(ConfigError::ActiveExceedsPeriod);
        }
        if self.steps == 0 {
            return Err(ConfigError::ZeroSteps);
        }
        if self.steps > self.active_us {
            return Err(ConfigError::StepsExceedActive);
        }
        if self.padding.saturating_mul(2) >= self.steps {
            return Err(ConfigError::PaddingTooLarge);
        }
        Ok(())
    }

    /// Timer tick interval: `steps` updates spread evenly over `active_us`.
    #[inline]
    pub fn tick_us(&self) -> u32 {
        (self.active_us / self.steps.max(1)).max(1)
    }

    /// Ticks spent at zero output between ramps.
    ///
    /// Measured from the end of the last ramp tick, so the rounding of
    /// `tick_us` never shifts the cycle by more than one tick.
    #[inline]
    pub fn pause_ticks(&self) -> u32 {
        let tick = self.tick_us();
        (self.period_us - self.steps * tick) / tick
    }

    /// Ticks in one full RAMP + PAUSE cycle.
    #[inline]
    pub fn cycle_ticks(&self) -> u32 {
        self.steps + self.pause_ticks()
    }

    /// DAC code for ramp step `s`, saturated to 12 bits.
    ///
    /// With padding the ramp restarts every `padding` steps, each sub-ramp
    /// stretched by `steps / padding` so it spans the same code range.
    #[inline]
    pub fn code_at(&self, s: u32) -> u16 {
        let level = if self.padding > 0 {
            (s % self.padding).saturating_mul(self.steps / self.padding)
        } else {
            s
        };
        let code = level.saturating_mul(self.resolution);
        code.min(DAC_MAX_CODE as u32) as u16
    }
}

/// Pad → logical channel table.
///
/// Entry `i` is the pad wired to logical channel `i` (I1, Q1, Q2, I2).
/// Explicit rather than an arithmetic offset: the wiring differs between board
/// revisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelMap([Pad; CHANNEL_COUNT]);

impl ChannelMap {
    /// Board wiring: I1=4, Q1=5, Q2=6, I2=7.
    pub const BOARD_DEFAULT: ChannelMap = ChannelMap([Pad(4), Pad(5), Pad(6), Pad(7)]);

    /// Construct, rejecting duplicate pads.
    pub fn new(pads: [Pad; CHANNEL_COUNT]) -> Result<Self, ConfigError> {
        for i in 0..CHANNEL_COUNT {
            for j in (i + 1)..CHANNEL_COUNT {
                if pads[i] == pads[j] {
                    return Err(ConfigError::DuplicatePad(pads[i].0));
                }
            }
        }
        Ok(Self(pads))
    }

    /// Logical channel index for a pad, if mapped.
    #[inline]
    pub fn index_of(&self, pad: Pad) -> Option<usize> {
        self.0.iter().position(|&p| p == pad)
    }

    #[inline]
    pub fn pads(&self) -> [Pad; CHANNEL_COUNT] {
        self.0
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::BOARD_DEFAULT
    }
}

/// ADC sampling parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplingConfig {
    /// Output samples per second, per channel.
    pub sample_rate_hz: u32,
    /// Raw conversions averaged into one output sample.
    pub oversample_count: u32,
    pub attenuation: Attenuation,
    pub channel_map: ChannelMap,
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate_hz == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if self.oversample_count == 0 || self.oversample_count > MAX_OVERSAMPLE {
            return Err(ConfigError::OversampleOutOfRange);
        }
        Ok(())
    }

    /// Output samples per second per channel the ADC actually delivers.
    ///
    /// Lower than `sample_rate_hz` when the requested rate would exceed
    /// `ADC_MAX_CONVERSION_HZ`.
    pub fn effective_rate_hz(&self) -> u32 {
        let per_sample = CHANNEL_COUNT as u32 * self.oversample_count.max(1);
        self.conversion_hz() / per_sample
    }

    /// Samples per channel captured during one chirp's active window.
    ///
    /// Derived from [`effective_rate_hz`](Self::effective_rate_hz) and clamped
    /// to `[MIN_SAMPLES_PER_CHIRP, MAX_SAMPLES_PER_CHIRP]`.
    pub fn samples_per_chirp(&self, chirp: &ChirpConfig) -> usize {
        let raw = self.effective_rate_hz() as u64 * chirp.active_us as u64 / 1_000_000;
        (raw.min(MAX_SAMPLES_PER_CHIRP as u64) as usize).max(MIN_SAMPLES_PER_CHIRP)
    }

    /// Time the ADC needs to fill one record, in µs (rounded up).
    pub fn capture_window_us(&self, chirp: &ChirpConfig) -> u64 {
        let conversions = self.samples_per_chirp(chirp) as u64
            * CHANNEL_COUNT as u64
            * self.oversample_count.max(1) as u64;
        (conversions * 1_000_000).div_ceil(self.conversion_hz() as u64)
    }

    /// Reject pairings whose capture cannot finish within the ramp.
    pub fn check_window(&self, chirp: &ChirpConfig) -> Result<(), ConfigError> {
        if self.capture_window_us(chirp) > chirp.active_us as u64 {
            return Err(ConfigError::CaptureExceedsChirp);
        }
        Ok(())
    }

    /// Total conversion rate across all pattern slots.
    pub fn conversion_hz(&self) -> u32 {
        let hz = self.sample_rate_hz as u64 * CHANNEL_COUNT as u64 * self.oversample_count as u64;
        hz.clamp(ADC_MIN_CONVERSION_HZ as u64, ADC_MAX_CONVERSION_HZ as u64) as u32
    }

    /// Continuous-mode pattern for this configuration.
    pub fn adc_pattern(&self) -> AdcPattern {
        AdcPattern {
            pads: self.channel_map.pads(),
            attenuation: self.attenuation,
            bit_width: ADC_BIT_WIDTH,
            conversion_hz: self.conversion_hz(),
            frame_conversions: FRAME_CONVERSIONS,
        }
    }

    /// True if any field that requires an ADC/calibration rebuild differs.
    #[inline]
    pub fn requires_rebuild(&self, other: &SamplingConfig) -> bool {
        self.sample_rate_hz != other.sample_rate_hz
            || self.oversample_count != other.oversample_count
            || self.attenuation != other.attenuation
            || self.channel_map != other.channel_map
    }
}
