//! Runtime settings: the externally owned snapshot polled by reconfiguration.
//!
//! The control surface replaces the whole document; the reconfiguration
//! controller reads a copy once per tick and diffs it against what is active.
//!
//! JSON form:
//!
//! ```text
//! {
//!   "sampling": { "frequency": 40000, "samples": 2, "attenuation": 3 },
//!   "chirp":    { "prf": 2000, "duration": 1000, "steps": 100, "padding": 0, "resolution": 40 },
//!   "audible": false,
//!   "enabled": true
//! }
//! ```
//!
//! Missing fields take their defaults. `audible`/`enabled` accept `0`/`1` as
//! well as booleans, and `enable` is accepted as an alias of `enabled`.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

use super::{ChannelMap, ChirpConfig, ConfigError, SamplingConfig, SETTINGS_LOCK_TIMEOUT_US};
use crate::hal::adc::Attenuation;
use crate::hal::Clock;
use crate::sync::TimedLock;

/// ADC sampling settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    /// Output samples per second per channel.
    pub frequency: u32,
    /// Oversample count.
    pub samples: u32,
    /// Raw attenuation (0..=3).
    pub attenuation: u32,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            frequency: 40_000,
            samples: 2,
            attenuation: 3,
        }
    }
}

/// Chirp waveform settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChirpSettings {
    /// Chirp period (µs).
    pub prf: u32,
    /// Active ramp time (µs).
    pub duration: u32,
    pub steps: u32,
    pub padding: u32,
    pub resolution: u32,
}

impl Default for ChirpSettings {
    fn default() -> Self {
        Self {
            prf: 2000,
            duration: 1000,
            steps: 100,
            padding: 0,
            resolution: 40,
        }
    }
}

/// Complete runtime settings document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sampling: SamplingSettings,
    pub chirp: ChirpSettings,
    #[serde(deserialize_with = "flag")]
    pub audible: bool,
    #[serde(alias = "enable", deserialize_with = "flag")]
    pub enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sampling: SamplingSettings::default(),
            chirp: ChirpSettings::default(),
            audible: false,
            enabled: true,
        }
    }
}

impl Settings {
    /// Parse a JSON settings document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        serde_json::from_slice(bytes).map_err(|_| ConfigError::Parse)
    }

    /// Validated chirp timing.
    pub fn chirp_config(&self) -> Result<ChirpConfig, ConfigError> {
        ChirpConfig::new(
            self.chirp.prf,
            self.chirp.duration,
            self.chirp.steps,
            self.chirp.padding,
            self.chirp.resolution,
        )
    }

    /// Validated sampling parameters over the given pad map.
    pub fn sampling_config(&self, channel_map: ChannelMap) -> Result<SamplingConfig, ConfigError> {
        let attenuation = Attenuation::from_raw(self.sampling.attenuation)
            .ok_or(ConfigError::InvalidAttenuation(self.sampling.attenuation))?;
        let cfg = SamplingConfig {
            sample_rate_hz: self.sampling.frequency,
            oversample_count: self.sampling.samples,
            attenuation,
            channel_map,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Both configs, checked against each other: the capture has to fit in
    /// the ramp.
    pub fn configs(
        &self,
        channel_map: ChannelMap,
    ) -> Result<(ChirpConfig, SamplingConfig), ConfigError> {
        let chirp = self.chirp_config()?;
        let sampling = self.sampling_config(channel_map)?;
        sampling.check_window(&chirp)?;
        Ok((chirp, sampling))
    }

    /// Validate every field without producing configs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.configs(ChannelMap::BOARD_DEFAULT).map(|_| ())
    }
}

/// Accept `true`/`false` or an integer (non-zero = true).
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    struct FlagVisitor;

    impl<'de> Visitor<'de> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a boolean or 0/1")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
            Ok(v != 0)
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}

/// Shared settings document with a change counter.
///
/// Writers (HTTP handler) replace the whole document; readers take copies.
/// Both sides are bounded by `SETTINGS_LOCK_TIMEOUT_US`.
pub struct SettingsStore {
    current: TimedLock<Settings>,
    revision: AtomicU32,
}

impl SettingsStore {
    pub const fn new(initial: Settings) -> Self {
        Self {
            current: TimedLock::new(initial),
            revision: AtomicU32::new(0),
        }
    }

    /// Copy of the current settings.
    pub fn snapshot<C: Clock + ?Sized>(&self, clock: &C) -> Result<Settings, ConfigError> {
        self.current
            .lock_timeout(clock, SETTINGS_LOCK_TIMEOUT_US)
            .map(|guard| *guard)
            .ok_or(ConfigError::Busy)
    }

    /// Validate and replace the whole document.
    ///
    /// Invalid documents are rejected and the current settings stay in place.
    pub fn replace<C: Clock + ?Sized>(&self, clock: &C, settings: Settings) -> Result<(), ConfigError> {
        settings.validate()?;
        let mut guard = self
            .current
            .lock_timeout(clock, SETTINGS_LOCK_TIMEOUT_US)
            .ok_or(ConfigError::Busy)?;
        *guard = settings;
        self.revision.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Number of accepted replacements.
    #[inline]
    pub fn revision(&self) -> u32 {
        self.revision.load(Ordering::Acquire)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
