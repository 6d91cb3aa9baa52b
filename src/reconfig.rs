//! Reconfiguration controller: poll-and-diff over the settings snapshot.
//!
//! ```text
//!            ┌──── unchanged ────┐
//!            ▼                   │
//!         ┌──────┐  changed  ┌───┴────────┐
//!  tick ─▶│ IDLE │──────────▶│ REBUILDING │── lock busy: retry next tick
//!         └──────┘           └────────────┘
//! ```
//!
//! Rebuild protocol (under the runtime lock, bounded by
//! `RECONFIG_LOCK_TIMEOUT_US`):
//!
//! 1. Drop calibration profile, drop ADC handle
//! 2. Build calibration for the new attenuation, build ADC for the new pattern
//! 3. Install both, record the new active config, bump the generation
//!
//! A failed build leaves nothing installed and the active config untouched, so
//! the next tick sees the difference again and retries. The sampler skips
//! cycles until it succeeds.

use crate::calibration::CalibrationProfile;
use crate::chirp::ChirpControl;
use crate::config::{ChannelMap, ChirpConfig, ConfigError, SamplingConfig, Settings, SettingsStore};
use crate::config::RECONFIG_LOCK_TIMEOUT_US;
use crate::error::Error;
use crate::fault::{FaultCode, FaultState};
use crate::hal::adc::{AdcError, AdcFactory, CalibrationScheme};
use crate::hal::{Clock, EnableOutput};
use crate::sync::TimedLock;

/// State shared between the controller and the sampler.
///
/// Mutated only while the runtime lock is held.
pub struct RuntimeState<A, K> {
    pub active_sampling: SamplingConfig,
    pub active_chirp: ChirpConfig,
    pub calibration: Option<CalibrationProfile<K>>,
    pub adc: Option<A>,
    /// Bumped on every applied change; the sampler discards a cycle whose
    /// generation moved while it waited for the chirp.
    pub generation: u32,
}

impl<A, K> RuntimeState<A, K> {
    /// Empty state: nothing built yet.
    pub const fn new(sampling: SamplingConfig, chirp: ChirpConfig) -> Self {
        Self {
            active_sampling: sampling,
            active_chirp: chirp,
            calibration: None,
            adc: None,
            generation: 0,
        }
    }

    /// Both hardware handles are present.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.calibration.is_some() && self.adc.is_some()
    }

    #[inline]
    pub fn samples_per_chirp(&self) -> usize {
        self.active_sampling.samples_per_chirp(&self.active_chirp)
    }
}

/// Result of one controller tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconfigOutcome {
    /// Settings match what is active.
    Unchanged,
    /// Changes applied.
    Applied {
        /// ADC and calibration were rebuilt.
        rebuilt: bool,
        /// New chirp timing was published.
        chirp_updated: bool,
    },
    /// Runtime lock not acquired in time; retried next tick.
    Busy,
    /// A build step failed; retried next tick.
    Failed(Error),
    /// Settings failed validation; nothing changed.
    Rejected(ConfigError),
}

/// Shared services the controller borrows.
pub struct ReconfigLinks<'a, A, K, C: ?Sized> {
    pub runtime: &'a TimedLock<RuntimeState<A, K>>,
    pub chirp: &'a ChirpControl,
    pub clock: &'a C,
    pub faults: &'a FaultState,
}

/// Owns the hardware factories and drives rebuilds.
pub struct ReconfigurationController<'a, F, S, E, C>
where
    F: AdcFactory,
    S: CalibrationScheme,
    C: ?Sized,
{
    links: ReconfigLinks<'a, F::Handle, S::Curve, C>,
    adc_factory: F,
    calibration_scheme: S,
    enable: E,
    channel_map: ChannelMap,
    /// Last successfully applied sampling config (controller-side mirror).
    applied_sampling: Option<SamplingConfig>,
    applied_chirp: Option<ChirpConfig>,
    applied_enable: Option<bool>,
    rebuilds: u32,
}

impl<'a, F, S, E, C> ReconfigurationController<'a, F, S, E, C>
where
    F: AdcFactory,
    S: CalibrationScheme,
    E: EnableOutput,
    C: Clock + ?Sized,
{
    pub fn new(
        links: ReconfigLinks<'a, F::Handle, S::Curve, C>,
        adc_factory: F,
        calibration_scheme: S,
        enable: E,
        channel_map: ChannelMap,
    ) -> Self {
        Self {
            links,
            adc_factory,
            calibration_scheme,
            enable,
            channel_map,
            applied_sampling: None,
            applied_chirp: None,
            applied_enable: None,
            rebuilds: 0,
        }
    }

    /// Number of successful ADC/calibration rebuilds.
    #[inline]
    pub fn rebuilds(&self) -> u32 {
        self.rebuilds
    }

    /// First application at startup. Any failure is fatal.
    pub fn bring_up(&mut self, settings: &Settings) -> Result<(), Error> {
        match self.tick(settings) {
            ReconfigOutcome::Unchanged | ReconfigOutcome::Applied { .. } => Ok(()),
            ReconfigOutcome::Busy => Err(Error::Busy),
            ReconfigOutcome::Failed(e) => Err(e),
            ReconfigOutcome::Rejected(e) => Err(Error::Config(e)),
        }
    }

    /// Timer callback body: snapshot the store and tick.
    pub fn poll(&mut self, store: &SettingsStore) -> ReconfigOutcome {
        match store.snapshot(self.links.clock) {
            Ok(settings) => self.tick(&settings),
            Err(_) => {
                log::debug!("settings store busy, skipping tick");
                ReconfigOutcome::Busy
            }
        }
    }

    /// Compare `settings` with what is active and apply the difference.
    pub fn tick(&mut self, settings: &Settings) -> ReconfigOutcome {
        let (chirp, sampling) = match settings.configs(self.channel_map) {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("settings rejected: {}", e);
                return ReconfigOutcome::Rejected(e);
            }
        };

        self.apply_flags(settings);

        let chirp_changed = self.applied_chirp != Some(chirp);
        let sampling_changed = self.applied_sampling != Some(sampling);
        if !chirp_changed && !sampling_changed {
            return ReconfigOutcome::Unchanged;
        }

        let runtime_lock = self.links.runtime;
        let Some(mut runtime) = runtime_lock.lock_timeout(self.links.clock, RECONFIG_LOCK_TIMEOUT_US)
        else {
            self.links.faults.set(FaultCode::LockBusy, 2);
            log::debug!("runtime lock busy, reconfiguration deferred");
            return ReconfigOutcome::Busy;
        };

        if chirp_changed {
            self.links.chirp.publish(&chirp);
            runtime.active_chirp = chirp;
            runtime.generation = runtime.generation.wrapping_add(1);
            self.applied_chirp = Some(chirp);
            log::info!(
                "chirp: period={}us duration={}us steps={} padding={} resolution={}",
                chirp.period_us,
                chirp.active_us,
                chirp.steps,
                chirp.padding,
                chirp.resolution
            );
        }

        if sampling_changed {
            // Release old handles before building new ones.
            runtime.calibration = None;
            runtime.adc = None;

            let built = CalibrationProfile::build(&mut self.calibration_scheme, sampling.attenuation)
                .map_err(Error::from)
                .and_then(|cal| {
                    self.adc_factory
                        .build(&sampling.adc_pattern())
                        .map(|adc| (cal, adc))
                        .map_err(Error::from)
                });

            match built {
                Ok((cal, adc)) => {
                    runtime.calibration = Some(cal);
                    runtime.adc = Some(adc);
                    runtime.active_sampling = sampling;
                    runtime.generation = runtime.generation.wrapping_add(1);
                    self.applied_sampling = Some(sampling);
                    self.rebuilds = self.rebuilds.wrapping_add(1);
                    log::info!(
                        "sampling: {}Hz ({}Hz requested) x{} atten={} ({}Hz conversion)",
                        sampling.effective_rate_hz(),
                        sampling.sample_rate_hz,
                        sampling.oversample_count,
                        sampling.attenuation.raw(),
                        sampling.conversion_hz()
                    );
                }
                Err(e) => {
                    self.applied_sampling = None;
                    let data = match e {
                        Error::Adc(AdcError::Driver(c)) => c as u32,
                        _ => 0,
                    };
                    self.links.faults.set(FaultCode::ReconfigureFailed, data);
                    log::error!("rebuild failed: {}", e);
                    return ReconfigOutcome::Failed(e);
                }
            }
        }

        ReconfigOutcome::Applied {
            rebuilt: sampling_changed,
            chirp_updated: chirp_changed,
        }
    }

    fn apply_flags(&mut self, settings: &Settings) {
        self.links.chirp.set_audible(settings.audible);
        self.links.chirp.set_enabled(settings.enabled);

        if self.applied_enable != Some(settings.enabled) {
            match self.enable.set_enabled(settings.enabled) {
                Ok(()) => {
                    self.applied_enable = Some(settings.enabled);
                    log::info!("radar {}", if settings.enabled { "enabled" } else { "disabled" });
                }
                Err(e) => log::warn!("enable pin: {}", e),
            }
        }
    }
}
