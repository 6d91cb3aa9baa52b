//! Service wiring for the acquisition pipeline.
//!
//! ```text
//!   ChirpTimer ISR ──▶ ChirpIsr ──notify──▶ ContinuousSampler ──▶ CaptureQueue
//!        ▲                                        │ lock                │
//!        │ ChirpControl                            ▼                     ▼
//!   ReconfigurationController ──lock──▶ RuntimeState          StreamingConsumer
//!        ▲                                                              │
//!   SettingsStore ◀── HTTP /system                         ClientLink ──▶ WebSocket
//! ```
//!
//! `Pipeline` owns every shared service; tasks borrow it. The platform
//! creates one (usually leaked to `'static`), calls [`Pipeline::bring_up`],
//! then spawns the task bodies.

use alloc::string::String;
use alloc::sync::Arc;

use crate::chirp::{ChirpControl, ChirpIsr};
use crate::config::{ChannelMap, ConfigError, Settings, SettingsStore};
use crate::consumer::{ClientLink, FrameSink, SendError, StreamingConsumer};
use crate::error::Error;
use crate::fault::FaultState;
use crate::hal::adc::{AdcFactory, CalibrationScheme};
use crate::hal::{ChirpTimer, Clock, EnableOutput, WaveformOutput};
use crate::log_drain::LogDrain;
use crate::logging::LogStream;
use crate::metadata::Metadata;
use crate::queue::CaptureQueue;
use crate::reconfig::{ReconfigLinks, ReconfigurationController, RuntimeState};
use crate::record::RecordLedger;
use crate::sampler::{ContinuousSampler, SamplerLinks};
use crate::sync::{Notify, TimedLock};

/// Every shared service of the pipeline.
///
/// - `A`: ADC handle, `K`: calibration curve
/// - `Q`: capture-available notifier, `N`: chirp-start notifier
/// - `S`: network client sink
pub struct Pipeline<A, K, Q, N, S> {
    pub runtime: TimedLock<RuntimeState<A, K>>,
    pub queue: CaptureQueue<Q>,
    pub chirp_start: N,
    pub chirp: ChirpControl,
    pub settings: SettingsStore,
    pub link: ClientLink<S>,
    pub faults: FaultState,
    pub rt_log: LogStream,
    pub ledger: Arc<RecordLedger>,
    pub channel_map: ChannelMap,
    /// Station MAC, for metadata.
    pub mac: [u8; 6],
}

impl<A, K, Q, N, S> Pipeline<A, K, Q, N, S>
where
    A: crate::hal::ContinuousAdc + Send,
    K: crate::hal::CalibrationCurve + Send,
    Q: Notify,
    N: Notify,
    S: FrameSink + Send,
{
    /// Validate the initial settings and construct all services.
    ///
    /// Nothing is built on hardware yet; see [`Pipeline::bring_up`].
    pub fn new(
        settings: Settings,
        channel_map: ChannelMap,
        mac: [u8; 6],
        capture_available: Q,
        chirp_start: N,
    ) -> Result<Self, Error> {
        let (chirp, sampling) = settings.configs(channel_map)?;

        let control = ChirpControl::new(chirp);
        control.set_audible(settings.audible);
        control.set_enabled(settings.enabled);

        Ok(Self {
            runtime: TimedLock::new(RuntimeState::new(sampling, chirp)),
            queue: CaptureQueue::new(capture_available),
            chirp_start,
            chirp: control,
            settings: SettingsStore::new(settings),
            link: ClientLink::new(),
            faults: FaultState::new(),
            rt_log: LogStream::new(),
            ledger: Arc::new(RecordLedger::new()),
            channel_map,
            mac,
        })
    }

    /// Build calibration and ADC for the initial settings, drive the enable
    /// pin, and start the chirp timer.
    ///
    /// Any failure is fatal. Returns the controller for the 1 Hz timer.
    pub fn bring_up<'a, F, Sc, E, T, C>(
        &'a self,
        clock: &'a C,
        timer: &mut T,
        adc_factory: F,
        calibration_scheme: Sc,
        enable: E,
    ) -> Result<ReconfigurationController<'a, F, Sc, E, C>, Error>
    where
        F: AdcFactory<Handle = A>,
        Sc: CalibrationScheme<Curve = K>,
        E: EnableOutput,
        T: ChirpTimer,
        C: Clock + ?Sized,
    {
        let mut controller = self.controller(clock, adc_factory, calibration_scheme, enable);
        let settings = self.settings.snapshot(clock)?;
        controller.bring_up(&settings)?;

        let (chirp, sampling) = settings.configs(self.channel_map)?;
        let tick_us = chirp.tick_us();
        timer.start(tick_us)?;

        log::info!(
            "pipeline up: tick={}us spc={} window={}us",
            tick_us,
            sampling.samples_per_chirp(&chirp),
            sampling.capture_window_us(&chirp)
        );
        Ok(controller)
    }

    pub fn controller<'a, F, Sc, E, C>(
        &'a self,
        clock: &'a C,
        adc_factory: F,
        calibration_scheme: Sc,
        enable: E,
    ) -> ReconfigurationController<'a, F, Sc, E, C>
    where
        F: AdcFactory<Handle = A>,
        Sc: CalibrationScheme<Curve = K>,
        E: EnableOutput,
        C: Clock + ?Sized,
    {
        ReconfigurationController::new(
            ReconfigLinks {
                runtime: &self.runtime,
                chirp: &self.chirp,
                clock,
                faults: &self.faults,
            },
            adc_factory,
            calibration_scheme,
            enable,
            self.channel_map,
        )
    }

    pub fn sampler<'a, C: Clock + ?Sized>(&'a self, clock: &'a C) -> ContinuousSampler<'a, A, K, Q, N, C> {
        ContinuousSampler::new(SamplerLinks {
            runtime: &self.runtime,
            queue: &self.queue,
            chirp_start: &self.chirp_start,
            clock,
            faults: &self.faults,
            log: &self.rt_log,
            ledger: Arc::clone(&self.ledger),
        })
    }

    pub fn consumer<'a, C: Clock + ?Sized>(&'a self, clock: &'a C) -> StreamingConsumer<'a, S, Q, C> {
        StreamingConsumer::new(&self.queue, &self.link, clock, &self.faults)
    }

    /// ISR context for the chirp timer, starting from the published timing.
    pub fn chirp_isr<W: WaveformOutput>(&self, dac: W) -> ChirpIsr<'_, W, N> {
        ChirpIsr::new(self.chirp.snapshot(), &self.chirp, dac, &self.chirp_start)
    }

    /// Current metadata frame as JSON.
    pub fn metadata_json<C: Clock + ?Sized>(&self, clock: &C) -> Result<String, Error> {
        let settings = self.settings.snapshot(clock)?;
        Metadata::new(&self.mac, &settings)
            .to_json()
            .map_err(|_| Error::Config(ConfigError::Parse))
    }

    /// Replace the settings from a JSON body. The controller picks the change
    /// up on its next tick.
    pub fn apply_settings_json<C: Clock + ?Sized>(&self, body: &[u8], clock: &C) -> Result<(), ConfigError> {
        let settings = Settings::from_json(body)?;
        self.settings.replace(clock, settings)?;
        log::info!("settings replaced (revision {})", self.settings.revision());
        Ok(())
    }

    /// Bind a new streaming client and greet it with the metadata frame.
    pub fn bind_client<C: Clock + ?Sized>(&self, sink: S, clock: &C) -> Result<(), SendError> {
        let greeting = self.metadata_json(clock).map_err(|_| SendError::Busy)?;
        self.link.bind_with_greeting(sink, &greeting, clock)?;
        log::info!("streaming client bound");
        Ok(())
    }

    /// One pass of the log drain task.
    pub fn drain_logs<C: Clock + ?Sized>(&self, drain: &mut LogDrain, clock: &C) -> usize {
        drain.poll(&self.rt_log, clock.now_us())
    }
}
