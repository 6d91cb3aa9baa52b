//! Chirp generator: timer-driven transmit ramp.
//!
//! Runs entirely in the chirp timer interrupt. Each tick emits one DAC code.
//!
//! ```text
//!  code
//!   ▲      RAMP (steps ticks)         PAUSE (pause_ticks)
//!   │        ╱│                        │        ╱
//!   │      ╱  │                        │      ╱
//!   │    ╱    │                        │    ╱
//!   │  ╱      │                        │  ╱
//!   └─●───────┴────────────────────────●──────────▶ t
//!     s=0: notify sampler              s=0
//! ```
//!
//! # Rules
//!
//! - No allocation, no blocking, no logging in `on_tick()`
//! - Parameter changes are adopted only at a cycle boundary (just before `s = 0`)
//! - DAC errors are counted, never retried
//! - Exactly one start-of-cycle notification per period while enabled

use core::sync::atomic::{fence, AtomicBool, AtomicU32, Ordering};

use crate::config::ChirpConfig;
use crate::hal::dac::{DacChannel, WaveformOutput, DAC_MID_CODE};
use crate::sync::Notify;

/// What the timer glue must do after a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlarmAction {
    /// Keep the current alarm period.
    Continue,
    /// Reprogram the alarm to the new tick interval (µs).
    Retune(u32),
}

/// Chirp parameters shared with the ISR.
///
/// The timing fields form a seqlock: the single writer (reconfiguration)
/// bumps `seq` to odd, stores the fields, then bumps to even. The ISR retries
/// nothing; a torn or in-progress read simply defers adoption to the next
/// cycle. `audible`/`enabled` are independent flags read every cycle.
pub struct ChirpControl {
    seq: AtomicU32,
    period_us: AtomicU32,
    active_us: AtomicU32,
    steps: AtomicU32,
    padding: AtomicU32,
    resolution: AtomicU32,
    audible: AtomicBool,
    enabled: AtomicBool,
}

impl ChirpControl {
    pub const fn new(cfg: ChirpConfig) -> Self {
        Self {
            seq: AtomicU32::new(0),
            period_us: AtomicU32::new(cfg.period_us),
            active_us: AtomicU32::new(cfg.active_us),
            steps: AtomicU32::new(cfg.steps),
            padding: AtomicU32::new(cfg.padding),
            resolution: AtomicU32::new(cfg.resolution),
            audible: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }

    /// Publish new timing. Single writer only.
    pub fn publish(&self, cfg: &ChirpConfig) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.period_us.store(cfg.period_us, Ordering::Relaxed);
        self.active_us.store(cfg.active_us, Ordering::Relaxed);
        self.steps.store(cfg.steps, Ordering::Relaxed);
        self.padding.store(cfg.padding, Ordering::Relaxed);
        self.resolution.store(cfg.resolution, Ordering::Relaxed);

        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Consistent read of the timing fields with their sequence number.
    ///
    /// Returns `None` if a write is in progress or raced the read.
    pub fn load(&self) -> Option<(ChirpConfig, u32)> {
        let s1 = self.seq.load(Ordering::Acquire);
        if s1 & 1 != 0 {
            return None;
        }

        let cfg = ChirpConfig {
            period_us: self.period_us.load(Ordering::Relaxed),
            active_us: self.active_us.load(Ordering::Relaxed),
            steps: self.steps.load(Ordering::Relaxed),
            padding: self.padding.load(Ordering::Relaxed),
            resolution: self.resolution.load(Ordering::Relaxed),
        };

        fence(Ordering::Acquire);
        let s2 = self.seq.load(Ordering::Relaxed);
        (s1 == s2).then_some((cfg, s1))
    }

    /// Consistent read, retrying while a publish is in flight.
    ///
    /// Task context only; the ISR uses [`ChirpControl::load`].
    pub fn snapshot(&self) -> ChirpConfig {
        loop {
            if let Some((cfg, _)) = self.load() {
                return cfg;
            }
            core::hint::spin_loop();
        }
    }

    /// Sequence number of the last completed publish.
    #[inline]
    pub fn sequence(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_audible(&self, audible: bool) {
        self.audible.store(audible, Ordering::Release);
    }

    #[inline]
    pub fn audible(&self) -> bool {
        self.audible.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Generator phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Emitting step `s` on the next tick.
    Ramp(u32),
    /// Zero output; ticks left before the next ramp.
    Pause(u32),
    /// Disabled: zero output, no notifications.
    Idle,
}

/// RAMP/PAUSE state machine.
pub struct ChirpGenerator {
    config: ChirpConfig,
    phase: Phase,
    /// Sequence of the last adopted `ChirpControl` publish.
    adopted_seq: u32,
    /// Current level of the audible channel.
    tone_high: bool,
    /// Last value written to channel B.
    tone_written: Option<u16>,
    write_errors: u32,
    cycles: u32,
}

impl ChirpGenerator {
    /// Create a generator for a validated configuration.
    pub fn new(config: ChirpConfig) -> Self {
        Self {
            config,
            phase: Phase::Ramp(0),
            adopted_seq: 0,
            tone_high: false,
            tone_written: None,
            write_errors: 0,
            cycles: 0,
        }
    }

    #[inline]
    pub fn config(&self) -> &ChirpConfig {
        &self.config
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Alarm period for the current configuration.
    #[inline]
    pub fn tick_us(&self) -> u32 {
        self.config.tick_us()
    }

    /// DAC writes that failed since creation.
    #[inline]
    pub fn write_errors(&self) -> u32 {
        self.write_errors
    }

    /// Completed start-of-cycle notifications.
    #[inline]
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    #[inline]
    fn write<W: WaveformOutput>(&mut self, dac: &mut W, channel: DacChannel, code: u16) {
        if dac.write(channel, code).is_err() {
            self.write_errors = self.write_errors.wrapping_add(1);
        }
    }

    #[inline]
    fn write_tone<W: WaveformOutput>(&mut self, dac: &mut W, code: u16) {
        if self.tone_written != Some(code) {
            self.write(dac, DacChannel::B, code);
            self.tone_written = Some(code);
        }
    }

    /// Cycle boundary: adopt published timing if it changed.
    fn adopt(&mut self, control: &ChirpControl) -> AlarmAction {
        let Some((cfg, seq)) = control.load() else {
            return AlarmAction::Continue;
        };
        if seq == self.adopted_seq || cfg.validate().is_err() {
            return AlarmAction::Continue;
        }

        let old_tick = self.config.tick_us();
        self.config = cfg;
        self.adopted_seq = seq;
        if cfg.tick_us() != old_tick {
            AlarmAction::Retune(cfg.tick_us())
        } else {
            AlarmAction::Continue
        }
    }

    /// Advance one timer tick.
    ///
    /// Called from the timer ISR. Never blocks or allocates.
    pub fn on_tick<W, N>(&mut self, control: &ChirpControl, dac: &mut W, chirp_start: &N) -> AlarmAction
    where
        W: WaveformOutput,
        N: Notify + ?Sized,
    {
        let mut action = AlarmAction::Continue;

        if matches!(self.phase, Phase::Ramp(0) | Phase::Idle) {
            action = self.adopt(control);

            if !control.enabled() {
                self.phase = Phase::Idle;
                self.write(dac, DacChannel::A, 0);
                self.write_tone(dac, 0);
                return action;
            }

            self.phase = Phase::Ramp(0);
            chirp_start.notify_from_isr();
            self.cycles = self.cycles.wrapping_add(1);

            if control.audible() {
                self.tone_high = !self.tone_high;
                let code = if self.tone_high { DAC_MID_CODE } else { 0 };
                self.write_tone(dac, code);
            } else {
                self.tone_high = false;
                self.write_tone(dac, 0);
            }
        }

        match self.phase {
            Phase::Ramp(s) => {
                let code = self.config.code_at(s);
                self.write(dac, DacChannel::A, code);

                let next = s + 1;
                self.phase = if next < self.config.steps {
                    Phase::Ramp(next)
                } else {
                    match self.config.pause_ticks() {
                        0 => Phase::Ramp(0),
                        n => Phase::Pause(n),
                    }
                };
            }
            Phase::Pause(remaining) => {
                self.write(dac, DacChannel::A, 0);
                self.phase = if remaining > 1 {
                    Phase::Pause(remaining - 1)
                } else {
                    Phase::Ramp(0)
                };
            }
            Phase::Idle => {}
        }

        action
    }
}

/// Typed ISR context handed to the platform timer as an opaque pointer.
pub struct ChirpIsr<'a, W, N: ?Sized> {
    pub generator: ChirpGenerator,
    pub control: &'a ChirpControl,
    pub dac: W,
    pub chirp_start: &'a N,
}

impl<'a, W: WaveformOutput, N: Notify + ?Sized> ChirpIsr<'a, W, N> {
    pub fn new(config: ChirpConfig, control: &'a ChirpControl, dac: W, chirp_start: &'a N) -> Self {
        Self {
            generator: ChirpGenerator::new(config),
            control,
            dac,
            chirp_start,
        }
    }

    /// Alarm callback body.
    #[inline]
    pub fn on_alarm(&mut self) -> AlarmAction {
        self.generator
            .on_tick(self.control, &mut self.dac, self.chirp_start)
    }
}
