//! Host doubles for the HAL traits, shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use vradar_firmware::consumer::{FrameSink, SendError};
use vradar_firmware::hal::{
    AdcError, AdcFactory, AdcPattern, Attenuation, CalibrationCurve, CalibrationError,
    CalibrationScheme, ChirpTimer, ContinuousAdc, DacChannel, EnableOutput, HalError, Pad,
    RawConversion, WaveformOutput,
};
use vradar_firmware::hal::Clock;
use vradar_firmware::sync::Notify;

pub const MAC: [u8; 6] = [0x24, 0x1a, 0x00, 0x7f, 0x2b, 0xff];

/// Board pads, in logical channel order.
pub const PADS: [u8; 4] = [4, 5, 6, 7];

// ============================================================================
// Time
// ============================================================================

/// Simulated clock: `delay_us` advances time instantly.
#[derive(Default)]
pub struct StepClock(AtomicU64);

impl StepClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, us: u64) {
        self.0.fetch_add(us, Ordering::Relaxed);
    }
}

impl Clock for StepClock {
    fn now_us(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn delay_us(&self, us: u32) {
        self.advance(us as u64);
    }
}

/// FreeRTOS-like clock: yields round up to whole ticks, spins are exact.
pub struct TickClock {
    now: AtomicU64,
    tick_us: u32,
}

impl TickClock {
    /// 100 Hz scheduler, the ESP-IDF default.
    pub fn new() -> Self {
        Self::with_tick(10_000)
    }

    pub fn with_tick(tick_us: u32) -> Self {
        Self {
            now: AtomicU64::new(0),
            tick_us,
        }
    }
}

impl Clock for TickClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    fn delay_us(&self, us: u32) {
        let ticks = us.div_ceil(self.tick_us).max(1) as u64;
        self.now.fetch_add(ticks * self.tick_us as u64, Ordering::Relaxed);
    }

    fn spin_us(&self, us: u32) {
        self.now.fetch_add(us as u64, Ordering::Relaxed);
    }

    fn tick_us(&self) -> u32 {
        self.tick_us
    }
}

/// Wall clock for threaded tests.
pub struct RealClock {
    start: Instant,
}

impl RealClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for RealClock {
    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn delay_us(&self, us: u32) {
        thread::sleep(Duration::from_micros(us as u64));
    }
}

// ============================================================================
// Notification
// ============================================================================

/// Binary notification over `Mutex` + `Condvar`.
#[derive(Default)]
pub struct CondvarNotify {
    pending: Mutex<bool>,
    cv: Condvar,
}

impl CondvarNotify {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notify for CondvarNotify {
    fn notify(&self) {
        *self.pending.lock().unwrap() = true;
        self.cv.notify_one();
    }

    fn wait(&self, timeout_us: Option<u64>) -> bool {
        let mut pending = self.pending.lock().unwrap();
        match timeout_us {
            None => {
                while !*pending {
                    pending = self.cv.wait(pending).unwrap();
                }
            }
            Some(us) => {
                let deadline = Instant::now() + Duration::from_micros(us);
                while !*pending {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    pending = self.cv.wait_timeout(pending, deadline - now).unwrap().0;
                }
            }
        }
        *pending = false;
        true
    }
}

/// Non-blocking notification: `wait` consumes a pending flag or times out
/// immediately.
#[derive(Default)]
pub struct FlagNotify(AtomicBool);

impl FlagNotify {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Notify for FlagNotify {
    fn notify(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn wait(&self, _timeout_us: Option<u64>) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Runs a hook on every wait, then reports a notification.
pub struct HookNotify<F: Fn() + Sync>(pub F);

impl<F: Fn() + Sync> Notify for HookNotify<F> {
    fn notify(&self) {}

    fn wait(&self, _timeout_us: Option<u64>) -> bool {
        (self.0)();
        true
    }
}

// ============================================================================
// ADC
// ============================================================================

/// One conversion on ADC unit 0. The scripted driver reports the pad number
/// as the channel number.
pub fn conv(pad: u8, data: u16) -> RawConversion {
    RawConversion {
        unit: 0,
        channel: pad,
        data,
    }
}

/// One conversion per board pad, all with `data`.
pub fn round(data: u16) -> Vec<RawConversion> {
    PADS.iter().map(|&p| conv(p, data)).collect()
}

pub enum AdcStep {
    Frame(Vec<RawConversion>),
    Fail(AdcError),
}

/// Shared script and counters behind every scripted ADC handle.
#[derive(Default)]
pub struct AdcScript {
    pub steps: VecDeque<AdcStep>,
    /// When the script runs out, synthesize rounds with this raw value.
    pub fill: Option<u16>,
    /// Called once, on the next `wait_frame`.
    pub on_wait: Option<Box<dyn FnOnce() + Send>>,
    pub builds: Vec<AdcPattern>,
    /// Builds to reject before succeeding again.
    pub fail_builds: u32,
    pub live: u32,
    pub max_live: u32,
    pub starts: u32,
    pub stops: u32,
    /// Stops to report as failed (the ADC still halts).
    pub fail_stops: u32,
}

pub type Script = Arc<Mutex<AdcScript>>;

pub fn script(fill: Option<u16>) -> Script {
    Arc::new(Mutex::new(AdcScript {
        fill,
        ..Default::default()
    }))
}

pub struct ScriptedAdc {
    script: Script,
    running: bool,
    pending: Option<Vec<RawConversion>>,
}

impl ContinuousAdc for ScriptedAdc {
    fn start(&mut self) -> Result<(), AdcError> {
        if self.running {
            return Err(AdcError::InvalidState);
        }
        self.running = true;
        self.script.lock().unwrap().starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AdcError> {
        if self.running {
            self.running = false;
            let mut script = self.script.lock().unwrap();
            script.stops += 1;
            if script.fail_stops > 0 {
                script.fail_stops -= 1;
                return Err(AdcError::Driver(-2));
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn wait_frame(&mut self) -> Result<(), AdcError> {
        if !self.running {
            return Err(AdcError::InvalidState);
        }
        let hook = self.script.lock().unwrap().on_wait.take();
        if let Some(hook) = hook {
            hook();
        }

        let mut script = self.script.lock().unwrap();
        match script.steps.pop_front() {
            Some(AdcStep::Frame(frame)) => {
                self.pending = Some(frame);
                Ok(())
            }
            Some(AdcStep::Fail(e)) => Err(e),
            None => match script.fill {
                Some(value) => {
                    self.pending = Some((0..4).flat_map(|_| round(value)).collect());
                    Ok(())
                }
                None => Err(AdcError::Driver(-1)),
            },
        }
    }

    fn read(&mut self, out: &mut [RawConversion]) -> Result<usize, AdcError> {
        let frame = self.pending.take().ok_or(AdcError::Timeout)?;
        let n = frame.len().min(out.len());
        out[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }

    fn pad_of(&self, unit: u8, channel: u8) -> Option<Pad> {
        (unit == 0).then_some(Pad(channel))
    }
}

impl Drop for ScriptedAdc {
    fn drop(&mut self) {
        let mut script = self.script.lock().unwrap();
        script.live -= 1;
        if self.running {
            script.stops += 1;
        }
    }
}

pub struct ScriptedFactory {
    pub script: Script,
}

impl ScriptedFactory {
    pub fn new(script: &Script) -> Self {
        Self {
            script: Arc::clone(script),
        }
    }
}

impl AdcFactory for ScriptedFactory {
    type Handle = ScriptedAdc;

    fn build(&mut self, pattern: &AdcPattern) -> Result<ScriptedAdc, AdcError> {
        let mut script = self.script.lock().unwrap();
        if script.fail_builds > 0 {
            script.fail_builds -= 1;
            return Err(AdcError::InvalidConfig);
        }
        script.builds.push(*pattern);
        script.live += 1;
        script.max_live = script.max_live.max(script.live);
        Ok(ScriptedAdc {
            script: Arc::clone(&self.script),
            running: false,
            pending: None,
        })
    }
}

// ============================================================================
// Calibration
// ============================================================================

/// Adds `1000 × attenuation` to the raw value, so records show which
/// profile produced them.
#[derive(Debug)]
pub struct OffsetCurve(pub u16);

impl CalibrationCurve for OffsetCurve {
    fn raw_to_calibrated(&self, raw: u16) -> u16 {
        raw + self.0
    }
}

pub fn offset_for(attenuation: Attenuation) -> u16 {
    1000 * attenuation.raw() as u16
}

#[derive(Default)]
pub struct OffsetScheme {
    pub created: u32,
    pub fail_next: u32,
}

impl CalibrationScheme for OffsetScheme {
    type Curve = OffsetCurve;

    fn create(&mut self, attenuation: Attenuation) -> Result<OffsetCurve, CalibrationError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(CalibrationError::NotSupported);
        }
        self.created += 1;
        Ok(OffsetCurve(offset_for(attenuation)))
    }
}

// ============================================================================
// Outputs
// ============================================================================

#[derive(Default)]
pub struct RecordingDac {
    pub writes: Vec<(DacChannel, u16)>,
    /// Reject every write.
    pub broken: bool,
}

impl RecordingDac {
    /// Channel A codes in write order.
    pub fn ramp(&self) -> Vec<u16> {
        self.writes
            .iter()
            .filter(|(ch, _)| *ch == DacChannel::A)
            .map(|&(_, code)| code)
            .collect()
    }

    pub fn tone(&self) -> Vec<u16> {
        self.writes
            .iter()
            .filter(|(ch, _)| *ch == DacChannel::B)
            .map(|&(_, code)| code)
            .collect()
    }
}

impl WaveformOutput for RecordingDac {
    fn write(&mut self, channel: DacChannel, code: u16) -> Result<(), HalError> {
        if self.broken {
            return Err(HalError::Driver(-1));
        }
        self.writes.push((channel, code));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingEnable(pub Arc<Mutex<Vec<bool>>>);

impl RecordingEnable {
    pub fn levels(&self) -> Vec<bool> {
        self.0.lock().unwrap().clone()
    }
}

impl EnableOutput for RecordingEnable {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), HalError> {
        self.0.lock().unwrap().push(enabled);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTimer {
    /// Tick interval of every `start`.
    pub started: Vec<u32>,
    pub stops: u32,
}

impl ChirpTimer for RecordingTimer {
    fn start(&mut self, tick_us: u32) -> Result<(), HalError> {
        self.started.push(tick_us);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HalError> {
        self.stops += 1;
        Ok(())
    }
}

// ============================================================================
// Network
// ============================================================================

#[derive(Default)]
pub struct SinkLog {
    pub binary: Vec<Vec<u8>>,
    pub text: Vec<String>,
    /// Error returned by the next send.
    pub fail_next: Option<SendError>,
}

#[derive(Clone, Default)]
pub struct MockSink(pub Arc<Mutex<SinkLog>>);

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> Result<(), SendError> {
        match self.0.lock().unwrap().fail_next.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl FrameSink for MockSink {
    fn send_binary(&mut self, frame: &[u8]) -> Result<(), SendError> {
        self.check()?;
        self.0.lock().unwrap().binary.push(frame.to_vec());
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<(), SendError> {
        self.check()?;
        self.0.lock().unwrap().text.push(text.to_string());
        Ok(())
    }
}
