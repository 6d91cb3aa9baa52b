//! Continuous sampler: one capture record per chirp cycle.
//!
//! # Architecture
//!
//! ```text
//! chirp ISR ──notify──▶ ContinuousSampler ──try_enqueue──▶ CaptureQueue
//!                        │  ▲
//!            wait_frame  │  │ read / pad_of
//!                        ▼  │
//!                     ContinuousAdc (DMA)
//! ```
//!
//! Per cycle:
//!
//! 1. Lock runtime state, read `samples_per_chirp` and the generation, unlock
//! 2. Reserve the record (failure skips the cycle)
//! 3. Wait for the chirp start (bounded)
//! 4. Re-lock; skip if the generation moved; capture until every channel is full
//! 5. Stamp, stop the ADC, unlock, enqueue with a short timeout
//!
//! # Rules
//!
//! - The runtime lock is never held across the chirp wait
//! - Records reach the queue only when complete
//! - Every failure drops the record locally and is reported through
//!   `FaultState` and the RT log stream, never the `log` facade

use alloc::sync::Arc;

use crate::calibration::CalibrationProfile;
use crate::config::{
    ChannelMap, CHANNEL_COUNT, CHIRP_WAIT_TIMEOUT_US, CYCLE_LOCK_TIMEOUT_US, ENQUEUE_TIMEOUT_US,
    FRAME_CONVERSIONS,
};
use crate::fault::{FaultCode, FaultState};
use crate::hal::adc::{AdcError, CalibrationCurve, ContinuousAdc, RawConversion};
use crate::hal::Clock;
use crate::logging::LogStream;
use crate::queue::CaptureQueue;
use crate::record::{CaptureRecord, RecordLedger};
use crate::reconfig::RuntimeState;
use crate::sync::{Notify, TimedLock};
use crate::{rt_debug, rt_error, rt_warn};

/// Why a cycle produced no queued record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Runtime lock not acquired within the bound.
    LockBusy,
    /// No ADC handle or calibration profile (rebuild failed or pending).
    NotConfigured,
    /// Record buffers could not be reserved.
    AllocationFailed,
    /// No chirp start within `CHIRP_WAIT_TIMEOUT_US`.
    ChirpTimeout,
    /// Configuration was rebuilt while waiting for the chirp.
    ConfigChanged,
    /// ADC failed mid-capture.
    Adc(AdcError),
    /// Queue stayed full; record dropped (newest loses).
    QueueFull,
}

/// Result of one capture cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A complete record was queued.
    Enqueued { samples_per_chirp: usize },
    Skipped(SkipReason),
}

/// Running per-channel sum for oversampling.
#[derive(Clone, Copy, Default)]
struct Accumulator {
    sum: u32,
    count: u32,
}

/// Shared pieces the sampler borrows for its whole life.
pub struct SamplerLinks<'a, A, K, Q, N: ?Sized, C: ?Sized> {
    pub runtime: &'a TimedLock<RuntimeState<A, K>>,
    pub queue: &'a CaptureQueue<Q>,
    pub chirp_start: &'a N,
    pub clock: &'a C,
    pub faults: &'a FaultState,
    pub log: &'a LogStream,
    pub ledger: Arc<RecordLedger>,
}

/// Per-cycle capture loop.
pub struct ContinuousSampler<'a, A, K, Q, N: ?Sized, C: ?Sized> {
    links: SamplerLinks<'a, A, K, Q, N, C>,
    scratch: [RawConversion; FRAME_CONVERSIONS],
}

impl<'a, A, K, Q, N, C> ContinuousSampler<'a, A, K, Q, N, C>
where
    A: ContinuousAdc,
    K: CalibrationCurve,
    Q: Notify,
    N: Notify + ?Sized,
    C: Clock + ?Sized,
{
    pub fn new(links: SamplerLinks<'a, A, K, Q, N, C>) -> Self {
        Self {
            links,
            scratch: [RawConversion::EMPTY; FRAME_CONVERSIONS],
        }
    }

    /// Acquisition task body. Never returns.
    pub fn run(&mut self) -> ! {
        loop {
            self.run_cycle();
        }
    }

    /// Run one complete cycle.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        match self.cycle() {
            Ok(spc) => CycleOutcome::Enqueued {
                samples_per_chirp: spc,
            },
            Err(reason) => CycleOutcome::Skipped(reason),
        }
    }

    fn now(&self) -> u64 {
        self.links.clock.now_us()
    }

    fn fault(&self, code: FaultCode, data: u32) {
        self.links.faults.set(code, data);
    }

    fn cycle(&mut self) -> Result<usize, SkipReason> {
        let runtime_lock = self.links.runtime;

        // 1. Snapshot the active shape
        let (spc, generation) = {
            let runtime = runtime_lock
                .lock_timeout(self.links.clock, CYCLE_LOCK_TIMEOUT_US)
                .ok_or_else(|| {
                    self.fault(FaultCode::LockBusy, 0);
                    SkipReason::LockBusy
                })?;
            if !runtime.is_ready() {
                return Err(SkipReason::NotConfigured);
            }
            (runtime.samples_per_chirp(), runtime.generation)
        };

        // 2. Reserve all four buffers
        let mut record = CaptureRecord::try_new(spc, &self.links.ledger).map_err(|_| {
            self.fault(FaultCode::AllocationFailed, spc as u32);
            rt_warn!(self.links.log, self.now(), "record alloc failed spc={}", spc);
            SkipReason::AllocationFailed
        })?;

        // 3. Chirp start
        if !self.links.chirp_start.wait(Some(CHIRP_WAIT_TIMEOUT_US)) {
            self.fault(FaultCode::ChirpTimeout, 0);
            rt_debug!(self.links.log, self.now(), "no chirp start");
            return Err(SkipReason::ChirpTimeout);
        }

        // 4. Capture under the lock
        {
            let mut runtime = runtime_lock
                .lock_timeout(self.links.clock, CYCLE_LOCK_TIMEOUT_US)
                .ok_or_else(|| {
                    self.fault(FaultCode::LockBusy, 1);
                    SkipReason::LockBusy
                })?;
            if runtime.generation != generation {
                return Err(SkipReason::ConfigChanged);
            }

            let RuntimeState {
                active_sampling,
                calibration,
                adc,
                ..
            } = &mut *runtime;
            let (Some(adc), Some(calibration)) = (adc.as_mut(), calibration.as_ref()) else {
                return Err(SkipReason::NotConfigured);
            };
            let map = active_sampling.channel_map;
            let oversample = active_sampling.oversample_count.max(1);

            if let Err(e) = self.capture(adc, calibration, &map, oversample, &mut record) {
                if let Err(stop) = adc.stop() {
                    rt_warn!(self.links.log, self.now(), "adc stop after abort: {}", stop);
                }
                let code = match e {
                    AdcError::InvalidState => FaultCode::AdcInvalidState,
                    _ => FaultCode::AdcDriver,
                };
                let data = match e {
                    AdcError::Driver(c) => c as u32,
                    _ => 0,
                };
                self.fault(code, data);
                rt_error!(self.links.log, self.now(), "capture aborted: {}", e);
                return Err(SkipReason::Adc(e));
            }

            // 5. Stop; the record is complete either way
            if let Err(e) = adc.stop() {
                self.fault(FaultCode::AdcDriver, 0);
                rt_warn!(self.links.log, self.now(), "adc stop: {}", e);
            }
        }

        match self
            .links
            .queue
            .try_enqueue(record, ENQUEUE_TIMEOUT_US, self.links.clock)
        {
            Ok(()) => Ok(spc),
            Err(record) => {
                drop(record);
                self.fault(FaultCode::QueueFull, spc as u32);
                rt_warn!(self.links.log, self.now(), "queue full, record dropped");
                Err(SkipReason::QueueFull)
            }
        }
    }

    /// Fill `record` from the running ADC.
    ///
    /// Raw conversions are grouped per channel, `oversample` at a time; each
    /// group's rounded mean is calibrated into one sample.
    fn capture(
        &mut self,
        adc: &mut A,
        calibration: &CalibrationProfile<K>,
        map: &ChannelMap,
        oversample: u32,
        record: &mut CaptureRecord,
    ) -> Result<(), AdcError> {
        if !adc.is_running() {
            adc.start()?;
        }
        record.capture_start_us = self.now();

        let mut acc = [Accumulator::default(); CHANNEL_COUNT];

        while !record.is_complete() {
            match adc.wait_frame() {
                Ok(()) => {}
                Err(e) if !e.is_terminal() => continue,
                Err(e) => return Err(e),
            }
            let n = match adc.read(&mut self.scratch) {
                Ok(n) => n,
                Err(e) if !e.is_terminal() => continue,
                Err(e) => return Err(e),
            };

            for conv in &self.scratch[..n] {
                let Some(pad) = adc.pad_of(conv.unit, conv.channel) else {
                    continue;
                };
                let Some(ch) = map.index_of(pad) else {
                    continue;
                };
                if record.is_channel_full(ch) {
                    continue;
                }

                let slot = &mut acc[ch];
                slot.sum += conv.data as u32;
                slot.count += 1;
                if slot.count == oversample {
                    let mean = (slot.sum + oversample / 2) / oversample;
                    record.push(ch, calibration.convert(mean as u16));
                    *slot = Accumulator::default();
                }
            }
        }

        record.capture_stop_us = self.now();
        Ok(())
    }

    /// Record allocation ledger shared with diagnostics.
    #[inline]
    pub fn ledger(&self) -> &Arc<RecordLedger> {
        &self.links.ledger
    }
}
