//! Continuous sampler cycle tests

mod common;

use std::sync::Arc;

use common::*;
use vradar_firmware::fault::FaultCode;
use vradar_firmware::hal::{AdcError, AdcFactory, Clock, ContinuousAdc, RawConversion};
use vradar_firmware::logging::{LogLevel, LogStream};
use vradar_firmware::sampler::SamplerLinks;
use vradar_firmware::sync::{Notify, TimedLock};
use vradar_firmware::{
    CalibrationProfile, CaptureQueue, ChannelMap, ContinuousSampler, CycleOutcome, FaultState,
    RecordLedger, RuntimeState, Settings, SkipReason,
};

type Runtime = TimedLock<RuntimeState<ScriptedAdc, OffsetCurve>>;

struct Rig {
    script: Script,
    runtime: Runtime,
    queue: CaptureQueue<FlagNotify>,
    faults: FaultState,
    log: LogStream,
    ledger: Arc<RecordLedger>,
    clock: StepClock,
}

/// 10 kHz over a 4 ms ramp: 40 samples per channel, within the ADC limit
/// for up to 2x oversampling.
fn settings(samples: u32, attenuation: u32) -> Settings {
    let mut s = Settings::default();
    s.sampling.frequency = 10_000;
    s.sampling.samples = samples;
    s.sampling.attenuation = attenuation;
    s.chirp.prf = 8000;
    s.chirp.duration = 4000;
    s
}

impl Rig {
    /// Runtime state built the way the controller builds it.
    fn new(settings: Settings, script: Script) -> Self {
        let chirp = settings.chirp_config().unwrap();
        let sampling = settings.sampling_config(ChannelMap::BOARD_DEFAULT).unwrap();
        let mut state = RuntimeState::new(sampling, chirp);
        state.calibration = Some(
            CalibrationProfile::build(&mut OffsetScheme::default(), sampling.attenuation).unwrap(),
        );
        state.adc = Some(
            ScriptedFactory::new(&script)
                .build(&sampling.adc_pattern())
                .unwrap(),
        );

        Self {
            script,
            runtime: TimedLock::new(state),
            queue: CaptureQueue::new(FlagNotify::new()),
            faults: FaultState::new(),
            log: LogStream::new(),
            ledger: Arc::new(RecordLedger::new()),
            clock: StepClock::new(),
        }
    }

    fn sampler<'a, N: Notify + ?Sized>(
        &'a self,
        chirp_start: &'a N,
    ) -> ContinuousSampler<'a, ScriptedAdc, OffsetCurve, FlagNotify, N, StepClock> {
        ContinuousSampler::new(SamplerLinks {
            runtime: &self.runtime,
            queue: &self.queue,
            chirp_start,
            clock: &self.clock,
            faults: &self.faults,
            log: &self.log,
            ledger: Arc::clone(&self.ledger),
        })
    }

    fn push_frames(&self, frames: impl IntoIterator<Item = Vec<RawConversion>>) {
        let mut script = self.script.lock().unwrap();
        for frame in frames {
            script.steps.push_back(AdcStep::Frame(frame));
        }
    }
}

const ENQUEUED: CycleOutcome = CycleOutcome::Enqueued {
    samples_per_chirp: 40,
};

#[test]
fn test_complete_record_enqueued() {
    let rig = Rig::new(settings(2, 3), script(Some(100)));
    let chirp = FlagNotify::new();
    chirp.notify();

    let mut sampler = rig.sampler(&chirp);
    assert_eq!(sampler.run_cycle(), ENQUEUED);

    let record = rig.queue.try_dequeue().unwrap();
    assert!(record.is_complete());
    assert_eq!(record.samples_per_chirp(), 40);
    for ch in 0..4 {
        // attenuation 3 → offset 3000
        assert!(record.channel(ch).iter().all(|&v| v == 3100));
    }
    assert!(record.capture_start_us <= record.capture_stop_us);

    let script = rig.script.lock().unwrap();
    assert_eq!(script.starts, 1);
    assert_eq!(script.stops, 1);
    assert!(!rig.faults.is_active());
}

#[test]
fn test_conversions_routed_by_pad() {
    let rig = Rig::new(settings(1, 0), script(None));
    rig.push_frames((0..40).map(|_| vec![conv(7, 40), conv(4, 10), conv(6, 30), conv(5, 20)]));
    let chirp = FlagNotify::new();
    chirp.notify();

    assert_eq!(rig.sampler(&chirp).run_cycle(), ENQUEUED);

    let record = rig.queue.try_dequeue().unwrap();
    assert!(record.channel(0).iter().all(|&v| v == 10));
    assert!(record.channel(1).iter().all(|&v| v == 20));
    assert!(record.channel(2).iter().all(|&v| v == 30));
    assert!(record.channel(3).iter().all(|&v| v == 40));
}

#[test]
fn test_unknown_pads_and_units_ignored() {
    let rig = Rig::new(settings(1, 0), script(None));
    rig.push_frames((0..40).map(|_| {
        vec![
            conv(9, 999),
            RawConversion {
                unit: 1,
                channel: 4,
                data: 999,
            },
            conv(4, 1),
            conv(5, 2),
            conv(6, 3),
            conv(7, 4),
        ]
    }));
    let chirp = FlagNotify::new();
    chirp.notify();

    assert_eq!(rig.sampler(&chirp).run_cycle(), ENQUEUED);

    let record = rig.queue.try_dequeue().unwrap();
    for ch in 0..4 {
        assert_eq!(record.channel(ch).len(), 40);
        assert!(record.channel(ch).iter().all(|&v| v == ch as u16 + 1));
    }
}

#[test]
fn test_oversampled_mean_is_rounded() {
    let rig = Rig::new(settings(2, 0), script(Some(50)));
    rig.push_frames([vec![
        conv(4, 100),
        conv(4, 103),
        conv(5, 1),
        conv(5, 2),
        conv(6, 0),
        conv(6, 0),
        conv(7, 4095),
        conv(7, 4094),
    ]]);
    let chirp = FlagNotify::new();
    chirp.notify();

    assert_eq!(rig.sampler(&chirp).run_cycle(), ENQUEUED);

    let record = rig.queue.try_dequeue().unwrap();
    assert_eq!(record.channel(0)[0], 102);
    assert_eq!(record.channel(1)[0], 2);
    assert_eq!(record.channel(2)[0], 0);
    assert_eq!(record.channel(3)[0], 4095);
    for ch in 0..4 {
        assert!(record.channel(ch)[1..].iter().all(|&v| v == 50));
    }
}

#[test]
fn test_adc_failure_drops_partial_record() {
    let rig = Rig::new(settings(1, 0), script(Some(5)));
    {
        let mut script = rig.script.lock().unwrap();
        script.steps.push_back(AdcStep::Frame(round(1)));
        script.steps.push_back(AdcStep::Fail(AdcError::InvalidState));
    }
    let chirp = FlagNotify::new();
    let mut sampler = rig.sampler(&chirp);

    chirp.notify();
    assert_eq!(
        sampler.run_cycle(),
        CycleOutcome::Skipped(SkipReason::Adc(AdcError::InvalidState))
    );
    assert!(rig.queue.is_empty());
    assert_eq!(rig.ledger.live(), 0);
    assert_eq!(rig.faults.count_of(FaultCode::AdcInvalidState), 1);
    assert!(rig.log.has_entries());
    {
        let script = rig.script.lock().unwrap();
        assert_eq!(script.starts, 1);
        assert_eq!(script.stops, 1);
    }
    assert!(!rig.runtime.try_lock().unwrap().adc.as_ref().unwrap().is_running());

    // Next cycle recovers
    chirp.notify();
    assert_eq!(sampler.run_cycle(), ENQUEUED);
    let record = rig.queue.try_dequeue().unwrap();
    assert!(record.channel(0).iter().all(|&v| v == 5));
    assert_eq!(rig.script.lock().unwrap().starts, 2);
}

#[test]
fn test_stop_failure_after_abort_is_logged() {
    let rig = Rig::new(settings(1, 0), script(None));
    {
        let mut script = rig.script.lock().unwrap();
        script.steps.push_back(AdcStep::Fail(AdcError::InvalidState));
        script.fail_stops = 1;
    }
    let chirp = FlagNotify::new();
    chirp.notify();

    assert_eq!(
        rig.sampler(&chirp).run_cycle(),
        CycleOutcome::Skipped(SkipReason::Adc(AdcError::InvalidState))
    );
    assert_eq!(rig.ledger.live(), 0);

    let stop = rig.log.drain().unwrap();
    assert_eq!(stop.level, LogLevel::Warn);
    assert!(stop.text().starts_with("adc stop after abort"), "{}", stop.text());
    let abort = rig.log.drain().unwrap();
    assert_eq!(abort.level, LogLevel::Error);
    // The capture error stays the reported fault
    assert_eq!(rig.faults.code(), FaultCode::AdcInvalidState);
}

#[test]
fn test_driver_error_code_reported() {
    let rig = Rig::new(settings(2, 3), script(None));
    rig.script
        .lock()
        .unwrap()
        .steps
        .push_back(AdcStep::Fail(AdcError::Driver(-5)));
    let chirp = FlagNotify::new();
    chirp.notify();

    assert_eq!(
        rig.sampler(&chirp).run_cycle(),
        CycleOutcome::Skipped(SkipReason::Adc(AdcError::Driver(-5)))
    );
    let snapshot = rig.faults.snapshot();
    assert_eq!(snapshot.code, FaultCode::AdcDriver);
    assert_eq!(snapshot.data, -5i32 as u32);
}

#[test]
fn test_read_timeout_is_retried() {
    let rig = Rig::new(settings(1, 0), script(Some(7)));
    rig.script
        .lock()
        .unwrap()
        .steps
        .push_back(AdcStep::Fail(AdcError::Timeout));
    let chirp = FlagNotify::new();
    chirp.notify();

    assert_eq!(rig.sampler(&chirp).run_cycle(), ENQUEUED);
    assert_eq!(rig.faults.count(), 0);
}

#[test]
fn test_chirp_timeout_skips_cycle() {
    let rig = Rig::new(settings(2, 3), script(Some(100)));
    let chirp = FlagNotify::new();

    assert_eq!(
        rig.sampler(&chirp).run_cycle(),
        CycleOutcome::Skipped(SkipReason::ChirpTimeout)
    );
    assert_eq!(rig.faults.count_of(FaultCode::ChirpTimeout), 1);
    assert_eq!(rig.ledger.snapshot().allocated, 1);
    assert_eq!(rig.ledger.live(), 0);
    // ADC never started
    assert_eq!(rig.script.lock().unwrap().starts, 0);
}

#[test]
fn test_generation_change_discards_cycle() {
    let rig = Rig::new(settings(2, 3), script(Some(100)));
    // A rebuild lands while the sampler waits for the chirp
    let chirp = HookNotify(|| {
        if let Some(mut runtime) = rig.runtime.try_lock() {
            runtime.generation += 1;
        }
    });

    assert_eq!(
        rig.sampler(&chirp).run_cycle(),
        CycleOutcome::Skipped(SkipReason::ConfigChanged)
    );
    assert!(rig.queue.is_empty());
    assert_eq!(rig.ledger.live(), 0);
    assert_eq!(rig.script.lock().unwrap().starts, 0);
}

#[test]
fn test_not_configured_skips_without_allocating() {
    let rig = Rig::new(settings(2, 3), script(Some(100)));
    rig.runtime.try_lock().unwrap().adc = None;
    let chirp = FlagNotify::new();
    chirp.notify();

    assert_eq!(
        rig.sampler(&chirp).run_cycle(),
        CycleOutcome::Skipped(SkipReason::NotConfigured)
    );
    assert_eq!(rig.ledger.snapshot().allocated, 0);
    // Chirp notification left for the next cycle
    assert!(chirp.is_pending());
}

#[test]
fn test_lock_busy_skips_cycle() {
    let rig = Rig::new(settings(2, 3), script(Some(100)));
    let chirp = FlagNotify::new();
    chirp.notify();
    let mut sampler = rig.sampler(&chirp);

    let guard = rig.runtime.try_lock().unwrap();
    let before = rig.clock.now_us();
    assert_eq!(sampler.run_cycle(), CycleOutcome::Skipped(SkipReason::LockBusy));
    assert!(rig.clock.now_us() - before >= 2_000);
    assert_eq!(rig.faults.count_of(FaultCode::LockBusy), 1);
    drop(guard);

    assert_eq!(sampler.run_cycle(), ENQUEUED);
}

#[test]
fn test_full_queue_drops_newest() {
    let rig = Rig::new(settings(1, 0), script(Some(1)));
    let chirp = FlagNotify::new();
    let mut sampler = rig.sampler(&chirp);

    for _ in 0..8 {
        chirp.notify();
        assert_eq!(sampler.run_cycle(), ENQUEUED);
    }
    rig.script.lock().unwrap().fill = Some(2);
    chirp.notify();
    assert_eq!(sampler.run_cycle(), CycleOutcome::Skipped(SkipReason::QueueFull));

    assert_eq!(rig.queue.len(), 8);
    assert_eq!(rig.queue.rejected(), 1);
    assert_eq!(rig.faults.count_of(FaultCode::QueueFull), 1);
    assert_eq!(rig.ledger.live(), 8);

    // Oldest kept, newest lost
    let first = rig.queue.try_dequeue().unwrap();
    assert_eq!(first.channel(0)[0], 1);

    chirp.notify();
    assert_eq!(sampler.run_cycle(), ENQUEUED);
    let mut last = None;
    while let Some(record) = rig.queue.try_dequeue() {
        last = Some(record);
    }
    assert_eq!(last.unwrap().channel(0)[0], 2);
}

#[test]
fn test_every_record_freed_exactly_once() {
    let rig = Rig::new(settings(1, 0), script(Some(1)));
    rig.script
        .lock()
        .unwrap()
        .steps
        .push_back(AdcStep::Fail(AdcError::Driver(-1)));
    let chirp = FlagNotify::new();

    {
        let mut sampler = rig.sampler(&chirp);
        // ADC failure, timeout, then eleven good cycles into an 8-deep queue
        chirp.notify();
        sampler.run_cycle();
        sampler.run_cycle();
        for _ in 0..11 {
            chirp.notify();
            sampler.run_cycle();
        }
    }

    let snapshot = rig.ledger.snapshot();
    assert_eq!(snapshot.allocated, 13);
    assert_eq!(snapshot.live(), 8);

    while rig.queue.try_dequeue().is_some() {}
    let snapshot = rig.ledger.snapshot();
    assert_eq!(snapshot.allocated, snapshot.freed);
}
