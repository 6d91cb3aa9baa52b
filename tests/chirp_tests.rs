//! Chirp generator timing tests

mod common;

use std::sync::atomic::{AtomicU32, Ordering};

use common::RecordingDac;
use vradar_firmware::chirp::Phase;
use vradar_firmware::hal::dac::DAC_MID_CODE;
use vradar_firmware::sync::Notify;
use vradar_firmware::{AlarmAction, ChirpConfig, ChirpControl, ChirpGenerator};

#[derive(Default)]
struct CountNotify(AtomicU32);

impl CountNotify {
    fn count(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Notify for CountNotify {
    fn notify(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn wait(&self, _timeout_us: Option<u64>) -> bool {
        false
    }
}

/// Run `ticks` ticks; return the tick indices at which a cycle started.
fn run(
    gen: &mut ChirpGenerator,
    control: &ChirpControl,
    dac: &mut RecordingDac,
    starts: &CountNotify,
    ticks: u32,
) -> Vec<u32> {
    let mut at = Vec::new();
    for k in 0..ticks {
        let before = starts.count();
        gen.on_tick(control, dac, starts);
        if starts.count() > before {
            at.push(k);
        }
    }
    at
}

#[test]
fn test_reference_waveform() {
    // period 2000us, 1000us ramp in 100 steps
    let cfg = ChirpConfig::new(2000, 1000, 100, 0, 40).unwrap();
    let control = ChirpControl::new(cfg);
    let mut gen = ChirpGenerator::new(cfg);
    let mut dac = RecordingDac::default();
    let starts = CountNotify::default();

    assert_eq!(cfg.tick_us(), 10);
    let cycles = run(&mut gen, &control, &mut dac, &starts, 600);

    // One start per 2000us
    let start_times: Vec<u32> = cycles.iter().map(|k| k * cfg.tick_us()).collect();
    assert_eq!(start_times, vec![0, 2000, 4000]);

    let ramp = dac.ramp();
    assert_eq!(ramp.len(), 600);
    for k in 0..100 {
        assert_eq!(ramp[k], (k as u16) * 40, "ramp step {}", k);
    }
    // 1000us of zeros
    assert!(ramp[100..200].iter().all(|&c| c == 0));
    // Repeats exactly
    assert_eq!(ramp[0..200], ramp[200..400]);
    assert_eq!(ramp[0..200], ramp[400..600]);

    // Tone channel silent and written once
    assert_eq!(dac.tone(), vec![0]);
}

#[test]
fn test_cycle_length_within_one_tick() {
    let cases = [
        (2000, 1000, 100),
        (1000, 199, 100),
        (997, 500, 7),
        (5000, 5000, 64),
        (300, 100, 3),
        (12, 12, 12),
    ];

    for &(period, active, steps) in &cases {
        let cfg = ChirpConfig::new(period, active, steps, 0, 1).unwrap();
        let control = ChirpControl::new(cfg);
        let mut gen = ChirpGenerator::new(cfg);
        let mut dac = RecordingDac::default();
        let starts = CountNotify::default();

        let mut cycle_starts = Vec::new();
        for k in 0..cfg.cycle_ticks() * 4 {
            match gen.phase() {
                Phase::Ramp(s) => assert!(s < steps),
                Phase::Pause(n) => assert!(n >= 1),
                Phase::Idle => panic!("idle while enabled"),
            }
            let before = starts.count();
            gen.on_tick(&control, &mut dac, &starts);
            if starts.count() > before {
                cycle_starts.push(k);
            }
        }

        assert_eq!(cycle_starts.len(), 4);
        for pair in cycle_starts.windows(2) {
            let ticks = pair[1] - pair[0];
            assert_eq!(ticks, cfg.cycle_ticks());
            let measured = (ticks * cfg.tick_us()) as i64;
            assert!(
                (measured - period as i64).abs() < cfg.tick_us() as i64,
                "period {} measured {}",
                period,
                measured
            );
        }
    }
}

#[test]
fn test_disable_takes_effect_at_cycle_boundary() {
    // tick 5us, 4 ramp + 4 pause
    let cfg = ChirpConfig::new(40, 20, 4, 0, 40).unwrap();
    let control = ChirpControl::new(cfg);
    let mut gen = ChirpGenerator::new(cfg);
    let mut dac = RecordingDac::default();
    let starts = CountNotify::default();

    run(&mut gen, &control, &mut dac, &starts, 2);
    control.set_enabled(false);

    // Current cycle completes
    run(&mut gen, &control, &mut dac, &starts, 6);
    assert_eq!(dac.ramp(), vec![0, 40, 80, 120, 0, 0, 0, 0]);
    assert_eq!(starts.count(), 1);

    // Then idle: zeros, no starts
    run(&mut gen, &control, &mut dac, &starts, 20);
    assert_eq!(gen.phase(), Phase::Idle);
    assert_eq!(starts.count(), 1);
    assert!(dac.ramp()[8..].iter().all(|&c| c == 0));

    control.set_enabled(true);
    run(&mut gen, &control, &mut dac, &starts, 1);
    assert_eq!(starts.count(), 2);
    assert_eq!(gen.phase(), Phase::Ramp(1));
}

#[test]
fn test_audible_tone_alternates_per_cycle() {
    // No pause: 4 ticks per cycle
    let cfg = ChirpConfig::new(20, 20, 4, 0, 40).unwrap();
    let control = ChirpControl::new(cfg);
    control.set_audible(true);
    let mut gen = ChirpGenerator::new(cfg);
    let mut dac = RecordingDac::default();
    let starts = CountNotify::default();

    run(&mut gen, &control, &mut dac, &starts, 16);

    assert_eq!(starts.count(), 4);
    assert_eq!(dac.tone(), vec![DAC_MID_CODE, 0, DAC_MID_CODE, 0]);
}

#[test]
fn test_new_timing_retunes_at_boundary() {
    let cfg = ChirpConfig::new(2000, 1000, 100, 0, 40).unwrap();
    let control = ChirpControl::new(cfg);
    let mut gen = ChirpGenerator::new(cfg);
    let mut dac = RecordingDac::default();
    let starts = CountNotify::default();

    run(&mut gen, &control, &mut dac, &starts, 10);
    // 4000us period, 20us tick
    let slower = ChirpConfig::new(4000, 2000, 100, 0, 40).unwrap();
    control.publish(&slower);

    let mut retunes = Vec::new();
    for k in 10..400u32 {
        if let AlarmAction::Retune(tick) = gen.on_tick(&control, &mut dac, &starts) {
            retunes.push((k, tick));
        }
    }

    assert_eq!(retunes, vec![(200, 20)]);
    assert_eq!(gen.config(), &slower);
    // New cycle: 100 ramp + 100 pause ticks of 20us
    assert_eq!(slower.cycle_ticks(), 200);
    assert_eq!(starts.count(), 2);
}

#[test]
fn test_same_tick_change_needs_no_retune() {
    let cfg = ChirpConfig::new(2000, 1000, 100, 0, 40).unwrap();
    let control = ChirpControl::new(cfg);
    let mut gen = ChirpGenerator::new(cfg);
    let mut dac = RecordingDac::default();
    let starts = CountNotify::default();

    run(&mut gen, &control, &mut dac, &starts, 1);
    let steeper = ChirpConfig::new(2000, 1000, 100, 0, 20).unwrap();
    control.publish(&steeper);

    for _ in 1..200 {
        assert_eq!(gen.on_tick(&control, &mut dac, &starts), AlarmAction::Continue);
    }
    assert_eq!(gen.on_tick(&control, &mut dac, &starts), AlarmAction::Continue);
    assert_eq!(gen.config().resolution, 20);
    assert_eq!(*dac.ramp().last().unwrap(), 0);
}

#[test]
fn test_dac_errors_do_not_disturb_timing() {
    let cfg = ChirpConfig::new(40, 20, 4, 0, 40).unwrap();
    let control = ChirpControl::new(cfg);
    let mut gen = ChirpGenerator::new(cfg);
    let mut dac = RecordingDac {
        broken: true,
        ..Default::default()
    };
    let starts = CountNotify::default();

    let cycles = run(&mut gen, &control, &mut dac, &starts, 24);

    assert_eq!(cycles, vec![0, 8, 16]);
    // Every channel A write failed, plus the one tone write
    assert_eq!(gen.write_errors(), 24 + 1);
    assert_eq!(gen.cycles(), 3);
}
