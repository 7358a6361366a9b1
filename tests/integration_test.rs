//! Integration tests for the synchronized play/record path
//!
//! These tests exercise the transducer against the simulated rig in
//! real-time mode, plus the synthesis -> playback -> metering chain:
//! - Step bracketing and wall-clock budget
//! - Capture length at the acquisition rate
//! - dB SPL of a known stimulus through a known rig

use std::time::{Duration, Instant};

use speaker_calibration::analysis::LevelMeter;
use speaker_calibration::device::{loopback_pair, LoopbackConfig};
use speaker_calibration::engine::{SynchronizedTransducer, TransducerSettings};
use speaker_calibration::error::CalibrationError;
use speaker_calibration::synthesis::{NoiseSource, SignalSynthesizer, ToneSpec};

/// Test that a real-time 2 s step joins within its budget
///
/// Budget: duration + settle delay + device overhead.
#[test]
fn test_realtime_step_joins_within_budget() {
    let rig = LoopbackConfig {
        playback_rate: 16_000.0,
        capture_rate: 16_000.0,
        realtime: true,
        seed: Some(1),
        ..LoopbackConfig::default()
    };
    let (speaker, mic) = loopback_pair(rig);
    let settings = TransducerSettings {
        settle_delay: Duration::from_millis(100),
        ..TransducerSettings::default()
    };
    let mut transducer = SynchronizedTransducer::new(speaker, mic, settings).unwrap();

    let synthesizer = SignalSynthesizer::new(NoiseSource::Gaussian, Some(1));
    let tone = synthesizer
        .pure_tone(&ToneSpec {
            duration: 2.0,
            sample_rate: 16_000.0,
            frequency: 1000.0,
            phase: 0.0,
            amplitude: 1.0,
            ramp_time: 0.01,
        })
        .unwrap();

    let started = Instant::now();
    let recording = transducer.play_and_record(&tone, 2.0, 0.5).unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(2), "returned after {:?}", elapsed);
    assert!(
        elapsed <= transducer.step_budget(2.0),
        "took {:?}, budget {:?}",
        elapsed,
        transducer.step_budget(2.0)
    );
    assert_eq!(recording.samples().len(), 32_000);
    assert_eq!(recording.sample_rate(), 16_000.0);
}

/// Test the level of a known tone through a known rig
///
/// Amplitude 0.5 on both channels sums to a unit-peak drive; at 2 Pa per
/// unit that is 2 Pa peak, sqrt(2) Pa RMS, 20 log10(sqrt(2) / 20e-6) dB SPL.
#[test]
fn test_known_tone_level() {
    let rig = LoopbackConfig {
        playback_rate: 48_000.0,
        capture_rate: 48_000.0,
        mic_factor: 0.05,
        noise_floor_pa: 0.0,
        latency: Duration::ZERO,
        seed: Some(2),
        ..LoopbackConfig::default()
    };
    let (speaker, mic) = loopback_pair(rig);
    let settings = TransducerSettings {
        settle_delay: Duration::ZERO,
        ..TransducerSettings::default()
    };
    let mut transducer = SynchronizedTransducer::new(speaker, mic, settings).unwrap();

    let synthesizer = SignalSynthesizer::new(NoiseSource::Uniform, None);
    let tone = synthesizer
        .pure_tone(&ToneSpec {
            duration: 0.5,
            sample_rate: 48_000.0,
            frequency: 1000.0,
            phase: 0.0,
            amplitude: 1.0,
            ramp_time: 0.01,
        })
        .unwrap();

    let mut recording = transducer.play_and_record(&tone, 0.5, 0.5).unwrap();
    let measured = recording.measure(&LevelMeter::new(0.05));
    let expected = 20.0 * (2f64.sqrt() / 20e-6).log10();
    assert!((measured - expected).abs() < 0.05, "measured {} dB SPL", measured);
    assert_eq!(recording.db_spl(), Some(measured));
}

/// Test that capturing from a channel the device lacks is a device error
#[test]
fn test_invalid_channel_is_a_device_error() {
    let (speaker, mic) = loopback_pair(LoopbackConfig {
        seed: Some(3),
        ..LoopbackConfig::default()
    });
    let settings = TransducerSettings {
        channel: 5,
        settle_delay: Duration::ZERO,
        ..TransducerSettings::default()
    };
    let mut transducer = SynchronizedTransducer::new(speaker, mic, settings).unwrap();
    let synthesizer = SignalSynthesizer::new(NoiseSource::Gaussian, Some(3));
    let tone = synthesizer
        .pure_tone(&ToneSpec {
            duration: 0.1,
            sample_rate: 48_000.0,
            frequency: 500.0,
            phase: 0.0,
            amplitude: 1.0,
            ramp_time: 0.0,
        })
        .unwrap();

    let err = transducer.play_and_record(&tone, 0.1, 1.0).unwrap_err();
    assert!(matches!(err, CalibrationError::Device(_)), "got {:?}", err);
}
