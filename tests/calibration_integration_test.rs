//! Integration tests for the calibration protocols
//!
//! These tests drive complete protocols against the simulated loopback rig:
//! - Noise protocol: EQ probe, curve fit and verification
//! - EQ estimation flattening a colored speaker path
//! - Partial results surviving a device failure mid-sweep
//! - Pure-tone grid measurement, inversion and verification
//! - Skipped grid cells and failures after a finished stage

use std::sync::{Arc, Mutex};

use speaker_calibration::analysis::{welch_psd, LevelMeter};
use speaker_calibration::calibration::{CompletedStages, ProgressEvent, ProgressSink, SweepStage};
use speaker_calibration::config::AppConfig;
use speaker_calibration::device::{loopback_pair, LoopbackConfig};
use speaker_calibration::error::{CalibrationError, DeviceError};
use speaker_calibration::sound::RecordedSound;
use speaker_calibration::CalibrationSession;

const SAMPLE_RATE: f64 = 16_000.0;

fn noise_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.synthesis.sample_rate = SAMPLE_RATE;
    config.synthesis.seed = Some(42);
    config.synthesis.band_low = 300.0;
    config.synthesis.band_high = 6_000.0;
    config.transducer.settle_delay_ms = 0;
    config.eq.probe_duration = 1.0;
    config.eq.design.num_taps = 255;
    config.noise_sweep.sweep.n_steps = 5;
    config.noise_sweep.sweep.duration = 0.5;
    config.noise_sweep.test_targets_db = vec![75.0, 85.0];
    config.noise_sweep.test_duration = 0.5;
    config
}

fn colored_rig(seed: u64) -> LoopbackConfig {
    LoopbackConfig {
        playback_rate: SAMPLE_RATE,
        capture_rate: SAMPLE_RATE,
        coloration: vec![0.15, 0.7, 0.15],
        seed: Some(seed),
        ..LoopbackConfig::default()
    }
}

/// Mean PSD between `low` and `high` Hz of the trimmed capture, in dB
fn band_power_db(recording: &RecordedSound, meter: &LevelMeter, low: f64, high: f64) -> f64 {
    let psd = welch_psd(meter.trim(recording.samples()), recording.sample_rate(), 320).unwrap();
    let (sum, count) = psd
        .frequencies
        .iter()
        .zip(psd.power.iter())
        .filter(|(f, _)| **f >= low && **f <= high)
        .fold((0.0, 0usize), |(s, c), (_, p)| (s + p, c + 1));
    10.0 * (sum / count as f64).log10()
}

/// Test the complete noise protocol on a colored rig
///
/// The rig is linear, so the fitted curve must have a 20 dB/decade slope and
/// every verification target must come back within a fraction of a dB.
#[test]
fn test_noise_protocol_end_to_end() {
    let config = noise_config();
    let (speaker, mic) = loopback_pair(colored_rig(1));
    let stages = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let stages = Arc::clone(&stages);
        ProgressSink::from_fn(move |event| {
            if let ProgressEvent::StageStarted { stage, .. } = event {
                stages.lock().unwrap().push(*stage);
            }
        })
    };
    let mut session = CalibrationSession::new(speaker, mic, config)
        .unwrap()
        .with_progress(sink);

    let result = session.run_noise_protocol(None).unwrap();

    assert!(result.eq.is_some(), "EQ should be estimated when enabled");
    assert!(result.probe.is_some());
    assert!(
        (result.fit.curve.slope - 20.0).abs() < 0.5,
        "slope was {}",
        result.fit.curve.slope
    );
    assert!(result.fit.r_squared > 0.999, "r^2 was {}", result.fit.r_squared);
    assert_eq!(result.fit.points.len(), 5);

    let residuals = result.test.residuals();
    assert_eq!(residuals.len(), 2);
    for residual in residuals {
        let residual = residual.expect("every target should be measured");
        assert!(residual.abs() < 1.0, "residual {} dB", residual);
    }

    assert_eq!(
        *stages.lock().unwrap(),
        vec![SweepStage::EqProbe, SweepStage::NoiseCurve, SweepStage::NoiseTest]
    );
}

/// Test that the estimated EQ removes the rig's high-frequency roll-off
#[test]
fn test_eq_flattens_colored_path() {
    let config = noise_config();
    let meter = config.level.clone();
    let (speaker, mic) = loopback_pair(colored_rig(2));
    let mut session = CalibrationSession::new(speaker, mic, config).unwrap();

    let result = session.run_noise_protocol(None).unwrap();

    let probe = result.probe.as_ref().unwrap();
    let raw_tilt = band_power_db(probe, &meter, 4_000.0, 5_000.0)
        - band_power_db(probe, &meter, 800.0, 1_500.0);
    assert!(raw_tilt < -2.5, "un-equalized tilt was {} dB", raw_tilt);

    let loudest = result.fit.points.last().unwrap().recording.as_ref().unwrap();
    let eq_tilt = band_power_db(loudest, &meter, 4_000.0, 5_000.0)
        - band_power_db(loudest, &meter, 800.0, 1_500.0);
    assert!(eq_tilt.abs() < 1.0, "equalized tilt was {} dB", eq_tilt);
}

/// Test that a stored EQ filter is reused without a new probe
#[test]
fn test_reused_eq_skips_probe() {
    let config = noise_config();
    let (speaker, mic) = loopback_pair(colored_rig(3));
    let mut session = CalibrationSession::new(speaker, mic, config.clone()).unwrap();
    let first = session.run_noise_protocol(None).unwrap();
    let filter = first.eq.clone().unwrap();

    let (speaker, mic) = loopback_pair(colored_rig(4));
    let mut session = CalibrationSession::new(speaker, mic, config).unwrap();
    let second = session.run_noise_protocol(Some(filter.clone())).unwrap();

    assert!(second.probe.is_none());
    assert_eq!(second.eq.as_ref(), Some(&filter));
    // 5 sweep steps + 2 targets, no probe
    assert_eq!(session.transducer().player().plays(), 7);
    assert!((second.fit.curve.intercept - first.fit.curve.intercept).abs() < 0.5);
}

/// Test that a device failure mid-sweep keeps the points already measured
#[test]
fn test_device_failure_surfaces_partial_results() {
    let mut config = noise_config();
    config.eq.enabled = false;
    let rig = LoopbackConfig {
        fail_after_plays: Some(2),
        ..colored_rig(5)
    };
    let (speaker, mic) = loopback_pair(rig);
    let mut session = CalibrationSession::new(speaker, mic, config).unwrap();

    let err = session.run_noise_protocol(None).unwrap_err();
    match &err {
        CalibrationError::SweepAborted {
            completed,
            total,
            source,
            partial,
        } => {
            assert_eq!(*completed, 2);
            assert_eq!(*total, 5);
            assert!(matches!(source, DeviceError::ConnectionFailed { .. }));
            assert_eq!(partial.len(), 2);
            assert!(partial.iter().all(|p| p.db_spl.is_some()));
        }
        other => panic!("Expected SweepAborted, got {:?}", other),
    }
    assert_eq!(err.partial_results().len(), 2);
}

fn tone_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.synthesis.sample_rate = SAMPLE_RATE;
    config.synthesis.band_high = 6_000.0;
    config.transducer.settle_delay_ms = 0;
    config.tone_sweep.axes.freq_min = 1_000.0;
    config.tone_sweep.axes.freq_max = 4_000.0;
    config.tone_sweep.axes.n_freqs = 3;
    config.tone_sweep.axes.amp_min = 0.01;
    config.tone_sweep.axes.amp_max = 1.0;
    config.tone_sweep.axes.n_amps = 4;
    config.tone_sweep.axes.duration = 0.25;
    config.tone_sweep.test_frequencies = vec![1_500.0, 3_000.0];
    config.tone_sweep.test_targets_db = vec![70.0, 90.0, 130.0];
    config.tone_sweep.test_duration = 0.25;
    config
}

/// Test the pure-tone protocol: grid, inversion and verification
///
/// The flat rig makes level affine in log10(amplitude), which the grid
/// inverts exactly. The 130 dB target is above the loudest grid point and
/// must come back missing rather than zero.
#[test]
fn test_tone_protocol_end_to_end() {
    let config = tone_config();
    let rig = LoopbackConfig {
        playback_rate: SAMPLE_RATE,
        capture_rate: SAMPLE_RATE,
        seed: Some(6),
        ..LoopbackConfig::default()
    };
    let (speaker, mic) = loopback_pair(rig);
    let mut session = CalibrationSession::new(speaker, mic, config).unwrap();

    let result = session.run_tone_protocol().unwrap();
    let grid = &result.run.grid;
    assert!(grid.is_complete());
    assert_eq!(grid.points().len(), 12);

    // Same amplitude, different frequencies: the flat rig gives the same level
    let low = grid.point(0, 3).unwrap().db_spl.unwrap();
    let high = grid.point(2, 3).unwrap().db_spl.unwrap();
    assert!((low - high).abs() < 0.2);

    let report = result.test.expect("complete grid is verified");
    assert_eq!(report.points.len(), 6);
    assert_eq!(report.missing(), 2);
    for point in report.points.iter().filter(|p| p.target_db < 100.0) {
        let residual = point.residual().unwrap();
        assert!(
            residual.abs() < 0.5,
            "{} Hz at {} dB: residual {}",
            point.frequency,
            point.target_db,
            residual
        );
    }
    for point in report.points.iter().filter(|p| p.target_db > 100.0) {
        assert!(point.point.is_missing());
        assert!(point.point.amplitude.is_nan());
    }
}

/// Test that a NaN amplitude in the device sweep is skipped, not played
///
/// The skipped cells stay missing, each one is reported, and a grid with
/// holes is returned without verification.
#[test]
fn test_skipped_amplitude_leaves_grid_unverified() {
    let config = tone_config();
    let rig = LoopbackConfig {
        playback_rate: SAMPLE_RATE,
        capture_rate: SAMPLE_RATE,
        seed: Some(7),
        ..LoopbackConfig::default()
    };
    let (speaker, mic) = loopback_pair(rig);
    let skipped = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let skipped = Arc::clone(&skipped);
        ProgressSink::from_fn(move |event| {
            if let ProgressEvent::GridPointSkipped { frequency, .. } = event {
                skipped.lock().unwrap().push(*frequency);
            }
        })
    };
    let mut session = CalibrationSession::new(speaker, mic, config)
        .unwrap()
        .with_progress(sink);

    let result = session
        .run_tone_protocol_with_axes(&[1_000.0, 3_000.0], &[0.01, f64::NAN, 1.0], 0.25)
        .unwrap();

    let grid = &result.run.grid;
    assert!(!grid.is_complete());
    assert_eq!(grid.missing(), 2);
    for freq_index in 0..2 {
        assert_eq!(grid.point(freq_index, 1).unwrap().db_spl, None);
        assert!(grid.point(freq_index, 0).unwrap().db_spl.is_some());
        assert!(grid.point(freq_index, 2).unwrap().db_spl.is_some());
    }
    assert_eq!(result.run.points.iter().filter(|p| p.is_missing()).count(), 2);
    assert_eq!(*skipped.lock().unwrap(), vec![1_000.0, 3_000.0]);
    assert!(result.test.is_none());
    // Two frequencies x two usable amplitudes; no verification plays
    assert_eq!(session.transducer().player().plays(), 4);
}

/// Test that a failure while verifying the tone grid keeps the grid
#[test]
fn test_tone_verification_failure_keeps_grid() {
    let config = tone_config();
    let rig = LoopbackConfig {
        playback_rate: SAMPLE_RATE,
        capture_rate: SAMPLE_RATE,
        seed: Some(8),
        fail_after_plays: Some(12),
        ..LoopbackConfig::default()
    };
    let (speaker, mic) = loopback_pair(rig);
    let mut session = CalibrationSession::new(speaker, mic, config).unwrap();

    let err = session.run_tone_protocol().unwrap_err();
    match err.completed_stages() {
        Some(CompletedStages::Tone { run }) => {
            assert!(run.grid.is_complete());
            assert_eq!(run.points.len(), 12);
        }
        other => panic!("Expected the measured grid, got {:?}", other.map(|c| c.summary())),
    }
    match &err {
        CalibrationError::ProtocolAborted { source, .. } => match source.as_ref() {
            CalibrationError::SweepAborted {
                completed, source, ..
            } => {
                assert_eq!(*completed, 0);
                assert!(matches!(source, DeviceError::ConnectionFailed { .. }));
            }
            other => panic!("Expected SweepAborted, got {:?}", other),
        },
        other => panic!("Expected ProtocolAborted, got {:?}", other),
    }
}
