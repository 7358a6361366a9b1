// Calibration module - amplitude to dB SPL mapping for noise and tones
//
// The protocol runs strictly downstream:
// 1. EqFilterEstimator plays a wideband probe and designs a compensating FIR
// 2. CalibrationCurveFitter sweeps pre-equalized noise and fits dB vs log10(amplitude)
// 3. CalibrationTester replays target levels through the fitted curve
//
// The pure-tone path replaces steps 2 and 3 with PureToneCalibrationGrid,
// which measures a frequency x amplitude grid and inverts it by interpolation.

pub mod curve;
pub mod eq;
pub mod progress;
pub mod session;
pub mod tester;
pub mod tone_grid;

pub use curve::{CalibrationCurve, CalibrationCurveFitter, CurveFit, NoiseSweep};
pub use eq::{EqDesign, EqEstimate, EqFilterEstimator};
pub use progress::{ProgressEvent, ProgressSink, SweepStage};
pub use session::{CalibrationSession, CompletedStages, NoiseCalibration, ToneCalibration};
pub use tester::{CalibrationTester, CurveTestPoint, CurveTestReport, ToneTestPoint, ToneTestReport};
pub use tone_grid::{
    CalibrationGrid, FrequencySpacing, GridAxes, GridPoint, GridRun, PureToneCalibrationGrid,
};

use serde::{Deserialize, Serialize};

use crate::analysis::level::LevelMeter;
use crate::device::{Playable, Recordable};
use crate::engine::SynchronizedTransducer;
use crate::error::CalibrationError;
use crate::sound::RecordedSound;
use crate::synthesis::{BandPass, EqFilter, NoiseSpec, SignalSynthesizer};

/// Everything one play/record/measure step needs, borrowed for a single stage
pub struct MeasurementContext<'a, P: Playable, R: Recordable> {
    pub synthesizer: &'a mut SignalSynthesizer,
    pub transducer: &'a mut SynchronizedTransducer<P, R>,
    pub meter: &'a LevelMeter,
    /// Calibration band applied to every noise stimulus
    pub band: Option<&'a BandPass>,
    /// Ramp length at each end of every stimulus, in seconds
    pub ramp_time: f64,
    pub progress: &'a ProgressSink,
}

impl<P: Playable, R: Recordable> MeasurementContext<'_, P, R> {
    /// Synthesize a unit-amplitude noise burst, play it at `amplitude`, measure it
    pub(crate) fn measure_noise(
        &mut self,
        eq: Option<&EqFilter>,
        duration: f64,
        amplitude: f64,
    ) -> Result<RecordedSound, CalibrationError> {
        let spec = NoiseSpec {
            duration,
            sample_rate: self.transducer.playback_rate(),
            amplitude: 1.0,
            ramp_time: self.ramp_time,
        };
        let stimulus = self.synthesizer.white_noise(&spec, self.band, eq)?;
        let mut recording = self.transducer.play_and_record(&stimulus, duration, amplitude)?;
        recording.measure(self.meter);
        Ok(recording)
    }
}

/// One measured (or skipped) point of any sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    /// Tone frequency in Hz; None for noise
    pub frequency: Option<f64>,
    /// Linear amplitude multiplier sent to the playback device
    #[serde(with = "nan_as_null")]
    pub amplitude: f64,
    /// Measured level; None if the point was skipped
    pub db_spl: Option<f64>,
    pub recording: Option<RecordedSound>,
}

impl SweepPoint {
    /// A non-finite level (silent or empty capture) counts as missing
    pub fn measured(frequency: Option<f64>, amplitude: f64, recording: RecordedSound) -> Self {
        Self {
            frequency,
            amplitude,
            db_spl: recording.db_spl().filter(|db| db.is_finite()),
            recording: Some(recording),
        }
    }

    pub fn missing(frequency: Option<f64>, amplitude: f64) -> Self {
        Self {
            frequency,
            amplitude,
            db_spl: None,
            recording: None,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.db_spl.is_none()
    }
}

/// Turn a device failure mid-sweep into an abort carrying the points so far
///
/// Contract violations pass through unchanged; sweeps check those before
/// touching a device.
pub(crate) fn abort_sweep(
    err: CalibrationError,
    total: usize,
    partial: Vec<SweepPoint>,
) -> CalibrationError {
    match err {
        CalibrationError::Device(source) => CalibrationError::SweepAborted {
            completed: partial.len(),
            total,
            source,
            partial,
        },
        other => other,
    }
}

/// Serde adapter writing NaN as JSON null and reading null back as NaN
pub(crate) mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        (!value.is_nan()).then_some(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }

    pub mod vec {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
            values
                .iter()
                .map(|v| (!v.is_nan()).then_some(*v))
                .collect::<Vec<_>>()
                .serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
            Ok(Vec::<Option<f64>>::deserialize(deserializer)?
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect())
        }
    }
}

/// `n` values spaced evenly from `start` to `end` inclusive
pub(crate) fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..n)
            .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

/// `n` values spaced geometrically from `start` to `end`, both > 0
pub(crate) fn geomspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    linspace(start.log10(), end.log10(), n)
        .into_iter()
        .map(|e| 10f64.powf(e))
        .collect()
}
