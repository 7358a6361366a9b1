// Pure-tone calibration grid
//
// Measures a frequency x amplitude grid (one loaded tone per frequency,
// amplitude as the inner loop) and inverts it: given a frequency and a target
// level, interpolate the amplitude over the (frequency, measured dB) scatter.
// Queries outside the measured hull are missing, never extrapolated.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{abort_sweep, geomspace, linspace, MeasurementContext, ProgressEvent, SweepPoint, SweepStage};
use crate::analysis::interpolate::LinearScatterInterpolator;
use crate::device::{Playable, Recordable};
use crate::error::{CalibrationError, SignalError};
use crate::synthesis::ToneSpec;

/// How grid frequencies are spread between the range ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencySpacing {
    #[default]
    Log,
    Linear,
}

/// Rectangular sweep description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridAxes {
    pub freq_min: f64,
    pub freq_max: f64,
    pub n_freqs: usize,
    pub spacing: FrequencySpacing,
    /// Quietest linear amplitude, in (0, 1]
    pub amp_min: f64,
    /// Loudest linear amplitude, in (0, 1]
    pub amp_max: f64,
    pub n_amps: usize,
    /// Tone length in seconds
    pub duration: f64,
}

impl Default for GridAxes {
    fn default() -> Self {
        Self {
            freq_min: 1000.0,
            freq_max: 16_000.0,
            n_freqs: 5,
            spacing: FrequencySpacing::Log,
            amp_min: 0.01,
            amp_max: 1.0,
            n_amps: 5,
            duration: 0.5,
        }
    }
}

impl GridAxes {
    pub fn frequencies(&self) -> Vec<f64> {
        match self.spacing {
            FrequencySpacing::Log => geomspace(self.freq_min, self.freq_max, self.n_freqs),
            FrequencySpacing::Linear => linspace(self.freq_min, self.freq_max, self.n_freqs),
        }
    }

    /// Geometrically spaced amplitudes, quietest first
    pub fn amplitudes(&self) -> Vec<f64> {
        geomspace(self.amp_min, self.amp_max, self.n_amps)
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        for amplitude in [self.amp_min, self.amp_max] {
            if !(amplitude > 0.0) {
                return Err(SignalError::AmplitudeOutOfRange { amplitude }.into());
            }
        }
        if !(self.freq_min > 0.0) {
            return Err(SignalError::InvalidFrequency {
                frequency: self.freq_min,
                nyquist: f64::INFINITY,
            }
            .into());
        }
        Ok(())
    }
}

/// One cell of the grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub frequency: f64,
    /// NaN for a skipped point
    #[serde(with = "super::nan_as_null")]
    pub amplitude: f64,
    /// None when the point was skipped or produced no finite level
    pub db_spl: Option<f64>,
}

// Serialized form; the interpolator is rebuilt on load
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GridRecord {
    frequencies: Vec<f64>,
    #[serde(with = "super::nan_as_null::vec")]
    amplitudes: Vec<f64>,
    points: Vec<GridPoint>,
}

/// Frozen frequency x amplitude measurements, ready for inversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GridRecord", into = "GridRecord")]
pub struct CalibrationGrid {
    frequencies: Vec<f64>,
    amplitudes: Vec<f64>,
    /// Row-major: all amplitudes of the first frequency, then the next
    points: Vec<GridPoint>,
    inverse: LinearScatterInterpolator,
}

impl From<GridRecord> for CalibrationGrid {
    fn from(record: GridRecord) -> Self {
        CalibrationGrid::new(record.frequencies, record.amplitudes, record.points)
    }
}

impl From<CalibrationGrid> for GridRecord {
    fn from(grid: CalibrationGrid) -> Self {
        GridRecord {
            frequencies: grid.frequencies,
            amplitudes: grid.amplitudes,
            points: grid.points,
        }
    }
}

impl CalibrationGrid {
    /// Freeze measured cells; row-major by frequency, then amplitude
    pub fn new(frequencies: Vec<f64>, amplitudes: Vec<f64>, points: Vec<GridPoint>) -> Self {
        // Amplitude is interpolated in log10 so a dB-linear rig inverts exactly
        let scatter: Vec<(f64, f64, f64)> = points
            .iter()
            .filter_map(|p| p.db_spl.map(|db| (p.frequency, db, p.amplitude.log10())))
            .collect();
        let inverse = LinearScatterInterpolator::new(&scatter);
        Self {
            frequencies,
            amplitudes,
            points,
            inverse,
        }
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn amplitudes(&self) -> &[f64] {
        &self.amplitudes
    }

    pub fn points(&self) -> &[GridPoint] {
        &self.points
    }

    pub fn point(&self, freq_index: usize, amp_index: usize) -> Option<&GridPoint> {
        if amp_index >= self.amplitudes.len() {
            return None;
        }
        self.points.get(freq_index * self.amplitudes.len() + amp_index)
    }

    /// Measured levels as a frequency-by-amplitude matrix
    pub fn db_matrix(&self) -> Vec<Vec<Option<f64>>> {
        self.points
            .chunks(self.amplitudes.len().max(1))
            .map(|row| row.iter().map(|p| p.db_spl).collect())
            .collect()
    }

    pub fn missing(&self) -> usize {
        self.points.iter().filter(|p| p.db_spl.is_none()).count()
    }

    /// True once every cell holds a level
    pub fn is_complete(&self) -> bool {
        self.points.len() == self.frequencies.len() * self.amplitudes.len() && self.missing() == 0
    }

    pub fn require_complete(&self) -> Result<(), CalibrationError> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(CalibrationError::Incomplete {
                missing: self.missing(),
                total: self.frequencies.len() * self.amplitudes.len(),
            })
        }
    }

    /// Amplitude expected to produce `target_db` at `frequency`
    ///
    /// None outside the convex hull of the measured (frequency, dB) pairs.
    pub fn query(&self, frequency: f64, target_db: f64) -> Option<f64> {
        self.inverse
            .query(frequency, target_db)
            .map(|amplitude_log| 10f64.powf(amplitude_log))
    }
}

/// Grid plus the sweep points it was measured from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRun {
    pub grid: CalibrationGrid,
    pub points: Vec<SweepPoint>,
}

pub struct PureToneCalibrationGrid {
    axes: GridAxes,
}

impl PureToneCalibrationGrid {
    pub const MIN_STEPS: usize = 2;

    pub fn new(axes: GridAxes) -> Self {
        Self { axes }
    }

    pub fn axes(&self) -> &GridAxes {
        &self.axes
    }

    /// Measure the configured rectangular grid
    pub fn build_grid<P: Playable, R: Recordable>(
        &self,
        ctx: &mut MeasurementContext<'_, P, R>,
    ) -> Result<GridRun, CalibrationError> {
        self.axes.validate()?;
        Self::build_grid_with_axes(
            ctx,
            &self.axes.frequencies(),
            &self.axes.amplitudes(),
            self.axes.duration,
        )
    }

    /// Measure an explicit grid; NaN amplitudes are skipped and left missing
    pub fn build_grid_with_axes<P: Playable, R: Recordable>(
        ctx: &mut MeasurementContext<'_, P, R>,
        frequencies: &[f64],
        amplitudes: &[f64],
        duration: f64,
    ) -> Result<GridRun, CalibrationError> {
        for len in [frequencies.len(), amplitudes.len()] {
            if len < Self::MIN_STEPS {
                return Err(CalibrationError::InsufficientSteps {
                    required: Self::MIN_STEPS,
                    requested: len,
                });
            }
        }
        SignalError::check_duration(duration)?;
        let sample_rate = ctx.transducer.playback_rate();
        let nyquist = sample_rate / 2.0;
        for &frequency in frequencies {
            if !(frequency > 0.0 && frequency <= nyquist) {
                return Err(SignalError::InvalidFrequency { frequency, nyquist }.into());
            }
        }
        // Levels are inverted in log10(amplitude), so zero has no place on the grid
        for &amplitude in amplitudes.iter().filter(|a| !a.is_nan()) {
            if amplitude <= 0.0 {
                return Err(SignalError::AmplitudeOutOfRange { amplitude }.into());
            }
            SignalError::check_amplitude(amplitude)?;
        }

        let total = frequencies.len() * amplitudes.len();
        ctx.progress.emit(ProgressEvent::StageStarted {
            stage: SweepStage::ToneGrid,
            total,
        });

        let mut cells: Vec<GridPoint> = Vec::with_capacity(total);
        let mut points: Vec<SweepPoint> = Vec::with_capacity(total);

        for &frequency in frequencies {
            let tone = ctx.synthesizer.pure_tone(&ToneSpec {
                duration,
                sample_rate,
                frequency,
                phase: 0.0,
                amplitude: 1.0,
                ramp_time: ctx.ramp_time,
            })?;
            let index = match ctx.transducer.load(&tone) {
                Ok(index) => index,
                Err(err) => return Err(abort_sweep(err, total, points)),
            };

            for &amplitude in amplitudes {
                if amplitude.is_nan() {
                    warn!("Skipping grid point at {:.1} Hz: amplitude is undefined", frequency);
                    ctx.progress.emit(ProgressEvent::GridPointSkipped {
                        frequency,
                        amplitude,
                    });
                    cells.push(GridPoint {
                        frequency,
                        amplitude,
                        db_spl: None,
                    });
                    points.push(SweepPoint::missing(Some(frequency), amplitude));
                    continue;
                }

                let mut recording =
                    match ctx.transducer.play_loaded_and_record(index, duration, amplitude) {
                        Ok(recording) => recording,
                        Err(err) => return Err(abort_sweep(err, total, points)),
                    };
                let db_spl = recording.measure(ctx.meter);
                debug!(
                    "Tone {:.1} Hz at amplitude {:.4} -> {:.2} dB SPL",
                    frequency, amplitude, db_spl
                );
                ctx.progress.emit(ProgressEvent::SweepPointMeasured {
                    stage: SweepStage::ToneGrid,
                    index: points.len(),
                    total,
                    frequency: Some(frequency),
                    amplitude,
                    db_spl,
                });
                cells.push(GridPoint {
                    frequency,
                    amplitude,
                    db_spl: db_spl.is_finite().then_some(db_spl),
                });
                points.push(SweepPoint::measured(Some(frequency), amplitude, recording));
            }
        }

        let grid = CalibrationGrid::new(frequencies.to_vec(), amplitudes.to_vec(), cells);
        info!(
            "Tone grid: {} frequencies x {} amplitudes, {} missing",
            frequencies.len(),
            amplitudes.len(),
            grid.missing()
        );
        ctx.progress.emit(ProgressEvent::StageFinished {
            stage: SweepStage::ToneGrid,
            measured: total - grid.missing(),
        });

        Ok(GridRun { grid, points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // Rig whose level is 20 log10(amplitude) + 90 - frequency / 1000
    fn synthetic_grid(amplitudes: &[f64]) -> CalibrationGrid {
        let frequencies = vec![1000.0, 2000.0, 4000.0];
        let points = frequencies
            .iter()
            .flat_map(|&frequency| {
                amplitudes.iter().map(move |&amplitude| GridPoint {
                    frequency,
                    amplitude,
                    db_spl: (!amplitude.is_nan())
                        .then(|| 20.0 * amplitude.log10() + 90.0 - frequency / 1000.0),
                })
            })
            .collect();
        CalibrationGrid::new(frequencies, amplitudes.to_vec(), points)
    }

    #[test]
    fn test_query_exact_at_grid_points() {
        let grid = synthetic_grid(&[0.1, 0.3, 1.0]);
        assert!(grid.is_complete());
        for p in grid.points() {
            let amplitude = grid.query(p.frequency, p.db_spl.unwrap()).unwrap();
            assert_relative_eq!(amplitude, p.amplitude, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_query_between_points() {
        let grid = synthetic_grid(&[0.1, 0.3, 1.0]);
        // 2 kHz, 78 dB -> 20 log10(a) = -10 -> a = 0.316
        let amplitude = grid.query(2000.0, 78.0).unwrap();
        assert_relative_eq!(amplitude, 10f64.powf(-0.5), max_relative = 1e-9);
    }

    #[test]
    fn test_query_outside_hull_is_missing() {
        let grid = synthetic_grid(&[0.1, 0.3, 1.0]);
        assert_eq!(grid.query(1000.0, 120.0), None);
        assert_eq!(grid.query(500.0, 80.0), None);
        assert_eq!(grid.query(8000.0, 80.0), None);
    }

    #[test]
    fn test_skipped_point_is_missing_not_zero() {
        let grid = synthetic_grid(&[0.1, f64::NAN, 1.0]);
        assert!(!grid.is_complete());
        assert_eq!(grid.missing(), 3);
        assert_eq!(grid.point(1, 1).unwrap().db_spl, None);
        assert!(matches!(
            grid.require_complete(),
            Err(CalibrationError::Incomplete {
                missing: 3,
                total: 9
            })
        ));
        // The remaining points still invert
        assert!(grid.query(2000.0, 78.0).is_some());
    }

    #[test]
    fn test_skipped_grid_survives_json() {
        let grid = synthetic_grid(&[0.1, f64::NAN, 1.0]);
        let json = serde_json::to_string(&grid).unwrap();
        let restored: CalibrationGrid = serde_json::from_str(&json).unwrap();
        assert!(restored.amplitudes()[1].is_nan());
        assert_eq!(restored.missing(), 3);
    }

    #[test]
    fn test_db_matrix_shape() {
        let grid = synthetic_grid(&[0.1, 1.0]);
        let matrix = grid.db_matrix();
        assert_eq!(matrix.len(), 3);
        assert!(matrix.iter().all(|row| row.len() == 2));
        assert_relative_eq!(matrix[0][1].unwrap(), 89.0, max_relative = 1e-12);
    }

    #[test]
    fn test_grid_survives_json() {
        let grid = synthetic_grid(&[0.1, 0.3, 1.0]);
        let json = serde_json::to_string(&grid).unwrap();
        let restored: CalibrationGrid = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.points(), grid.points());
        assert_eq!(restored.query(2000.0, 78.0), grid.query(2000.0, 78.0));
    }

    #[test]
    fn test_zero_amplitude_rejected_before_any_play() {
        use crate::analysis::level::LevelMeter;
        use crate::calibration::ProgressSink;
        use crate::device::{loopback_pair, LoopbackConfig};
        use crate::engine::{SynchronizedTransducer, TransducerSettings};
        use crate::synthesis::{NoiseSource, SignalSynthesizer};

        let (speaker, mic) = loopback_pair(LoopbackConfig {
            seed: Some(11),
            ..LoopbackConfig::default()
        });
        let mut transducer =
            SynchronizedTransducer::new(speaker, mic, TransducerSettings::default()).unwrap();
        let mut synthesizer = SignalSynthesizer::new(NoiseSource::Gaussian, Some(11));
        let meter = LevelMeter::default();
        let progress = ProgressSink::none();
        let mut ctx = MeasurementContext {
            synthesizer: &mut synthesizer,
            transducer: &mut transducer,
            meter: &meter,
            band: None,
            ramp_time: 0.01,
            progress: &progress,
        };

        let result = PureToneCalibrationGrid::build_grid_with_axes(
            &mut ctx,
            &[1000.0, 2000.0],
            &[0.0, 0.5],
            0.1,
        );
        assert!(matches!(
            result,
            Err(CalibrationError::Signal(SignalError::AmplitudeOutOfRange { amplitude }))
                if amplitude == 0.0
        ));
        assert_eq!(transducer.player().plays(), 0);
    }

    #[test]
    fn test_build_grid_measures_every_cell() {
        use crate::analysis::level::LevelMeter;
        use crate::calibration::ProgressSink;
        use crate::device::{loopback_pair, LoopbackConfig};
        use crate::engine::{SynchronizedTransducer, TransducerSettings};
        use crate::synthesis::{NoiseSource, SignalSynthesizer};
        use std::time::Duration;

        let (speaker, mic) = loopback_pair(LoopbackConfig {
            playback_rate: 16_000.0,
            capture_rate: 16_000.0,
            seed: Some(12),
            ..LoopbackConfig::default()
        });
        let settings = TransducerSettings {
            settle_delay: Duration::ZERO,
            ..TransducerSettings::default()
        };
        let mut transducer = SynchronizedTransducer::new(speaker, mic, settings).unwrap();
        let mut synthesizer = SignalSynthesizer::new(NoiseSource::Gaussian, Some(12));
        let meter = LevelMeter::default();
        let progress = ProgressSink::none();
        let mut ctx = MeasurementContext {
            synthesizer: &mut synthesizer,
            transducer: &mut transducer,
            meter: &meter,
            band: None,
            ramp_time: 0.01,
            progress: &progress,
        };

        let builder = PureToneCalibrationGrid::new(GridAxes {
            freq_min: 1000.0,
            freq_max: 2000.0,
            n_freqs: 2,
            amp_min: 0.1,
            amp_max: 1.0,
            n_amps: 2,
            duration: 0.1,
            ..GridAxes::default()
        });
        let run = builder.build_grid(&mut ctx).unwrap();
        assert!(run.grid.is_complete());
        assert_eq!(run.points.len(), 4);
        // One decade of amplitude is 20 dB on a linear rig
        let quiet = run.grid.point(0, 0).unwrap().db_spl.unwrap();
        let loud = run.grid.point(0, 1).unwrap().db_spl.unwrap();
        assert!((loud - quiet - 20.0).abs() < 0.5, "step was {} dB", loud - quiet);
        assert_eq!(transducer.player().plays(), 4);
    }

    #[test]
    fn test_axes_spacing() {
        let axes = GridAxes {
            freq_min: 1000.0,
            freq_max: 4000.0,
            n_freqs: 3,
            amp_min: 0.01,
            amp_max: 1.0,
            n_amps: 3,
            ..GridAxes::default()
        };
        let freqs = axes.frequencies();
        assert_relative_eq!(freqs[1], 2000.0, max_relative = 1e-12);
        let amps = axes.amplitudes();
        assert_relative_eq!(amps[1], 0.1, max_relative = 1e-12);

        let linear = GridAxes {
            spacing: FrequencySpacing::Linear,
            ..axes
        };
        assert_relative_eq!(linear.frequencies()[1], 2500.0, max_relative = 1e-12);
    }
}
