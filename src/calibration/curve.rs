// Noise calibration curve
//
// dB SPL is modelled as a straight line in log10(amplitude). Monotonicity is
// not enforced: the fit is well-defined on any data and judging the
// measurement is left to the operator.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{abort_sweep, linspace, MeasurementContext, ProgressEvent, SweepPoint, SweepStage};
use crate::analysis::fit::{fit_line, LineFit};
use crate::device::{Playable, Recordable};
use crate::error::{CalibrationError, SignalError};
use crate::synthesis::EqFilter;

/// Fitted dB SPL = slope * log10(amplitude) + intercept
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCurve {
    pub slope: f64,
    pub intercept: f64,
}

impl CalibrationCurve {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    /// Least-squares curve through (log10 amplitude, dB SPL) pairs
    pub fn from_points(amplitude_logs: &[f64], db_spl: &[f64]) -> Result<(Self, LineFit), CalibrationError> {
        let fit = fit_line(amplitude_logs, db_spl).ok_or_else(|| CalibrationError::DegenerateFit {
            reason: format!(
                "cannot fit a line through {} points (need >= 2 distinct, finite amplitudes and levels)",
                amplitude_logs.len().min(db_spl.len())
            ),
        })?;
        Ok((Self::new(fit.slope, fit.intercept), fit))
    }

    pub fn predict_db(&self, amplitude_log: f64) -> f64 {
        self.slope * amplitude_log + self.intercept
    }

    /// log10 amplitude expected to produce `target_db`; None for a flat curve
    pub fn amplitude_log_for(&self, target_db: f64) -> Option<f64> {
        if self.slope == 0.0 || !self.slope.is_finite() {
            return None;
        }
        let amplitude_log = (target_db - self.intercept) / self.slope;
        amplitude_log.is_finite().then_some(amplitude_log)
    }

    pub fn amplitude_for(&self, target_db: f64) -> Option<f64> {
        self.amplitude_log_for(target_db).map(|log| 10f64.powf(log))
    }
}

/// Amplitude sweep for the noise curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSweep {
    /// log10 of the quietest amplitude
    pub amp_min_log: f64,
    /// log10 of the loudest amplitude; at most 0
    pub amp_max_log: f64,
    pub n_steps: usize,
    /// Burst length in seconds
    pub duration: f64,
}

impl Default for NoiseSweep {
    fn default() -> Self {
        Self {
            amp_min_log: -1.5,
            amp_max_log: 0.0,
            n_steps: 7,
            duration: 1.0,
        }
    }
}

impl NoiseSweep {
    pub const MIN_STEPS: usize = 2;

    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.n_steps < Self::MIN_STEPS {
            return Err(CalibrationError::InsufficientSteps {
                required: Self::MIN_STEPS,
                requested: self.n_steps,
            });
        }
        SignalError::check_duration(self.duration)?;
        SignalError::check_amplitude(10f64.powf(self.amp_min_log))?;
        SignalError::check_amplitude(10f64.powf(self.amp_max_log))?;
        if !(self.amp_min_log < self.amp_max_log) {
            return Err(CalibrationError::DegenerateFit {
                reason: format!(
                    "amplitude range {}..{} (log10) has no width",
                    self.amp_min_log, self.amp_max_log
                ),
            });
        }
        Ok(())
    }

    /// Evenly spaced log10 amplitudes, quietest first
    pub fn amplitude_logs(&self) -> Vec<f64> {
        linspace(self.amp_min_log, self.amp_max_log, self.n_steps)
    }
}

/// Fitted curve plus every point it was fitted from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveFit {
    pub curve: CalibrationCurve,
    /// NaN when the measured levels have no variance
    #[serde(with = "super::nan_as_null")]
    pub r_squared: f64,
    pub points: Vec<SweepPoint>,
}

pub struct CalibrationCurveFitter {
    sweep: NoiseSweep,
}

impl CalibrationCurveFitter {
    pub fn new(sweep: NoiseSweep) -> Self {
        Self { sweep }
    }

    pub fn sweep(&self) -> &NoiseSweep {
        &self.sweep
    }

    /// Measure every sweep step with pre-equalized noise and fit the curve
    ///
    /// A device failure aborts the sweep; the points measured so far travel
    /// in [`CalibrationError::SweepAborted`].
    pub fn fit<P: Playable, R: Recordable>(
        &self,
        ctx: &mut MeasurementContext<'_, P, R>,
        eq: Option<&EqFilter>,
    ) -> Result<CurveFit, CalibrationError> {
        self.sweep.validate()?;
        let logs = self.sweep.amplitude_logs();
        let total = logs.len();

        ctx.progress.emit(ProgressEvent::StageStarted {
            stage: SweepStage::NoiseCurve,
            total,
        });

        let mut points: Vec<SweepPoint> = Vec::with_capacity(total);
        for (index, &amplitude_log) in logs.iter().enumerate() {
            let amplitude = 10f64.powf(amplitude_log);
            let recording = match ctx.measure_noise(eq, self.sweep.duration, amplitude) {
                Ok(recording) => recording,
                Err(err) => return Err(abort_sweep(err, total, points)),
            };
            let db_spl = recording.db_spl().unwrap_or(f64::NAN);
            debug!(
                "Noise step {}/{}: amplitude {:.4} -> {:.2} dB SPL",
                index + 1,
                total,
                amplitude,
                db_spl
            );
            ctx.progress.emit(ProgressEvent::SweepPointMeasured {
                stage: SweepStage::NoiseCurve,
                index,
                total,
                frequency: None,
                amplitude,
                db_spl,
            });
            points.push(SweepPoint::measured(None, amplitude, recording));
        }

        let levels: Vec<f64> = points
            .iter()
            .map(|p| p.db_spl.unwrap_or(f64::NAN))
            .collect();
        let (curve, fit) = CalibrationCurve::from_points(&logs, &levels)?;

        info!(
            "Noise curve: {:.3} dB/decade, intercept {:.2} dB SPL (r^2 {:.4})",
            curve.slope, curve.intercept, fit.r_squared
        );
        ctx.progress.emit(ProgressEvent::CurveFitted {
            slope: curve.slope,
            intercept: curve.intercept,
            r_squared: fit.r_squared,
        });
        ctx.progress.emit(ProgressEvent::StageFinished {
            stage: SweepStage::NoiseCurve,
            measured: points.len(),
        });

        Ok(CurveFit {
            curve,
            r_squared: fit.r_squared,
            points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_five_point_scenario() {
        let logs = [-1.0, -0.75, -0.5, -0.25, 0.0];
        let dbs = [40.0, 47.5, 55.0, 62.5, 70.0];
        let (curve, fit) = CalibrationCurve::from_points(&logs, &dbs).unwrap();
        assert_abs_diff_eq!(curve.slope, 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(curve.intercept, 70.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip_recovers_known_curve() {
        let truth = CalibrationCurve::new(19.7, 93.2);
        let logs = NoiseSweep::default().amplitude_logs();
        let dbs: Vec<f64> = logs.iter().map(|&l| truth.predict_db(l)).collect();
        let (curve, _) = CalibrationCurve::from_points(&logs, &dbs).unwrap();
        assert_abs_diff_eq!(curve.slope, truth.slope, epsilon = 1e-9);
        assert_abs_diff_eq!(curve.intercept, truth.intercept, epsilon = 1e-9);
    }

    #[test]
    fn test_non_monotonic_data_still_fits() {
        let logs = [-1.0, -0.5, 0.0];
        let dbs = [60.0, 50.0, 65.0];
        assert!(CalibrationCurve::from_points(&logs, &dbs).is_ok());
    }

    #[test]
    fn test_inversion() {
        let curve = CalibrationCurve::new(30.0, 70.0);
        assert_abs_diff_eq!(curve.amplitude_log_for(55.0).unwrap(), -0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(curve.amplitude_for(70.0).unwrap(), 1.0, epsilon = 1e-12);
        assert_eq!(CalibrationCurve::new(0.0, 70.0).amplitude_for(60.0), None);
    }

    #[test]
    fn test_missing_level_is_degenerate() {
        let logs = [-1.0, -0.5, 0.0];
        let dbs = [40.0, f64::NAN, 70.0];
        assert!(matches!(
            CalibrationCurve::from_points(&logs, &dbs),
            Err(CalibrationError::DegenerateFit { .. })
        ));
    }

    #[test]
    fn test_sweep_validation() {
        let sweep = NoiseSweep {
            n_steps: 1,
            ..NoiseSweep::default()
        };
        assert!(matches!(
            sweep.validate(),
            Err(CalibrationError::InsufficientSteps {
                required: 2,
                requested: 1
            })
        ));

        let loud = NoiseSweep {
            amp_max_log: 0.5,
            ..NoiseSweep::default()
        };
        assert!(matches!(
            loud.validate(),
            Err(CalibrationError::Signal(SignalError::AmplitudeOutOfRange { .. }))
        ));

        let inverted = NoiseSweep {
            amp_min_log: 0.0,
            amp_max_log: -1.0,
            ..NoiseSweep::default()
        };
        assert!(matches!(inverted.validate(), Err(CalibrationError::DegenerateFit { .. })));
    }
}
