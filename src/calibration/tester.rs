// Calibration verification
//
// Replays target levels through a fitted curve (noise) or a frozen grid
// (tones) and reports what was actually measured. Deviations are surfaced,
// never corrected in the loop.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{
    abort_sweep, CalibrationCurve, CalibrationGrid, MeasurementContext, ProgressEvent,
    SweepPoint, SweepStage,
};
use crate::device::{Playable, Recordable};
use crate::error::{CalibrationError, SignalError};
use crate::synthesis::{EqFilter, ToneSpec};

/// One noise target and its measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveTestPoint {
    pub target_db: f64,
    pub point: SweepPoint,
}

impl CurveTestPoint {
    /// Measured minus target, in dB
    pub fn residual(&self) -> Option<f64> {
        self.point.db_spl.map(|db| db - self.target_db)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveTestReport {
    pub points: Vec<CurveTestPoint>,
}

impl CurveTestReport {
    pub fn residuals(&self) -> Vec<Option<f64>> {
        self.points.iter().map(CurveTestPoint::residual).collect()
    }

    pub fn max_abs_residual(&self) -> Option<f64> {
        max_abs(self.residuals())
    }
}

/// One (frequency, target) pair; the point is missing when the grid had no answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneTestPoint {
    pub frequency: f64,
    pub target_db: f64,
    pub point: SweepPoint,
}

impl ToneTestPoint {
    pub fn residual(&self) -> Option<f64> {
        self.point.db_spl.map(|db| db - self.target_db)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneTestReport {
    pub points: Vec<ToneTestPoint>,
}

impl ToneTestReport {
    pub fn residuals(&self) -> Vec<Option<f64>> {
        self.points.iter().map(ToneTestPoint::residual).collect()
    }

    /// Targets the grid could not invert
    pub fn missing(&self) -> usize {
        self.points.iter().filter(|p| p.point.is_missing()).count()
    }

    pub fn max_abs_residual(&self) -> Option<f64> {
        max_abs(self.residuals())
    }
}

fn max_abs(residuals: Vec<Option<f64>>) -> Option<f64> {
    residuals
        .into_iter()
        .flatten()
        .map(f64::abs)
        .fold(None, |max, r| Some(max.map_or(r, |m: f64| m.max(r))))
}

fn check_reachable(target_db: f64, amplitude: f64) -> Result<(), CalibrationError> {
    if SignalError::check_amplitude(amplitude).is_err() {
        return Err(CalibrationError::UnreachableTarget {
            target_db,
            amplitude,
        });
    }
    Ok(())
}

pub struct CalibrationTester {
    duration: f64,
}

impl CalibrationTester {
    pub fn new(duration: f64) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Play pre-equalized noise at each target through the inverted curve
    ///
    /// Every target is inverted and range-checked before the first play.
    pub fn test<P: Playable, R: Recordable>(
        &self,
        ctx: &mut MeasurementContext<'_, P, R>,
        curve: &CalibrationCurve,
        eq: Option<&EqFilter>,
        targets_db: &[f64],
    ) -> Result<CurveTestReport, CalibrationError> {
        SignalError::check_duration(self.duration)?;
        let mut plan = Vec::with_capacity(targets_db.len());
        for &target_db in targets_db {
            let amplitude = curve
                .amplitude_for(target_db)
                .ok_or_else(|| CalibrationError::DegenerateFit {
                    reason: format!("curve with slope {} cannot be inverted", curve.slope),
                })?;
            check_reachable(target_db, amplitude)?;
            plan.push((target_db, amplitude));
        }

        let total = plan.len();
        ctx.progress.emit(ProgressEvent::StageStarted {
            stage: SweepStage::NoiseTest,
            total,
        });

        let mut points: Vec<CurveTestPoint> = Vec::with_capacity(total);
        for (target_db, amplitude) in plan {
            let recording = match ctx.measure_noise(eq, self.duration, amplitude) {
                Ok(recording) => recording,
                Err(err) => {
                    let partial = points.into_iter().map(|p| p.point).collect();
                    return Err(abort_sweep(err, total, partial));
                }
            };
            let point = CurveTestPoint {
                target_db,
                point: SweepPoint::measured(None, amplitude, recording),
            };
            debug!(
                "Noise test: target {:.1} dB SPL, measured {:?}",
                target_db, point.point.db_spl
            );
            ctx.progress.emit(ProgressEvent::TestPointMeasured {
                stage: SweepStage::NoiseTest,
                frequency: None,
                target_db,
                measured_db: point.point.db_spl,
            });
            points.push(point);
        }

        let report = CurveTestReport { points };
        info!(
            "Noise test: {} targets, worst residual {:?} dB",
            total,
            report.max_abs_residual()
        );
        ctx.progress.emit(ProgressEvent::StageFinished {
            stage: SweepStage::NoiseTest,
            measured: total,
        });
        Ok(report)
    }

    /// Play each (frequency, target) through the grid inversion
    ///
    /// Targets outside the measured hull are reported as missing and not
    /// played.
    pub fn test_tones<P: Playable, R: Recordable>(
        &self,
        ctx: &mut MeasurementContext<'_, P, R>,
        grid: &CalibrationGrid,
        frequencies: &[f64],
        targets_db: &[f64],
    ) -> Result<ToneTestReport, CalibrationError> {
        SignalError::check_duration(self.duration)?;
        let sample_rate = ctx.transducer.playback_rate();
        let nyquist = sample_rate / 2.0;

        let mut plan: Vec<(f64, Vec<(f64, Option<f64>)>)> = Vec::with_capacity(frequencies.len());
        for &frequency in frequencies {
            if !(frequency > 0.0 && frequency <= nyquist) {
                return Err(SignalError::InvalidFrequency { frequency, nyquist }.into());
            }
            let mut row = Vec::with_capacity(targets_db.len());
            for &target_db in targets_db {
                let amplitude = grid.query(frequency, target_db);
                if let Some(amplitude) = amplitude {
                    check_reachable(target_db, amplitude)?;
                }
                row.push((target_db, amplitude));
            }
            plan.push((frequency, row));
        }

        let total = frequencies.len() * targets_db.len();
        ctx.progress.emit(ProgressEvent::StageStarted {
            stage: SweepStage::ToneTest,
            total,
        });

        let mut points: Vec<ToneTestPoint> = Vec::with_capacity(total);
        for (frequency, row) in plan {
            let index = if row.iter().any(|(_, amplitude)| amplitude.is_some()) {
                let tone = ctx.synthesizer.pure_tone(&ToneSpec {
                    duration: self.duration,
                    sample_rate,
                    frequency,
                    phase: 0.0,
                    amplitude: 1.0,
                    ramp_time: ctx.ramp_time,
                })?;
                match ctx.transducer.load(&tone) {
                    Ok(index) => Some(index),
                    Err(err) => {
                        let partial = points.into_iter().map(|p| p.point).collect();
                        return Err(abort_sweep(err, total, partial));
                    }
                }
            } else {
                None
            };

            for (target_db, amplitude) in row {
                let point = match (index, amplitude) {
                    (Some(index), Some(amplitude)) => {
                        let mut recording = match ctx
                            .transducer
                            .play_loaded_and_record(index, self.duration, amplitude)
                        {
                            Ok(recording) => recording,
                            Err(err) => {
                                let partial = points.into_iter().map(|p| p.point).collect();
                                return Err(abort_sweep(err, total, partial));
                            }
                        };
                        recording.measure(ctx.meter);
                        SweepPoint::measured(Some(frequency), amplitude, recording)
                    }
                    _ => {
                        warn!(
                            "No grid inversion for {:.1} dB SPL at {:.1} Hz; reported as missing",
                            target_db, frequency
                        );
                        SweepPoint::missing(Some(frequency), f64::NAN)
                    }
                };
                ctx.progress.emit(ProgressEvent::TestPointMeasured {
                    stage: SweepStage::ToneTest,
                    frequency: Some(frequency),
                    target_db,
                    measured_db: point.db_spl,
                });
                points.push(ToneTestPoint {
                    frequency,
                    target_db,
                    point,
                });
            }
        }

        let report = ToneTestReport { points };
        info!(
            "Tone test: {} targets, {} missing, worst residual {:?} dB",
            total,
            report.missing(),
            report.max_abs_residual()
        );
        ctx.progress.emit(ProgressEvent::StageFinished {
            stage: SweepStage::ToneTest,
            measured: total - report.missing(),
        });
        Ok(report)
    }
}
