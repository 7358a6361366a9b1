// CalibrationSession - runs a whole protocol against one device pair
//
// Owns the transducer, synthesizer, meter and calibration band built from an
// AppConfig. Stages run strictly one after another; each borrows the session
// state through a MeasurementContext for its duration only.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{
    CalibrationTester, CurveFit, CurveTestReport, EqEstimate, EqFilterEstimator, GridRun,
    MeasurementContext, ProgressSink, PureToneCalibrationGrid, ToneTestReport,
};
use crate::analysis::level::LevelMeter;
use crate::config::AppConfig;
use crate::device::{Playable, Recordable};
use crate::engine::SynchronizedTransducer;
use crate::error::CalibrationError;
use crate::sound::RecordedSound;
use crate::synthesis::{BandPass, EqFilter, SignalSynthesizer};

/// Outcome of the noise protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseCalibration {
    /// Filter every noise stimulus was pre-equalized with
    pub eq: Option<EqFilter>,
    /// Probe the filter was estimated from; None when it was reused or disabled
    pub probe: Option<RecordedSound>,
    pub fit: CurveFit,
    pub test: CurveTestReport,
}

/// What a protocol had finished when a later stage failed
///
/// Carried by [`CalibrationError::ProtocolAborted`] so a failed verification
/// does not cost the fit or grid measured before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompletedStages {
    Noise {
        eq: Option<EqFilter>,
        probe: Option<RecordedSound>,
        fit: Option<CurveFit>,
    },
    Tone {
        run: GridRun,
    },
}

impl CompletedStages {
    /// Names of the finished stages, e.g. "EQ probe, noise curve"
    pub fn summary(&self) -> String {
        match self {
            CompletedStages::Noise { probe, fit, .. } => {
                let mut stages = Vec::new();
                if probe.is_some() {
                    stages.push("EQ probe");
                }
                if fit.is_some() {
                    stages.push("noise curve");
                }
                if stages.is_empty() {
                    "no stage".to_string()
                } else {
                    stages.join(", ")
                }
            }
            CompletedStages::Tone { run } => format!(
                "tone grid ({} of {} cells)",
                run.grid.points().len() - run.grid.missing(),
                run.grid.points().len()
            ),
        }
    }

    fn abort(self, source: CalibrationError) -> CalibrationError {
        warn!("Keeping {} after failure: {}", self.summary(), source);
        CalibrationError::ProtocolAborted {
            completed: Box::new(self),
            source: Box::new(source),
        }
    }
}

/// Outcome of the pure-tone protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneCalibration {
    pub run: GridRun,
    /// None when the grid has missing cells and was not verified
    pub test: Option<ToneTestReport>,
}

pub struct CalibrationSession<P: Playable, R: Recordable> {
    config: AppConfig,
    transducer: SynchronizedTransducer<P, R>,
    synthesizer: SignalSynthesizer,
    meter: LevelMeter,
    band: Option<BandPass>,
    progress: ProgressSink,
}

impl<P: Playable, R: Recordable> CalibrationSession<P, R> {
    pub fn new(player: P, recorder: R, config: AppConfig) -> Result<Self, CalibrationError> {
        let settings = config.transducer.settings(recorder.sample_rate())?;
        let transducer = SynchronizedTransducer::new(player, recorder, settings)?;
        let band = config.synthesis.band(transducer.playback_rate())?;
        Ok(Self {
            synthesizer: config.synthesis.synthesizer(),
            meter: config.level.clone(),
            transducer,
            band,
            config,
            progress: ProgressSink::none(),
        })
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn transducer(&self) -> &SynchronizedTransducer<P, R> {
        &self.transducer
    }

    pub fn meter(&self) -> &LevelMeter {
        &self.meter
    }

    pub fn band(&self) -> Option<&BandPass> {
        self.band.as_ref()
    }

    fn context(&mut self) -> MeasurementContext<'_, P, R> {
        MeasurementContext {
            synthesizer: &mut self.synthesizer,
            transducer: &mut self.transducer,
            meter: &self.meter,
            band: self.band.as_ref(),
            ramp_time: self.config.synthesis.ramp_time,
            progress: &self.progress,
        }
    }

    /// Play the configured probe and design an EQ filter from it
    pub fn estimate_eq(&mut self) -> Result<EqEstimate, CalibrationError> {
        let _span = tracing::info_span!("eq_probe").entered();
        let eq = self.config.eq.clone();
        let estimator = EqFilterEstimator::new(eq.design);
        let mut ctx = self.context();
        estimator.estimate(&mut ctx, eq.probe_duration, eq.probe_amplitude)
    }

    /// EQ (estimated or reused), curve fit, then verification
    ///
    /// A reused filter must have been designed for the playback rate.
    pub fn run_noise_protocol(
        &mut self,
        eq: Option<EqFilter>,
    ) -> Result<NoiseCalibration, CalibrationError> {
        let _span = tracing::info_span!("noise_protocol").entered();
        let sweep = self.config.noise_sweep.clone();
        sweep.sweep.validate()?;

        let (eq, probe) = match eq {
            Some(filter) => {
                let device = self.transducer.playback_rate();
                if (filter.sample_rate() - device).abs() > 1e-6 {
                    return Err(CalibrationError::SampleRateMismatch {
                        stimulus: filter.sample_rate(),
                        device,
                    });
                }
                info!("Reusing EQ filter with {} taps", filter.len());
                (Some(filter), None)
            }
            None if self.config.eq.enabled => {
                let estimate = self.estimate_eq()?;
                (Some(estimate.filter), Some(estimate.probe))
            }
            None => {
                info!("EQ disabled; noise is played un-equalized");
                (None, None)
            }
        };

        let fitter = super::CalibrationCurveFitter::new(sweep.sweep);
        let tester = CalibrationTester::new(sweep.test_duration);
        let mut ctx = self.context();

        let fitted = {
            let _span = tracing::info_span!("noise_curve").entered();
            fitter.fit(&mut ctx, eq.as_ref())
        };
        let fit = match fitted {
            Ok(fit) => fit,
            // A reused or disabled EQ leaves nothing new to keep
            Err(err) if probe.is_none() => return Err(err),
            Err(err) => return Err(CompletedStages::Noise { eq, probe, fit: None }.abort(err)),
        };

        let tested = {
            let _span = tracing::info_span!("noise_test").entered();
            tester.test(&mut ctx, &fit.curve, eq.as_ref(), &sweep.test_targets_db)
        };
        let test = match tested {
            Ok(test) => test,
            Err(err) => {
                return Err(CompletedStages::Noise {
                    eq,
                    probe,
                    fit: Some(fit),
                }
                .abort(err))
            }
        };

        info!(
            "Noise protocol done: slope {:.3} dB/decade, worst residual {:?} dB",
            fit.curve.slope,
            test.max_abs_residual()
        );
        Ok(NoiseCalibration {
            eq,
            probe,
            fit,
            test,
        })
    }

    /// Tone grid over the configured axes, then verification through the
    /// grid inversion
    pub fn run_tone_protocol(&mut self) -> Result<ToneCalibration, CalibrationError> {
        let axes = self.config.tone_sweep.axes.clone();
        axes.validate()?;
        self.run_tone_protocol_with_axes(&axes.frequencies(), &axes.amplitudes(), axes.duration)
    }

    /// Tone protocol over an explicit grid
    ///
    /// NaN amplitudes are skipped and left missing; a grid with missing cells
    /// is returned unverified.
    pub fn run_tone_protocol_with_axes(
        &mut self,
        frequencies: &[f64],
        amplitudes: &[f64],
        duration: f64,
    ) -> Result<ToneCalibration, CalibrationError> {
        let _span = tracing::info_span!("tone_protocol").entered();
        let tone = self.config.tone_sweep.clone();
        let tester = CalibrationTester::new(tone.test_duration);
        let mut ctx = self.context();

        let run = {
            let _span = tracing::info_span!("tone_grid").entered();
            PureToneCalibrationGrid::build_grid_with_axes(&mut ctx, frequencies, amplitudes, duration)?
        };

        if !run.grid.is_complete() {
            warn!(
                "Tone grid has {} missing cells; skipping verification",
                run.grid.missing()
            );
            return Ok(ToneCalibration { run, test: None });
        }

        let tested = {
            let _span = tracing::info_span!("tone_test").entered();
            tester.test_tones(
                &mut ctx,
                &run.grid,
                &tone.test_frequencies,
                &tone.test_targets_db,
            )
        };
        let test = match tested {
            Ok(test) => test,
            Err(err) => return Err(CompletedStages::Tone { run }.abort(err)),
        };
        Ok(ToneCalibration {
            run,
            test: Some(test),
        })
    }

    /// Release the playback device
    pub fn disconnect(&mut self) -> Result<(), CalibrationError> {
        self.transducer.disconnect()
    }
}
