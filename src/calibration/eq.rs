// EQ filter estimation
//
// Plays an un-equalized wideband probe, estimates the rig's power response
// with Welch's method, inverts it and designs a linear-phase FIR that
// flattens the band. The design step is a pure function of the probe
// recording, so a stored recording reproduces the same filter.

use log::info;
use serde::{Deserialize, Serialize};

use super::{linspace, MeasurementContext, ProgressEvent, SweepStage};
use crate::analysis::level::LevelMeter;
use crate::analysis::spectrum::{welch_psd, PowerSpectralDensity};
use crate::device::{Playable, Recordable};
use crate::error::{CalibrationError, SignalError};
use crate::sound::RecordedSound;
use crate::synthesis::{frequency_sampling_fir, BandPass, EqFilter};

/// Parameters of the inverse-response FIR design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqDesign {
    /// Welch segment length in seconds
    pub time_constant: f64,
    /// Regularizer added to the PSD before inversion, in V^2/Hz
    pub epsilon: f64,
    /// Lowest allowed correction in dB
    pub min_boost_db: f64,
    /// Highest allowed correction in dB
    pub max_boost_db: f64,
    /// FIR length; must be odd
    pub num_taps: usize,
}

impl Default for EqDesign {
    fn default() -> Self {
        Self {
            time_constant: 0.02,
            epsilon: 1e-12,
            min_boost_db: -24.0,
            max_boost_db: 12.0,
            num_taps: 1025,
        }
    }
}

impl EqDesign {
    /// Reject unusable design parameters before any probe is played
    pub fn validate(&self) -> Result<(), SignalError> {
        if self.num_taps < 3 || self.num_taps % 2 == 0 {
            return Err(SignalError::InvalidFilter {
                reason: format!("EQ tap count must be odd and >= 3 (got {})", self.num_taps),
            });
        }
        if !(self.time_constant.is_finite() && self.time_constant > 0.0) {
            return Err(SignalError::InvalidFilter {
                reason: format!("PSD time constant must be > 0 s (got {})", self.time_constant),
            });
        }
        if !(self.epsilon >= 0.0) {
            return Err(SignalError::InvalidFilter {
                reason: format!("PSD epsilon must be >= 0 (got {})", self.epsilon),
            });
        }
        if !(self.min_boost_db <= self.max_boost_db) {
            return Err(SignalError::InvalidFilter {
                reason: format!(
                    "boost range is inverted ({} dB .. {} dB)",
                    self.min_boost_db, self.max_boost_db
                ),
            });
        }
        Ok(())
    }
}

/// Result of one EQ estimation run
#[derive(Debug, Clone)]
pub struct EqEstimate {
    pub filter: EqFilter,
    /// The measured probe, level attached
    pub probe: RecordedSound,
    /// Response the filter was designed from
    pub psd: PowerSpectralDensity,
}

pub struct EqFilterEstimator {
    design: EqDesign,
}

impl EqFilterEstimator {
    pub fn new(design: EqDesign) -> Self {
        Self { design }
    }

    pub fn design(&self) -> &EqDesign {
        &self.design
    }

    /// Play a `duration` second probe at `amplitude` and design the EQ from it
    pub fn estimate<P: Playable, R: Recordable>(
        &self,
        ctx: &mut MeasurementContext<'_, P, R>,
        duration: f64,
        amplitude: f64,
    ) -> Result<EqEstimate, CalibrationError> {
        SignalError::check_duration(duration)?;
        SignalError::check_amplitude(amplitude)?;
        self.design.validate()?;

        ctx.progress.emit(ProgressEvent::StageStarted {
            stage: SweepStage::EqProbe,
            total: 1,
        });

        let probe = ctx.measure_noise(None, duration, amplitude)?;
        let (filter, psd) = self.design_from_recording(
            &probe,
            ctx.meter,
            ctx.band,
            ctx.transducer.playback_rate(),
        )?;

        let probe_db_spl = probe.db_spl().unwrap_or(f64::NAN);
        info!(
            "EQ filter estimated: {} taps from a {:.1} dB SPL probe",
            filter.len(),
            probe_db_spl
        );
        ctx.progress.emit(ProgressEvent::EqFilterEstimated {
            taps: filter.len(),
            probe_db_spl,
        });
        ctx.progress.emit(ProgressEvent::StageFinished {
            stage: SweepStage::EqProbe,
            measured: 1,
        });

        Ok(EqEstimate { filter, probe, psd })
    }

    /// Design the compensating FIR from a probe recording
    ///
    /// The inverse PSD is normalized to unit mean over the pass-band, clamped
    /// to the boost range (power dB), shaped by the band-pass magnitude and
    /// realized at `playback_rate`.
    pub fn design_from_recording(
        &self,
        probe: &RecordedSound,
        meter: &LevelMeter,
        band: Option<&BandPass>,
        playback_rate: f64,
    ) -> Result<(EqFilter, PowerSpectralDensity), CalibrationError> {
        self.design.validate()?;
        SignalError::check_sample_rate(playback_rate)?;

        let capture_rate = probe.sample_rate();
        let capture = meter.trim(probe.samples());
        let nperseg = ((self.design.time_constant * capture_rate).round() as usize).max(8);
        let psd = welch_psd(capture, capture_rate, nperseg).ok_or_else(|| {
            SignalError::EmptySignal {
                context: "EQ probe capture is empty after trimming".to_string(),
            }
        })?;

        let nyquist = playback_rate / 2.0;
        let measured_top = capture_rate / 2.0;
        let in_band = |f: f64| match band {
            Some(band) => band.passes(f),
            None => f > 0.0 && f <= measured_top,
        };

        let freqs = linspace(0.0, nyquist, 1 + self.design.num_taps.next_power_of_two());
        let inverse: Vec<f64> = freqs
            .iter()
            .map(|&f| 1.0 / (psd.at(f) + self.design.epsilon))
            .collect();

        let (sum, count) = freqs
            .iter()
            .zip(inverse.iter())
            .filter(|(f, _)| in_band(**f))
            .fold((0.0, 0usize), |(sum, count), (_, v)| (sum + v, count + 1));
        if count == 0 {
            return Err(CalibrationError::DegenerateFit {
                reason: "no analysis bins fall inside the pass-band".to_string(),
            });
        }
        let mean = sum / count as f64;
        if !(mean.is_finite() && mean > 0.0) {
            return Err(CalibrationError::DegenerateFit {
                reason: format!("inverse response has no usable mean ({})", mean),
            });
        }

        let floor = 10f64.powf(self.design.min_boost_db / 10.0);
        let ceiling = 10f64.powf(self.design.max_boost_db / 10.0);
        let gains: Vec<f64> = freqs
            .iter()
            .zip(inverse.iter())
            .map(|(&f, &inv)| {
                let power = (inv / mean).clamp(floor, ceiling);
                let edge = band.map_or(1.0, |band| band.magnitude_at(f));
                power.sqrt() * edge
            })
            .collect();

        let taps = frequency_sampling_fir(self.design.num_taps, &freqs, &gains, playback_rate)?;
        let filter = EqFilter::new(taps, playback_rate)?;
        Ok((filter, psd))
    }
}
