//! Stimulus synthesis - white noise and pure tones
//!
//! Every stimulus is a finite [`Sound`] with a raised-cosine-squared ramp at
//! both ends. Noise can be band-limited and pre-equalized; the equalizer is
//! passed in explicitly on every call rather than held as synthesizer state.
//!
//! Samples are hard-clamped to [-1, 1] before the envelope is applied, so the
//! ramp shape is never distorted by rescaling.

pub mod envelope;
pub mod filters;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::analysis::spectrum::rms;
use crate::error::SignalError;
use crate::sound::Sound;

pub use envelope::{ramp_envelope, ramp_samples};
pub use filters::{frequency_sampling_fir, BandPass, Biquad, EqFilter};

/// Gaussian draws are divided by this so ~99% of the mass lands in [-1, 1]
pub const GAUSSIAN_SPREAD: f64 = 2.575_829_303_549;

/// Distribution of raw noise samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseSource {
    /// Normal distribution, rescaled by [`GAUSSIAN_SPREAD`]
    #[default]
    Gaussian,
    /// Uniform on [-1, 1]
    Uniform,
}

/// Parameters of one noise burst
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseSpec {
    pub duration: f64,
    pub sample_rate: f64,
    pub amplitude: f64,
    pub ramp_time: f64,
}

/// Parameters of one pure tone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneSpec {
    pub duration: f64,
    pub sample_rate: f64,
    pub frequency: f64,
    /// Starting phase in radians
    pub phase: f64,
    pub amplitude: f64,
    pub ramp_time: f64,
}

/// Check shared contract and return (total samples, ramp samples)
fn check_timing(
    duration: f64,
    sample_rate: f64,
    amplitude: f64,
    ramp_time: f64,
) -> Result<(usize, usize), SignalError> {
    SignalError::check_duration(duration)?;
    SignalError::check_sample_rate(sample_rate)?;
    SignalError::check_amplitude(amplitude)?;

    let total = (duration * sample_rate).round() as usize;
    if total == 0 {
        return Err(SignalError::EmptySignal {
            context: format!("{} s at {} Hz rounds to zero samples", duration, sample_rate),
        });
    }
    let ramp = ramp_samples(ramp_time, sample_rate);
    if 2 * ramp > total {
        return Err(SignalError::RampTooLong {
            ramp_samples: ramp,
            total_samples: total,
        });
    }
    Ok((total, ramp))
}

/// Produces noise and tone stimuli from a seedable random source
pub struct SignalSynthesizer {
    rng: StdRng,
    source: NoiseSource,
}

impl SignalSynthesizer {
    /// Create a synthesizer; a fixed `seed` makes every burst reproducible
    pub fn new(source: NoiseSource, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, source }
    }

    pub fn source(&self) -> NoiseSource {
        self.source
    }

    fn draw(&mut self) -> f64 {
        match self.source {
            NoiseSource::Uniform => self.rng.gen_range(-1.0..=1.0),
            NoiseSource::Gaussian => {
                // Box-Muller; u1 in (0, 1] keeps ln finite
                let u1: f64 = 1.0 - self.rng.gen::<f64>();
                let u2: f64 = self.rng.gen::<f64>();
                (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos() / GAUSSIAN_SPREAD
            }
        }
    }

    /// White noise burst, optionally band-limited and pre-equalized
    ///
    /// Pipeline: draw, band-pass, EQ convolution with RMS restored to the
    /// pre-EQ value, clamp to [-1, 1], ramp envelope, amplitude.
    pub fn white_noise(
        &mut self,
        spec: &NoiseSpec,
        band: Option<&BandPass>,
        eq: Option<&EqFilter>,
    ) -> Result<Sound, SignalError> {
        let (total, ramp) = check_timing(spec.duration, spec.sample_rate, spec.amplitude, spec.ramp_time)?;
        let envelope = ramp_envelope(total, ramp)?;

        let mut samples: Vec<f64> = (0..total).map(|_| self.draw()).collect();

        if let Some(band) = band {
            samples = band.apply_checked(&samples, spec.sample_rate)?;
        }

        if let Some(eq) = eq {
            let before = rms(&samples);
            samples = eq.apply(&samples, spec.sample_rate)?;
            let after = rms(&samples);
            if after > 0.0 {
                let gain = before / after;
                samples.iter_mut().for_each(|s| *s *= gain);
            }
        }

        for (s, g) in samples.iter_mut().zip(envelope.iter()) {
            *s = s.clamp(-1.0, 1.0) * g * spec.amplitude;
        }

        Ok(Sound::new(samples, spec.sample_rate))
    }

    /// Ramped sine at `spec.frequency`; no spectral shaping
    pub fn pure_tone(&self, spec: &ToneSpec) -> Result<Sound, SignalError> {
        let (total, ramp) = check_timing(spec.duration, spec.sample_rate, spec.amplitude, spec.ramp_time)?;
        let nyquist = spec.sample_rate / 2.0;
        if !(0.0..=nyquist).contains(&spec.frequency) {
            return Err(SignalError::InvalidFrequency {
                frequency: spec.frequency,
                nyquist,
            });
        }
        let envelope = ramp_envelope(total, ramp)?;

        let omega = 2.0 * PI * spec.frequency / spec.sample_rate;
        let samples = envelope
            .iter()
            .enumerate()
            .map(|(n, g)| (omega * n as f64 + spec.phase).sin() * g * spec.amplitude)
            .collect();

        Ok(Sound::new(samples, spec.sample_rate))
    }
}
