//! Sound pressure level metering.
//!
//! Converts a captured microphone voltage waveform into dB SPL. The first and
//! last `trim_fraction` of the capture are discarded because they hold the
//! synchronization handshake and device settling rather than the stimulus.

use serde::{Deserialize, Serialize};

use crate::analysis::spectrum::{power_spectrum, rms};
use crate::sound::RecordedSound;

/// Standard reference pressure for dB SPL, 20 µPa
pub const REFERENCE_PRESSURE_PA: f64 = 20e-6;

/// Fraction of the capture dropped at each end before measuring
pub const DEFAULT_TRIM_FRACTION: f64 = 0.1;

/// Which estimator produces the level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelDomain {
    /// RMS of the pressure waveform (production value)
    #[default]
    Time,
    /// Parseval sum over the power spectrum (for cross-checking)
    Freq,
}

/// Calibrated dB SPL meter for one microphone chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelMeter {
    /// Microphone sensitivity in V/Pa
    pub mic_factor: f64,
    /// Reference pressure in Pa
    pub reference_pressure: f64,
    /// Fraction trimmed from each end, in [0, 0.5)
    pub trim_fraction: f64,
    pub domain: LevelDomain,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self {
            mic_factor: 1.0,
            reference_pressure: REFERENCE_PRESSURE_PA,
            trim_fraction: DEFAULT_TRIM_FRACTION,
            domain: LevelDomain::Time,
        }
    }
}

impl LevelMeter {
    pub fn new(mic_factor: f64) -> Self {
        Self {
            mic_factor,
            ..Self::default()
        }
    }

    pub fn with_domain(mut self, domain: LevelDomain) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_trim_fraction(mut self, trim_fraction: f64) -> Self {
        self.trim_fraction = trim_fraction.clamp(0.0, 0.49);
        self
    }

    /// dB SPL of a recording using the configured estimator
    ///
    /// Pure function of the stored samples. Returns NaN when nothing is
    /// left after trimming and -inf for a silent capture.
    pub fn db_spl(&self, recorded: &RecordedSound) -> f64 {
        self.db_spl_samples(recorded.samples())
    }

    pub fn db_spl_samples(&self, samples: &[f64]) -> f64 {
        match self.domain {
            LevelDomain::Time => self.db_spl_time(samples),
            LevelDomain::Freq => self.db_spl_freq(samples),
        }
    }

    /// Time-domain estimator: RMS of the trimmed pressure waveform
    pub fn db_spl_time(&self, samples: &[f64]) -> f64 {
        let trimmed = self.trim(samples);
        if trimmed.is_empty() {
            return f64::NAN;
        }
        let pressure_rms = rms(trimmed) / self.mic_factor;
        self.to_db(pressure_rms)
    }

    /// Frequency-domain estimator: `sqrt(sum |X|^2 / (N^2 * mic^2))`
    pub fn db_spl_freq(&self, samples: &[f64]) -> f64 {
        let trimmed = self.trim(samples);
        if trimmed.is_empty() {
            return f64::NAN;
        }
        let n = trimmed.len() as f64;
        let energy: f64 = power_spectrum(trimmed).iter().sum();
        let pressure_rms = (energy / (n * n * self.mic_factor * self.mic_factor)).sqrt();
        self.to_db(pressure_rms)
    }

    /// Middle section of the capture that is actually measured
    pub fn trim<'a>(&self, samples: &'a [f64]) -> &'a [f64] {
        let cut = (samples.len() as f64 * self.trim_fraction).floor() as usize;
        if 2 * cut >= samples.len() {
            return &[];
        }
        &samples[cut..samples.len() - cut]
    }

    fn to_db(&self, pressure_rms: f64) -> f64 {
        20.0 * (pressure_rms / self.reference_pressure).log10()
    }
}
