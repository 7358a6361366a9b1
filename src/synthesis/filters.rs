// Digital filters for stimulus shaping
//
// Two filter families are used by the calibration chain:
// 1. BandPass: steep Butterworth band-pass built from cascaded second-order
//    sections (bilinear transform), used to confine noise to the calibration
//    band and optionally to clean up captures.
// 2. EqFilter: linear-phase FIR taps estimated from the rig's measured
//    response, applied by FFT convolution.

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::analysis::spectrum::{
    convolve_same, hamming_window, interp_linear, irfft_real,
};
use crate::error::SignalError;

/// Relative tolerance when comparing a filter's design rate to a signal's rate
const RATE_TOLERANCE: f64 = 1e-9;

fn rates_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= RATE_TOLERANCE * a.abs().max(b.abs())
}

/// One second-order IIR section, normalized so a0 = 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    /// Bilinear-transform lowpass section with quality factor `q`
    pub fn lowpass(cutoff: f64, q: f64, sample_rate: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let norm = 1.0 / (1.0 + k / q + k * k);
        let b0 = k * k * norm;
        Self {
            b0,
            b1: 2.0 * b0,
            b2: b0,
            a1: 2.0 * (k * k - 1.0) * norm,
            a2: (1.0 - k / q + k * k) * norm,
        }
    }

    /// Bilinear-transform highpass section with quality factor `q`
    pub fn highpass(cutoff: f64, q: f64, sample_rate: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let norm = 1.0 / (1.0 + k / q + k * k);
        Self {
            b0: norm,
            b1: -2.0 * norm,
            b2: norm,
            a1: 2.0 * (k * k - 1.0) * norm,
            a2: (1.0 - k / q + k * k) * norm,
        }
    }

    /// Filter `x` in place, transposed direct form II, zero initial state
    pub fn filter_in_place(&self, x: &mut [f64]) {
        let (mut z1, mut z2) = (0.0, 0.0);
        for v in x.iter_mut() {
            let input = *v;
            let out = self.b0 * input + z1;
            z1 = self.b1 * input - self.a1 * out + z2;
            z2 = self.b2 * input - self.a2 * out;
            *v = out;
        }
    }

    /// Complex response at normalized angular frequency `omega` (rad/sample)
    pub fn response(&self, omega: f64) -> Complex<f64> {
        let z1 = Complex::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        let num = Complex::new(self.b0, 0.0) + z1 * self.b1 + z2 * self.b2;
        let den = Complex::new(1.0, 0.0) + z1 * self.a1 + z2 * self.a2;
        num / den
    }
}

/// Q factors of the second-order sections of an even-order Butterworth filter
fn butterworth_qs(order: usize) -> Vec<f64> {
    (0..order / 2)
        .map(|k| 1.0 / (2.0 * (PI * (2 * k + 1) as f64 / (2 * order) as f64).sin()))
        .collect()
}

/// Butterworth band-pass as a highpass cascade followed by a lowpass cascade
///
/// `order` is the order of each edge, so the cascade has `2 * order` poles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandPass {
    low: f64,
    high: f64,
    order: usize,
    sample_rate: f64,
    sections: Vec<Biquad>,
}

impl BandPass {
    pub fn butterworth(
        low: f64,
        high: f64,
        order: usize,
        sample_rate: f64,
    ) -> Result<Self, SignalError> {
        SignalError::check_sample_rate(sample_rate)?;
        let nyquist = sample_rate / 2.0;
        if !(low > 0.0 && low < high && high < nyquist) {
            return Err(SignalError::InvalidBand { low, high, nyquist });
        }
        if order < 2 || order % 2 != 0 {
            return Err(SignalError::InvalidFilter {
                reason: format!("band-pass edge order must be even and >= 2 (got {})", order),
            });
        }

        let qs = butterworth_qs(order);
        let mut sections: Vec<Biquad> = qs
            .iter()
            .map(|&q| Biquad::highpass(low, q, sample_rate))
            .collect();
        sections.extend(qs.iter().map(|&q| Biquad::lowpass(high, q, sample_rate)));

        Ok(Self {
            low,
            high,
            order,
            sample_rate,
            sections,
        })
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Total number of poles in the cascade
    pub fn total_order(&self) -> usize {
        2 * self.order
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// True if `frequency` lies inside the pass-band edges
    pub fn passes(&self, frequency: f64) -> bool {
        frequency >= self.low && frequency <= self.high
    }

    /// Same band redesigned for another sample rate
    pub fn at_sample_rate(&self, sample_rate: f64) -> Result<Self, SignalError> {
        Self::butterworth(self.low, self.high, self.order, sample_rate)
    }

    /// Run the cascade over `x`
    pub fn apply(&self, x: &[f64]) -> Vec<f64> {
        let mut y = x.to_vec();
        for section in &self.sections {
            section.filter_in_place(&mut y);
        }
        y
    }

    /// Filter a signal sampled at `sample_rate`, rejecting a rate mismatch
    pub fn apply_checked(&self, x: &[f64], sample_rate: f64) -> Result<Vec<f64>, SignalError> {
        if !rates_match(self.sample_rate, sample_rate) {
            return Err(SignalError::InvalidFilter {
                reason: format!(
                    "band-pass designed for {} Hz applied at {} Hz",
                    self.sample_rate, sample_rate
                ),
            });
        }
        Ok(self.apply(x))
    }

    /// Magnitude response at `frequency` Hz
    pub fn magnitude_at(&self, frequency: f64) -> f64 {
        let omega = 2.0 * PI * frequency / self.sample_rate;
        self.sections
            .iter()
            .map(|s| s.response(omega).norm())
            .product()
    }
}

/// Compensation filter estimated from the rig's measured response
///
/// Immutable once built. Stimuli are pre-equalized by passing a reference to
/// it into every synthesis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqFilter {
    taps: Vec<f64>,
    sample_rate: f64,
}

impl EqFilter {
    pub fn new(taps: Vec<f64>, sample_rate: f64) -> Result<Self, SignalError> {
        SignalError::check_sample_rate(sample_rate)?;
        if taps.is_empty() || taps.iter().any(|t| !t.is_finite()) {
            return Err(SignalError::InvalidFilter {
                reason: "EQ filter needs at least one finite tap".to_string(),
            });
        }
        Ok(Self { taps, sample_rate })
    }

    pub fn taps(&self) -> &[f64] {
        &self.taps
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Convolve `x` with the taps, keeping `x`'s length and alignment
    pub fn apply(&self, x: &[f64], sample_rate: f64) -> Result<Vec<f64>, SignalError> {
        if !rates_match(self.sample_rate, sample_rate) {
            return Err(SignalError::InvalidFilter {
                reason: format!(
                    "EQ filter designed for {} Hz applied at {} Hz",
                    self.sample_rate, sample_rate
                ),
            });
        }
        Ok(convolve_same(x, &self.taps))
    }

    /// Magnitude response at `frequency` Hz (direct evaluation of the taps)
    pub fn magnitude_at(&self, frequency: f64) -> f64 {
        let omega = 2.0 * PI * frequency / self.sample_rate;
        self.taps
            .iter()
            .enumerate()
            .map(|(n, &h)| Complex::from_polar(h, -omega * n as f64))
            .sum::<Complex<f64>>()
            .norm()
    }

    /// Symmetric taps, i.e. linear phase, within `tolerance`
    pub fn is_linear_phase(&self, tolerance: f64) -> bool {
        let n = self.taps.len();
        (0..n / 2).all(|i| (self.taps[i] - self.taps[n - 1 - i]).abs() <= tolerance)
    }
}

/// Linear-phase FIR matching a desired magnitude by frequency sampling
///
/// `frequencies` (Hz, ascending, spanning 0..=fs/2) and `gains` describe the
/// target magnitude. The target is resampled onto a dense uniform grid, given
/// a linear phase of `(num_taps - 1) / 2` samples, inverse transformed, then
/// truncated and Hamming-windowed. `num_taps` must be odd so the filter has a
/// free gain at Nyquist.
pub fn frequency_sampling_fir(
    num_taps: usize,
    frequencies: &[f64],
    gains: &[f64],
    sample_rate: f64,
) -> Result<Vec<f64>, SignalError> {
    SignalError::check_sample_rate(sample_rate)?;
    if num_taps < 3 || num_taps % 2 == 0 {
        return Err(SignalError::InvalidFilter {
            reason: format!("FIR tap count must be odd and >= 3 (got {})", num_taps),
        });
    }
    if frequencies.len() != gains.len() || frequencies.len() < 2 {
        return Err(SignalError::InvalidFilter {
            reason: "desired response needs matching frequency and gain points".to_string(),
        });
    }

    let nyquist = sample_rate / 2.0;
    let n_freqs = 1 + num_taps.next_power_of_two();
    let nfft = 2 * (n_freqs - 1);
    let delay = (num_taps - 1) as f64 / 2.0;

    let spectrum: Vec<Complex<f64>> = (0..n_freqs)
        .map(|k| {
            let fraction = k as f64 / (n_freqs - 1) as f64;
            let gain = interp_linear(frequencies, gains, fraction * nyquist);
            Complex::from_polar(gain, -delay * PI * fraction)
        })
        .collect();

    let impulse = irfft_real(&spectrum, nfft);
    let window = hamming_window(num_taps);
    Ok(impulse[..num_taps]
        .iter()
        .zip(window.iter())
        .map(|(h, w)| h * w)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_butterworth_qs_order_two() {
        let qs = butterworth_qs(2);
        assert_eq!(qs.len(), 1);
        assert_abs_diff_eq!(qs[0], std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-12);
    }

    #[test]
    fn test_band_pass_response_shape() {
        let bp = BandPass::butterworth(1000.0, 10_000.0, 8, 48_000.0).unwrap();
        assert_eq!(bp.total_order(), 16);
        assert_eq!(bp.sections().len(), 8);

        // Unity in band, -3 dB at the edges, steep outside
        assert_abs_diff_eq!(bp.magnitude_at(3162.0), 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(bp.magnitude_at(1000.0), std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-2);
        assert_abs_diff_eq!(bp.magnitude_at(10_000.0), std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-2);
        assert!(bp.magnitude_at(250.0) < 1e-4);
        assert!(bp.magnitude_at(20_000.0) < 1e-3);
    }

    #[test]
    fn test_band_pass_rejects_bad_band() {
        assert!(matches!(
            BandPass::butterworth(5000.0, 1000.0, 8, 48_000.0),
            Err(SignalError::InvalidBand { .. })
        ));
        assert!(matches!(
            BandPass::butterworth(1000.0, 30_000.0, 8, 48_000.0),
            Err(SignalError::InvalidBand { .. })
        ));
        assert!(matches!(
            BandPass::butterworth(1000.0, 5000.0, 3, 48_000.0),
            Err(SignalError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_band_pass_attenuates_out_of_band_tone() {
        let fs = 48_000.0;
        let bp = BandPass::butterworth(2000.0, 8000.0, 4, fs).unwrap();
        let tone = |f: f64| -> Vec<f64> {
            (0..9600)
                .map(|n| (2.0 * PI * f * n as f64 / fs).sin())
                .collect()
        };
        let passed = bp.apply(&tone(4000.0));
        let blocked = bp.apply(&tone(200.0));
        let tail_rms = |x: &[f64]| crate::analysis::spectrum::rms(&x[4800..]);
        assert!(tail_rms(&passed) > 0.6);
        assert!(tail_rms(&blocked) < 1e-3);
    }

    #[test]
    fn test_apply_checked_rejects_rate_mismatch() {
        let bp = BandPass::butterworth(1000.0, 5000.0, 4, 48_000.0).unwrap();
        assert!(bp.apply_checked(&[0.0; 8], 44_100.0).is_err());
        assert!(bp.apply_checked(&[0.0; 8], 48_000.0).is_ok());
    }

    #[test]
    fn test_frequency_sampling_flat_response() {
        let taps = frequency_sampling_fir(101, &[0.0, 24_000.0], &[1.0, 1.0], 48_000.0).unwrap();
        let filter = EqFilter::new(taps, 48_000.0).unwrap();
        assert!(filter.is_linear_phase(1e-9));
        assert_abs_diff_eq!(filter.magnitude_at(1000.0), 1.0, epsilon = 1e-2);
        assert_abs_diff_eq!(filter.magnitude_at(12_000.0), 1.0, epsilon = 1e-2);
    }

    #[test]
    fn test_frequency_sampling_follows_target_shape() {
        let freqs = [0.0, 4000.0, 8000.0, 24_000.0];
        let gains = [1.0, 1.0, 0.25, 0.25];
        let taps = frequency_sampling_fir(255, &freqs, &gains, 48_000.0).unwrap();
        let filter = EqFilter::new(taps, 48_000.0).unwrap();
        assert!(filter.is_linear_phase(1e-9));
        assert_abs_diff_eq!(filter.magnitude_at(2000.0), 1.0, epsilon = 0.05);
        assert_abs_diff_eq!(filter.magnitude_at(16_000.0), 0.25, epsilon = 0.05);
    }

    #[test]
    fn test_frequency_sampling_rejects_even_taps() {
        assert!(frequency_sampling_fir(100, &[0.0, 1.0], &[1.0, 1.0], 2.0).is_err());
    }

    #[test]
    fn test_eq_filter_rate_mismatch() {
        let filter = EqFilter::new(vec![1.0], 48_000.0).unwrap();
        assert!(filter.apply(&[1.0, 2.0], 96_000.0).is_err());
        assert_eq!(filter.apply(&[1.0, 2.0], 48_000.0).unwrap().len(), 2);
    }
}
