// Spectrum module - FFT helpers shared by level metering and EQ design
//
// Wraps rustfft for the handful of transforms the calibration chain needs:
// full power spectra, Welch-averaged power spectral density, inverse real
// transforms for FIR design, and FFT convolution for long filters.

use rustfft::{num_complex::Complex, FftPlanner};

/// Periodic Hann window, the usual choice for spectral averaging
pub fn hann_window(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos())
        .collect()
}

/// Symmetric Hamming window, used to taper frequency-sampled FIR taps
pub fn hamming_window(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let nm1 = (n - 1) as f64;
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / nm1).cos())
        .collect()
}

/// Forward FFT of a real signal, zero-padded (or truncated) to `nfft`
pub fn fft_real(x: &[f64], nfft: usize) -> Vec<Complex<f64>> {
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(nfft);
    let mut buffer = vec![Complex::new(0.0, 0.0); nfft];
    for (dst, &src) in buffer.iter_mut().zip(x.iter()) {
        *dst = Complex::new(src, 0.0);
    }
    fft.process(&mut buffer);
    buffer
}

/// Inverse transform of a one-sided spectrum (`nfft / 2 + 1` bins)
///
/// The negative-frequency half is rebuilt by conjugate symmetry so the
/// output is real. Output length is `nfft`.
pub fn irfft_real(spectrum: &[Complex<f64>], nfft: usize) -> Vec<f64> {
    let mut planner = FftPlanner::<f64>::new();
    let ifft = planner.plan_fft_inverse(nfft);
    let mut buffer = vec![Complex::new(0.0, 0.0); nfft];

    let n_freq = nfft / 2 + 1;
    let copied = n_freq.min(spectrum.len());
    buffer[..copied].copy_from_slice(&spectrum[..copied]);

    if nfft > 1 {
        let max_k = if nfft % 2 == 0 { nfft / 2 - 1 } else { nfft / 2 };
        for k in 1..=max_k {
            buffer[nfft - k] = buffer[k].conj();
        }
    }

    ifft.process(&mut buffer);
    let scale = 1.0 / nfft as f64;
    buffer.into_iter().map(|c| c.re * scale).collect()
}

/// Squared magnitude of every FFT bin (two-sided, length = signal length)
pub fn power_spectrum(x: &[f64]) -> Vec<f64> {
    if x.is_empty() {
        return Vec::new();
    }
    fft_real(x, x.len()).iter().map(|c| c.norm_sqr()).collect()
}

/// One-sided power spectral density estimate
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSpectralDensity {
    /// Bin centre frequencies in Hz
    pub frequencies: Vec<f64>,
    /// Power per Hz at each bin
    pub power: Vec<f64>,
}

impl PowerSpectralDensity {
    /// Linearly interpolated PSD at `frequency`, clamped to the edge bins
    pub fn at(&self, frequency: f64) -> f64 {
        interp_linear(&self.frequencies, &self.power, frequency)
    }
}

fn onesided_frequencies(nfft: usize, sample_rate: f64) -> Vec<f64> {
    (0..nfft / 2 + 1)
        .map(|k| k as f64 * sample_rate / nfft as f64)
        .collect()
}

fn segment_starts(len: usize, nperseg: usize, noverlap: usize) -> Vec<usize> {
    if len <= nperseg {
        return vec![0];
    }
    let hop = nperseg - noverlap;
    let mut starts = Vec::new();
    let mut start = 0usize;
    while start + nperseg <= len {
        starts.push(start);
        start += hop;
    }
    starts
}

/// Welch PSD: Hann-windowed segments of `nperseg` samples with 50% overlap,
/// periodograms averaged across segments
///
/// Returns `None` for an empty signal or a zero segment length.
pub fn welch_psd(x: &[f64], sample_rate: f64, nperseg: usize) -> Option<PowerSpectralDensity> {
    if x.is_empty() || nperseg == 0 {
        return None;
    }
    let nperseg = nperseg.min(x.len());
    let starts = segment_starts(x.len(), nperseg, nperseg / 2);
    let window = hann_window(nperseg);
    let window_power: f64 = window.iter().map(|w| w * w).sum();
    let n_freq = nperseg / 2 + 1;
    let mut accum = vec![0.0; n_freq];

    for &start in &starts {
        let segment: Vec<f64> = x[start..start + nperseg]
            .iter()
            .zip(window.iter())
            .map(|(s, w)| s * w)
            .collect();
        let spectrum = fft_real(&segment, nperseg);
        for (k, acc) in accum.iter_mut().enumerate() {
            let mut v = spectrum[k].norm_sqr() / (sample_rate * window_power);
            // Fold negative frequencies, except DC and Nyquist
            if k != 0 && !(nperseg % 2 == 0 && k == nperseg / 2) {
                v *= 2.0;
            }
            *acc += v;
        }
    }

    let inv = 1.0 / starts.len() as f64;
    for v in &mut accum {
        *v *= inv;
    }

    Some(PowerSpectralDensity {
        frequencies: onesided_frequencies(nperseg, sample_rate),
        power: accum,
    })
}

/// Linear convolution via FFT, trimmed to the centre `x.len()` samples
///
/// Matches the "same" convolution mode: a symmetric kernel introduces no
/// time shift.
pub fn convolve_same(x: &[f64], kernel: &[f64]) -> Vec<f64> {
    if x.is_empty() || kernel.is_empty() {
        return x.to_vec();
    }
    let full_len = x.len() + kernel.len() - 1;
    let nfft = full_len.next_power_of_two();

    let a = fft_real(x, nfft);
    let b = fft_real(kernel, nfft);
    let mut product: Vec<Complex<f64>> = a.iter().zip(b.iter()).map(|(p, q)| p * q).collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_inverse(nfft).process(&mut product);

    let scale = 1.0 / nfft as f64;
    let offset = (kernel.len() - 1) / 2;
    product[offset..offset + x.len()]
        .iter()
        .map(|c| c.re * scale)
        .collect()
}

/// Piecewise-linear interpolation of `ys` over ascending `xs`; values
/// outside the range take the nearest end point
pub fn interp_linear(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    if x <= xs[0] {
        return ys[0];
    }
    let last = xs.len() - 1;
    if x >= xs[last] {
        return ys[last];
    }
    let upper = xs.partition_point(|&v| v < x);
    let lower = upper - 1;
    let span = xs[upper] - xs[lower];
    if span <= 0.0 {
        return ys[upper];
    }
    let t = (x - xs[lower]) / span;
    ys[lower] + t * (ys[upper] - ys[lower])
}

/// Root mean square; zero for an empty slice
pub fn rms(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_parseval_power_spectrum() {
        let x: Vec<f64> = (0..256).map(|n| (n as f64 * 0.37).sin()).collect();
        let time_energy: f64 = x.iter().map(|v| v * v).sum();
        let freq_energy: f64 = power_spectrum(&x).iter().sum::<f64>() / x.len() as f64;
        assert_abs_diff_eq!(time_energy, freq_energy, epsilon = 1e-9);
    }

    #[test]
    fn test_welch_finds_tone_bin() {
        let fs = 8000.0;
        let x: Vec<f64> = (0..8000)
            .map(|n| (2.0 * std::f64::consts::PI * 1000.0 * n as f64 / fs).sin())
            .collect();
        let psd = welch_psd(&x, fs, 256).unwrap();
        let (peak, _) = psd
            .power
            .iter()
            .enumerate()
            .fold((0, 0.0), |acc, (i, &p)| if p > acc.1 { (i, p) } else { acc });
        assert_abs_diff_eq!(psd.frequencies[peak], 1000.0, epsilon = fs / 256.0);
    }

    #[test]
    fn test_welch_white_noise_level() {
        // Unit-variance white noise: one-sided PSD is 2 / fs
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(7);
        let fs = 1000.0;
        let x: Vec<f64> = (0..200_000)
            .map(|_| rng.gen_range(-1.0..1.0) * 3.0_f64.sqrt())
            .collect();
        let psd = welch_psd(&x, fs, 128).unwrap();
        let mid: f64 = psd.power[10..50].iter().sum::<f64>() / 40.0;
        assert_abs_diff_eq!(mid, 2.0 / fs, epsilon = 0.1 * 2.0 / fs);
    }

    #[test]
    fn test_convolve_same_with_identity_kernel() {
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let y = convolve_same(&x, &[0.0, 1.0, 0.0]);
        for (a, b) in x.iter().zip(y.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_convolve_same_moving_average() {
        let x = vec![0.0, 0.0, 3.0, 0.0, 0.0];
        let y = convolve_same(&x, &[1.0 / 3.0; 3]);
        let expected = [0.0, 1.0, 1.0, 1.0, 0.0];
        for (a, b) in expected.iter().zip(y.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_irfft_inverts_fft() {
        let x: Vec<f64> = (0..64).map(|n| ((n * 7) % 11) as f64 - 5.0).collect();
        let spectrum = fft_real(&x, 64);
        let back = irfft_real(&spectrum[..33], 64);
        for (a, b) in x.iter().zip(back.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_interp_linear_clamps_edges() {
        let xs = [0.0, 1.0, 2.0];
        let ys = [0.0, 10.0, 30.0];
        assert_eq!(interp_linear(&xs, &ys, -1.0), 0.0);
        assert_eq!(interp_linear(&xs, &ys, 5.0), 30.0);
        assert_abs_diff_eq!(interp_linear(&xs, &ys, 1.5), 20.0, epsilon = 1e-12);
    }

    #[test]
    fn test_windows_shape() {
        let w = hamming_window(5);
        assert_abs_diff_eq!(w[0], 0.08, epsilon = 1e-12);
        assert_abs_diff_eq!(w[2], 1.0, epsilon = 1e-12);
        let h = hann_window(4);
        assert_abs_diff_eq!(h[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(h[2], 1.0, epsilon = 1e-12);
    }
}
