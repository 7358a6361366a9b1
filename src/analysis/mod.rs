// Analysis module - measurement-side DSP
//
// Spectral helpers (FFT, windows, Welch PSD), the dB SPL meter, the
// least-squares line fit behind the noise curve and the scattered-data
// interpolator behind the tone grid inversion.

pub mod fit;
pub mod interpolate;
pub mod level;
pub mod spectrum;

pub use fit::{fit_line, LineFit};
pub use interpolate::LinearScatterInterpolator;
pub use level::{LevelDomain, LevelMeter, REFERENCE_PRESSURE_PA};
pub use spectrum::{welch_psd, PowerSpectralDensity};
