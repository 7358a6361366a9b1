// Speaker Calibration Core - dual-channel loudspeaker SPL calibration
// Stimulus synthesis, synchronized play/record and amplitude-to-dB SPL mapping

// Module declarations
pub mod analysis;
pub mod calibration;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod export;
pub mod sound;
pub mod synthesis;

// Re-exports for convenience
pub use calibration::{
    CalibrationCurve, CalibrationCurveFitter, CalibrationGrid, CalibrationSession,
    CalibrationTester, EqFilterEstimator, ProgressEvent, ProgressSink, PureToneCalibrationGrid,
};
pub use config::AppConfig;
pub use device::{Playable, Recordable};
pub use engine::{SynchronizedTransducer, TransducerSettings};
pub use error::{CalibrationError, DeviceError, ErrorCode, SignalError};
pub use sound::{RecordedSound, Sound};
pub use synthesis::{BandPass, EqFilter, SignalSynthesizer};
