// Stimulus contract violations
//
// Raised synchronously, before any device I/O, when a caller asks for a
// stimulus or measurement the engine cannot honour.

use crate::error::ErrorCode;
use std::fmt;

/// Signal error code constants
///
/// Error code range: 1001-1008
pub struct SignalErrorCodes {}

impl SignalErrorCodes {
    /// Duration is negative, zero or not finite
    pub const INVALID_DURATION: i32 = 1001;

    /// Sample rate is not a positive finite number
    pub const INVALID_SAMPLE_RATE: i32 = 1002;

    /// Amplitude outside [0, 1]
    pub const AMPLITUDE_OUT_OF_RANGE: i32 = 1003;

    /// Ramp-up and ramp-down would overlap
    pub const RAMP_TOO_LONG: i32 = 1004;

    /// Tone frequency is negative or above Nyquist
    pub const INVALID_FREQUENCY: i32 = 1005;

    /// Band edges are inverted or outside (0, Nyquist)
    pub const INVALID_BAND: i32 = 1006;

    /// Signal has no samples to work with
    pub const EMPTY_SIGNAL: i32 = 1007;

    /// Filter length or order is unusable
    pub const INVALID_FILTER: i32 = 1008;
}

/// Contract violations on stimulus and measurement parameters
#[derive(Debug, Clone, PartialEq)]
pub enum SignalError {
    /// Duration must be finite and > 0
    InvalidDuration { duration: f64 },

    /// Sample rate must be finite and > 0
    InvalidSampleRate { sample_rate: f64 },

    /// Amplitude must lie in [0, 1]
    AmplitudeOutOfRange { amplitude: f64 },

    /// 2 * ramp samples exceeds the total sample count
    RampTooLong {
        ramp_samples: usize,
        total_samples: usize,
    },

    /// Frequency must lie in [0, Nyquist]
    InvalidFrequency { frequency: f64, nyquist: f64 },

    /// Band edges must satisfy 0 < low < high < Nyquist
    InvalidBand { low: f64, high: f64, nyquist: f64 },

    /// An operation needed at least one sample
    EmptySignal { context: String },

    /// Filter order or tap count is unusable
    InvalidFilter { reason: String },
}

impl SignalError {
    /// Reject amplitudes outside [0, 1] (NaN included)
    pub fn check_amplitude(amplitude: f64) -> Result<(), SignalError> {
        if (0.0..=1.0).contains(&amplitude) {
            Ok(())
        } else {
            Err(SignalError::AmplitudeOutOfRange { amplitude })
        }
    }

    /// Reject non-positive or non-finite durations
    pub fn check_duration(duration: f64) -> Result<(), SignalError> {
        if duration.is_finite() && duration > 0.0 {
            Ok(())
        } else {
            Err(SignalError::InvalidDuration { duration })
        }
    }

    /// Reject non-positive or non-finite sample rates
    pub fn check_sample_rate(sample_rate: f64) -> Result<(), SignalError> {
        if sample_rate.is_finite() && sample_rate > 0.0 {
            Ok(())
        } else {
            Err(SignalError::InvalidSampleRate { sample_rate })
        }
    }
}

impl ErrorCode for SignalError {
    fn code(&self) -> i32 {
        match self {
            SignalError::InvalidDuration { .. } => SignalErrorCodes::INVALID_DURATION,
            SignalError::InvalidSampleRate { .. } => SignalErrorCodes::INVALID_SAMPLE_RATE,
            SignalError::AmplitudeOutOfRange { .. } => SignalErrorCodes::AMPLITUDE_OUT_OF_RANGE,
            SignalError::RampTooLong { .. } => SignalErrorCodes::RAMP_TOO_LONG,
            SignalError::InvalidFrequency { .. } => SignalErrorCodes::INVALID_FREQUENCY,
            SignalError::InvalidBand { .. } => SignalErrorCodes::INVALID_BAND,
            SignalError::EmptySignal { .. } => SignalErrorCodes::EMPTY_SIGNAL,
            SignalError::InvalidFilter { .. } => SignalErrorCodes::INVALID_FILTER,
        }
    }

    fn message(&self) -> String {
        match self {
            SignalError::InvalidDuration { duration } => {
                format!("duration must be > 0 s (got {})", duration)
            }
            SignalError::InvalidSampleRate { sample_rate } => {
                format!("sample rate must be > 0 Hz (got {})", sample_rate)
            }
            SignalError::AmplitudeOutOfRange { amplitude } => {
                format!("amplitude must be within [0, 1] (got {})", amplitude)
            }
            SignalError::RampTooLong {
                ramp_samples,
                total_samples,
            } => format!(
                "ramp of {} samples at each end does not fit in {} samples",
                ramp_samples, total_samples
            ),
            SignalError::InvalidFrequency { frequency, nyquist } => format!(
                "frequency must be within [0, {}] Hz (got {})",
                nyquist, frequency
            ),
            SignalError::InvalidBand { low, high, nyquist } => format!(
                "band must satisfy 0 < low < high < {} Hz (got {}..{})",
                nyquist, low, high
            ),
            SignalError::EmptySignal { context } => format!("empty signal: {}", context),
            SignalError::InvalidFilter { reason } => format!("invalid filter: {}", reason),
        }
    }
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SignalError::{} (code {}): {}",
            self.variant_name(),
            self.code(),
            self.message()
        )
    }
}

impl SignalError {
    fn variant_name(&self) -> &'static str {
        match self {
            SignalError::InvalidDuration { .. } => "InvalidDuration",
            SignalError::InvalidSampleRate { .. } => "InvalidSampleRate",
            SignalError::AmplitudeOutOfRange { .. } => "AmplitudeOutOfRange",
            SignalError::RampTooLong { .. } => "RampTooLong",
            SignalError::InvalidFrequency { .. } => "InvalidFrequency",
            SignalError::InvalidBand { .. } => "InvalidBand",
            SignalError::EmptySignal { .. } => "EmptySignal",
            SignalError::InvalidFilter { .. } => "InvalidFilter",
        }
    }
}

impl std::error::Error for SignalError {}
