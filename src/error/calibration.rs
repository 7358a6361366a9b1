// Calibration protocol error types and constants

use crate::calibration::{CompletedStages, SweepPoint};
use crate::error::{DeviceError, ErrorCode, SignalError};
use log::error;
use std::fmt;

/// Calibration error code constants
///
/// Wrapped [`SignalError`] and [`DeviceError`] values keep their own codes.
///
/// Error code range: 3001-3007
pub struct CalibrationErrorCodes {}

impl CalibrationErrorCodes {
    /// Sweep requested with too few steps to fit or grid
    pub const INSUFFICIENT_STEPS: i32 = 3001;

    /// Least-squares fit or curve inversion is undefined
    pub const DEGENERATE_FIT: i32 = 3002;

    /// Device failure stopped a sweep part way through
    pub const SWEEP_ABORTED: i32 = 3003;

    /// Result used before every point was measured
    pub const INCOMPLETE: i32 = 3004;

    /// Stimulus and playback device disagree on sample rate
    pub const SAMPLE_RATE_MISMATCH: i32 = 3005;

    /// Target level needs an amplitude outside [0, 1]
    pub const UNREACHABLE_TARGET: i32 = 3006;

    /// A protocol stage failed after earlier stages had finished
    pub const PROTOCOL_ABORTED: i32 = 3007;
}

/// Log a calibration error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    error!(
        "Calibration error in {}: code={}, component=CalibrationProtocol, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Calibration protocol errors
#[derive(Clone, PartialEq)]
pub enum CalibrationError {
    /// Contract violation on a stimulus or measurement parameter
    Signal(SignalError),

    /// Playback or acquisition device failure
    Device(DeviceError),

    InsufficientSteps { required: usize, requested: usize },

    DegenerateFit { reason: String },

    /// A device failed mid-sweep; `partial` holds every point measured before it
    SweepAborted {
        completed: usize,
        total: usize,
        source: DeviceError,
        partial: Vec<SweepPoint>,
    },

    Incomplete { missing: usize, total: usize },

    SampleRateMismatch { stimulus: f64, device: f64 },

    UnreachableTarget { target_db: f64, amplitude: f64 },

    /// A later stage failed; `completed` keeps what the earlier stages produced
    ProtocolAborted {
        completed: Box<CompletedStages>,
        source: Box<CalibrationError>,
    },
}

impl CalibrationError {
    /// Points gathered before an aborted sweep; empty for other errors
    pub fn partial_results(&self) -> &[SweepPoint] {
        match self {
            CalibrationError::SweepAborted { partial, .. } => partial,
            CalibrationError::ProtocolAborted { source, .. } => source.partial_results(),
            _ => &[],
        }
    }

    /// Stages finished before the failure; None unless the protocol got past its first stage
    pub fn completed_stages(&self) -> Option<&CompletedStages> {
        match self {
            CalibrationError::ProtocolAborted { completed, .. } => Some(completed.as_ref()),
            _ => None,
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            CalibrationError::Signal(_) => "Signal",
            CalibrationError::Device(_) => "Device",
            CalibrationError::InsufficientSteps { .. } => "InsufficientSteps",
            CalibrationError::DegenerateFit { .. } => "DegenerateFit",
            CalibrationError::SweepAborted { .. } => "SweepAborted",
            CalibrationError::Incomplete { .. } => "Incomplete",
            CalibrationError::SampleRateMismatch { .. } => "SampleRateMismatch",
            CalibrationError::UnreachableTarget { .. } => "UnreachableTarget",
            CalibrationError::ProtocolAborted { .. } => "ProtocolAborted",
        }
    }
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::Signal(err) => err.code(),
            CalibrationError::Device(err) => err.code(),
            CalibrationError::InsufficientSteps { .. } => CalibrationErrorCodes::INSUFFICIENT_STEPS,
            CalibrationError::DegenerateFit { .. } => CalibrationErrorCodes::DEGENERATE_FIT,
            CalibrationError::SweepAborted { .. } => CalibrationErrorCodes::SWEEP_ABORTED,
            CalibrationError::Incomplete { .. } => CalibrationErrorCodes::INCOMPLETE,
            CalibrationError::SampleRateMismatch { .. } => {
                CalibrationErrorCodes::SAMPLE_RATE_MISMATCH
            }
            CalibrationError::UnreachableTarget { .. } => CalibrationErrorCodes::UNREACHABLE_TARGET,
            CalibrationError::ProtocolAborted { .. } => CalibrationErrorCodes::PROTOCOL_ABORTED,
        }
    }

    fn message(&self) -> String {
        match self {
            CalibrationError::Signal(err) => err.message(),
            CalibrationError::Device(err) => err.message(),
            CalibrationError::InsufficientSteps {
                required,
                requested,
            } => format!(
                "Insufficient sweep steps: need at least {}, got {}",
                required, requested
            ),
            CalibrationError::DegenerateFit { reason } => format!("Degenerate fit: {}", reason),
            CalibrationError::SweepAborted {
                completed,
                total,
                source,
                ..
            } => format!(
                "Sweep aborted after {} of {} points: {}",
                completed,
                total,
                source.message()
            ),
            CalibrationError::Incomplete { missing, total } => {
                format!("{} of {} points have no measurement", missing, total)
            }
            CalibrationError::SampleRateMismatch { stimulus, device } => format!(
                "Stimulus rendered at {} Hz but playback device runs at {} Hz",
                stimulus, device
            ),
            CalibrationError::UnreachableTarget {
                target_db,
                amplitude,
            } => format!(
                "Target {:.1} dB SPL needs amplitude {:.4}, outside [0, 1]",
                target_db, amplitude
            ),
            CalibrationError::ProtocolAborted { completed, source } => format!(
                "Protocol stopped after {} finished: {}",
                completed.summary(),
                source.message()
            ),
        }
    }
}

// Recordings in `partial` can be seconds of audio; show counts only
impl fmt::Debug for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::Signal(err) => f.debug_tuple("Signal").field(err).finish(),
            CalibrationError::Device(err) => f.debug_tuple("Device").field(err).finish(),
            CalibrationError::InsufficientSteps {
                required,
                requested,
            } => f
                .debug_struct("InsufficientSteps")
                .field("required", required)
                .field("requested", requested)
                .finish(),
            CalibrationError::DegenerateFit { reason } => f
                .debug_struct("DegenerateFit")
                .field("reason", reason)
                .finish(),
            CalibrationError::SweepAborted {
                completed,
                total,
                source,
                partial,
            } => f
                .debug_struct("SweepAborted")
                .field("completed", completed)
                .field("total", total)
                .field("source", source)
                .field("partial", &format_args!("[{} points]", partial.len()))
                .finish(),
            CalibrationError::Incomplete { missing, total } => f
                .debug_struct("Incomplete")
                .field("missing", missing)
                .field("total", total)
                .finish(),
            CalibrationError::SampleRateMismatch { stimulus, device } => f
                .debug_struct("SampleRateMismatch")
                .field("stimulus", stimulus)
                .field("device", device)
                .finish(),
            CalibrationError::UnreachableTarget {
                target_db,
                amplitude,
            } => f
                .debug_struct("UnreachableTarget")
                .field("target_db", target_db)
                .field("amplitude", amplitude)
                .finish(),
            CalibrationError::ProtocolAborted { completed, source } => f
                .debug_struct("ProtocolAborted")
                .field("completed", &format_args!("[{}]", completed.summary()))
                .field("source", source)
                .finish(),
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CalibrationError::{} (code {}): {}",
            self.variant_name(),
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CalibrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CalibrationError::Signal(err) => Some(err),
            CalibrationError::Device(err) => Some(err),
            CalibrationError::SweepAborted { source, .. } => Some(source),
            CalibrationError::ProtocolAborted { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<SignalError> for CalibrationError {
    fn from(err: SignalError) -> Self {
        CalibrationError::Signal(err)
    }
}

impl From<DeviceError> for CalibrationError {
    fn from(err: DeviceError) -> Self {
        CalibrationError::Device(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_error_codes() {
        assert_eq!(
            CalibrationError::InsufficientSteps {
                required: 2,
                requested: 1
            }
            .code(),
            CalibrationErrorCodes::INSUFFICIENT_STEPS
        );
        assert_eq!(
            CalibrationError::Incomplete {
                missing: 1,
                total: 9
            }
            .code(),
            3004
        );
        assert_eq!(
            CalibrationError::UnreachableTarget {
                target_db: 120.0,
                amplitude: 3.0
            }
            .code(),
            3006
        );
    }

    #[test]
    fn test_wrapped_errors_keep_their_codes() {
        let err: CalibrationError = SignalError::AmplitudeOutOfRange { amplitude: 2.0 }.into();
        assert_eq!(err.code(), 1003);
        let err: CalibrationError = DeviceError::StimulusNotLoaded { index: 0 }.into();
        assert_eq!(err.code(), 2005);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_sweep_aborted_reports_progress() {
        let err = CalibrationError::SweepAborted {
            completed: 3,
            total: 10,
            source: DeviceError::Timeout {
                stage: "capture".to_string(),
                waited_ms: 2500,
            },
            partial: Vec::new(),
        };
        assert_eq!(err.code(), CalibrationErrorCodes::SWEEP_ABORTED);
        assert!(err.message().starts_with("Sweep aborted after 3 of 10 points"));
        assert!(format!("{:?}", err).contains("[0 points]"));
        assert!(err.partial_results().is_empty());
    }

    #[test]
    fn test_protocol_aborted_delegates_to_failed_stage() {
        let sweep = CalibrationError::SweepAborted {
            completed: 0,
            total: 2,
            source: DeviceError::ConnectionFailed {
                details: "unplugged".to_string(),
            },
            partial: Vec::new(),
        };
        let err = CalibrationError::ProtocolAborted {
            completed: Box::new(CompletedStages::Noise {
                eq: None,
                probe: None,
                fit: None,
            }),
            source: Box::new(sweep),
        };
        assert_eq!(err.code(), CalibrationErrorCodes::PROTOCOL_ABORTED);
        assert!(err.partial_results().is_empty());
        assert!(err.completed_stages().is_some());
        assert!(err.message().contains("Sweep aborted after 0 of 2 points"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_calibration_error_display() {
        let err = CalibrationError::DegenerateFit {
            reason: "slope is zero".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "CalibrationError::DegenerateFit (code 3002): Degenerate fit: slope is zero"
        );
    }
}
