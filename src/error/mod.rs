// Error types for the speaker calibration engine
//
// This module defines one error family per failure class: contract violations
// on stimulus parameters, measurement-apparatus failures, and calibration
// protocol failures. Every family exposes stable numeric codes so callers
// (CLI, UI layers, report writers) can branch without string matching.

mod calibration;
mod device;
mod signal;

pub use calibration::{log_calibration_error, CalibrationError, CalibrationErrorCodes};
pub use device::{log_device_error, DeviceError, DeviceErrorCodes};
pub use signal::{SignalError, SignalErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the library and its front ends.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
