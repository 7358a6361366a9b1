// Measurement apparatus error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Device error code constants
///
/// Error code range: 2001-2007
pub struct DeviceErrorCodes {}

impl DeviceErrorCodes {
    /// Device could not be reached or opened
    pub const CONNECTION_FAILED: i32 = 2001;

    /// Requested acquisition/playback channel does not exist
    pub const INVALID_CHANNEL: i32 = 2002;

    /// Device answered but is not the expected one
    pub const WRONG_DEVICE: i32 = 2003;

    /// Device did not complete within its time budget
    pub const TIMEOUT: i32 = 2004;

    /// Playback requested for a stimulus slot that was never loaded
    pub const STIMULUS_NOT_LOADED: i32 = 2005;

    /// Stream failed while running or stimulus payload was malformed
    pub const STREAM_FAILURE: i32 = 2006;

    /// A play/record worker thread panicked
    pub const WORKER_PANICKED: i32 = 2007;
}

/// Log a device error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_device_error(err: &DeviceError, context: &str) {
    error!(
        "Device error in {}: code={}, component=Transducer, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Failures of the playback or acquisition device
///
/// These are fatal for the current run. Nothing in the engine retries them.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceError {
    ConnectionFailed { details: String },

    InvalidChannel { channel: u16, available: u16 },

    WrongDevice { expected: String, found: String },

    Timeout { stage: String, waited_ms: u64 },

    StimulusNotLoaded { index: usize },

    StreamFailure { reason: String },

    WorkerPanicked { worker: String },
}

impl ErrorCode for DeviceError {
    fn code(&self) -> i32 {
        match self {
            DeviceError::ConnectionFailed { .. } => DeviceErrorCodes::CONNECTION_FAILED,
            DeviceError::InvalidChannel { .. } => DeviceErrorCodes::INVALID_CHANNEL,
            DeviceError::WrongDevice { .. } => DeviceErrorCodes::WRONG_DEVICE,
            DeviceError::Timeout { .. } => DeviceErrorCodes::TIMEOUT,
            DeviceError::StimulusNotLoaded { .. } => DeviceErrorCodes::STIMULUS_NOT_LOADED,
            DeviceError::StreamFailure { .. } => DeviceErrorCodes::STREAM_FAILURE,
            DeviceError::WorkerPanicked { .. } => DeviceErrorCodes::WORKER_PANICKED,
        }
    }

    fn message(&self) -> String {
        match self {
            DeviceError::ConnectionFailed { details } => {
                format!("Device connection failed: {}", details)
            }
            DeviceError::InvalidChannel { channel, available } => format!(
                "Channel {} does not exist (device has {} channels)",
                channel, available
            ),
            DeviceError::WrongDevice { expected, found } => {
                format!("Expected device '{}', found '{}'", expected, found)
            }
            DeviceError::Timeout { stage, waited_ms } => {
                format!("Timed out during {} after {} ms", stage, waited_ms)
            }
            DeviceError::StimulusNotLoaded { index } => {
                format!("No stimulus loaded in slot {}", index)
            }
            DeviceError::StreamFailure { reason } => format!("Stream failure: {}", reason),
            DeviceError::WorkerPanicked { worker } => {
                format!("The {} worker panicked", worker)
            }
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeviceError::{} (code {}): {}",
            self.variant_name(),
            self.code(),
            self.message()
        )
    }
}

impl DeviceError {
    fn variant_name(&self) -> &'static str {
        match self {
            DeviceError::ConnectionFailed { .. } => "ConnectionFailed",
            DeviceError::InvalidChannel { .. } => "InvalidChannel",
            DeviceError::WrongDevice { .. } => "WrongDevice",
            DeviceError::Timeout { .. } => "Timeout",
            DeviceError::StimulusNotLoaded { .. } => "StimulusNotLoaded",
            DeviceError::StreamFailure { .. } => "StreamFailure",
            DeviceError::WorkerPanicked { .. } => "WorkerPanicked",
        }
    }
}

impl std::error::Error for DeviceError {}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::ConnectionFailed {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_codes() {
        assert_eq!(
            DeviceError::ConnectionFailed {
                details: "refused".to_string()
            }
            .code(),
            2001
        );
        assert_eq!(
            DeviceError::InvalidChannel {
                channel: 4,
                available: 2
            }
            .code(),
            DeviceErrorCodes::INVALID_CHANNEL
        );
        assert_eq!(
            DeviceError::Timeout {
                stage: "record".to_string(),
                waited_ms: 10
            }
            .code(),
            2004
        );
        assert_eq!(
            DeviceError::WorkerPanicked {
                worker: "playback".to_string()
            }
            .code(),
            2007
        );
    }

    #[test]
    fn test_device_error_messages() {
        let err = DeviceError::InvalidChannel {
            channel: 4,
            available: 2,
        };
        assert_eq!(
            err.message(),
            "Channel 4 does not exist (device has 2 channels)"
        );

        let err = DeviceError::StimulusNotLoaded { index: 3 };
        assert!(err.message().contains("slot 3"));
    }

    #[test]
    fn test_device_error_display() {
        let err = DeviceError::StimulusNotLoaded { index: 1 };
        assert_eq!(
            err.to_string(),
            "DeviceError::StimulusNotLoaded (code 2005): No stimulus loaded in slot 1"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: DeviceError = io_err.into();
        match err {
            DeviceError::ConnectionFailed { details } => assert!(details.contains("refused")),
            other => panic!("Expected ConnectionFailed, got {:?}", other),
        }
    }
}
