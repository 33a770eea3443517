// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the frame pipeline
//!
//! Only a missing sensor at startup is fatal to a session. Everything else
//! degrades to "keep the previous value" or "no result for this request".

use std::fmt;

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Main pipeline error type
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// No sensor could be discovered or opened at start
    SensorUnavailable(String),
    /// The source delivered no frame this tick
    FrameDropped,
    /// A bounded lock was not acquired in time
    LockTimeout,
    /// The corner detector did not locate the calibration board
    CalibrationNotFound,
    /// A lookup fell outside its buffer
    IndexOutOfRange { index: usize, len: usize },
    /// A required buffer has not been captured yet
    NoFrame(String),
    /// Error reported by the sensor backend
    Sensor(SensorError),
    /// Configuration errors
    Config(String),
    /// Filesystem errors
    Io(String),
}

/// Sensor backend errors
#[derive(Debug, Clone, PartialEq)]
pub enum SensorError {
    /// No sensor at the requested index
    NotFound,
    /// Sensor failed to start streaming
    InitializationFailed(String),
    /// Operation requires a started sensor
    NotRunning,
    /// Per-pixel coordinate mapping failed
    MappingFailed(String),
    /// Operation not supported by this sensor
    Unsupported(String),
}

/// Error returned by the buffer publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    /// Buffer not readable within the timeout, or nothing published yet
    Unavailable,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::SensorUnavailable(msg) => write!(f, "Sensor unavailable: {}", msg),
            PipelineError::FrameDropped => write!(f, "Frame dropped"),
            PipelineError::LockTimeout => write!(f, "Timed out waiting for buffer lock"),
            PipelineError::CalibrationNotFound => write!(f, "No chessboard found"),
            PipelineError::IndexOutOfRange { index, len } => {
                write!(f, "Index {} out of range (len {})", index, len)
            }
            PipelineError::NoFrame(what) => write!(f, "Couldn't read {} frame", what),
            PipelineError::Sensor(e) => write!(f, "Sensor error: {}", e),
            PipelineError::Config(msg) => write!(f, "Configuration error: {}", msg),
            PipelineError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::NotFound => write!(f, "No sensor found"),
            SensorError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            SensorError::NotRunning => write!(f, "Sensor not running"),
            SensorError::MappingFailed(msg) => write!(f, "Coordinate mapping failed: {}", msg),
            SensorError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
        }
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Unavailable => write!(f, "Buffer unavailable"),
        }
    }
}

impl std::error::Error for PipelineError {}
impl std::error::Error for SensorError {}
impl std::error::Error for PublishError {}

impl From<SensorError> for PipelineError {
    fn from(err: SensorError) -> Self {
        match err {
            SensorError::NotFound => PipelineError::SensorUnavailable(err.to_string()),
            other => PipelineError::Sensor(other),
        }
    }
}

impl From<PublishError> for PipelineError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Unavailable => PipelineError::LockTimeout,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sensor_maps_to_unavailable() {
        let err: PipelineError = SensorError::NotFound.into();
        assert!(matches!(err, PipelineError::SensorUnavailable(_)));

        let err: PipelineError = SensorError::NotRunning.into();
        assert_eq!(err, PipelineError::Sensor(SensorError::NotRunning));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            PipelineError::CalibrationNotFound.to_string(),
            "No chessboard found"
        );
        assert_eq!(
            PipelineError::IndexOutOfRange { index: 9, len: 4 }.to_string(),
            "Index 9 out of range (len 4)"
        );
        assert_eq!(PublishError::Unavailable.to_string(), "Buffer unavailable");
    }
}
