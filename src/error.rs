use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TurbocamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl TurbocamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures of the capture hardware
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera permission not granted")]
    PermissionDenied,

    #[error("Camera hardware unavailable: {details}")]
    HardwareUnavailable { details: String },

    #[error("Camera disconnected: {details}")]
    Disconnected { details: String },
}

impl CameraError {
    pub fn unavailable<S: Into<String>>(details: S) -> Self {
        Self::HardwareUnavailable {
            details: details.into(),
        }
    }

    /// Kind reported to the host for this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            CameraError::PermissionDenied => ErrorKind::PermissionDenied,
            CameraError::HardwareUnavailable { .. } | CameraError::Disconnected { .. } => {
                ErrorKind::HardwareUnavailable
            }
        }
    }
}

/// Failures local to the analysis of one frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("Detection failed: {details}")]
    Failure { details: String },

    #[error("Unsupported pixel data: {details}")]
    UnsupportedFrame { details: String },

    #[error("Detector panicked: {details}")]
    Panicked { details: String },

    #[error("Frame unavailable: {0}")]
    Frame(#[from] FrameError),
}

impl DetectorError {
    pub fn failure<S: Into<String>>(details: S) -> Self {
        Self::Failure {
            details: details.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame {id} was invalidated by session teardown")]
    Invalidated { id: u64 },

    #[error("Frame {id} has {actual} bytes, expected at least {expected}")]
    Truncated {
        id: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Frame {id} could not be decoded: {details}")]
    Decode { id: u64, details: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session controller is no longer running")]
    ControllerClosed,

    #[error("Timed out waiting for session state {expected}")]
    StateTimeout { expected: String },
}

/// Error taxonomy surfaced to the host as `onError(kind, detail)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    PermissionDenied,
    HardwareUnavailable,
    DetectorFailure,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::HardwareUnavailable => "CAMERA_ERROR",
            ErrorKind::DetectorFailure => "DETECTOR_FAILURE",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

pub type Result<T> = std::result::Result<T, TurbocamError>;
