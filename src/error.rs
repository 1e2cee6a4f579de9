use thiserror::Error;

/// Reasons a camera could not be acquired when starting a session.
///
/// Each variant carries its own operator-facing message so the cause can be
/// told apart without inspecting strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied; allow camera access and try again")]
    PermissionDenied,
    #[error("no camera found at the configured source")]
    DeviceNotFound,
    #[error("failed to access camera: {0}")]
    Unavailable(String),
}

/// Session lifecycle violations raised by `SessionRecorder`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("a detection session is already active")]
    AlreadyActive,
    #[error("no active session")]
    NoActiveSession,
}

/// A single failed round-trip to the detector.
///
/// None of these are fatal to the polling loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DetectorFailure {
    #[error("detector request timed out")]
    Timeout,
    #[error("detector transport error: {0}")]
    Transport(String),
    #[error("detector returned status {0}")]
    Status(u16),
    #[error("malformed detector response: {0}")]
    Malformed(String),
}
