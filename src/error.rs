use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Video error: {0}")]
    VideoError(String),

    #[error("Camera error [{camera}]: {reason}")]
    CameraError { camera: String, reason: String },

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Calibration cancelled: {0}")]
    CalibrationCancelled(String),

    #[error("Calibration timed out after {0:?}")]
    CalibrationTimeout(std::time::Duration),

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
