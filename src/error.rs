//! Error types for live and upload sessions.
//!
//! Every failure that reaches the presentation layer is expressed as an
//! [`ErrorKind`]. Raw failures reported by external collaborators (the camera
//! API, the model runtime, the image decoder) arrive as [`RawFailure`] values
//! and are mapped onto the taxonomy by [`classify`].
//!
//! The `Display` strings of `ErrorKind` are the messages shown to the user.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Why an uploaded image was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationReason {
    /// Declared media type is not `image/*`
    NotAnImage,
    /// File is larger than the upload ceiling
    TooLarge,
    /// Bytes could not be decoded as an image
    DecodeFailed,
}

impl ValidationReason {
    /// Stable identifier of the reason, e.g. `"too-large"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationReason::NotAnImage => "not-an-image",
            ValidationReason::TooLarge => "too-large",
            ValidationReason::DecodeFailed => "decode-failed",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents every failure a session can surface.
///
/// Acquisition and validation failures end the current session attempt.
/// Inference failures stop the live frame loop. None of them are retried
/// automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The user or platform refused camera access.
    #[error("Camera access denied. Please allow camera permissions and refresh the page.")]
    PermissionDenied,

    /// No camera matched the requested constraints.
    #[error("No camera found on your device.")]
    DeviceNotFound,

    /// The camera exists but another application holds it.
    #[error("Camera is already in use by another application.")]
    DeviceBusy,

    /// The platform has no camera capability at all.
    #[error("Camera access is not supported in your browser")]
    Unsupported,

    /// The detection or classification model could not be loaded.
    #[error("Failed to load the AI model. Please try again.")]
    ModelLoadFailed,

    /// A detect or classify call failed.
    #[error("Failed to run the AI model. Please try again.")]
    InferenceFailed,

    /// An uploaded file was rejected before inference.
    #[error("{}", validation_message(.0))]
    ValidationFailed(ValidationReason),

    /// Anything unrecognized. Carries the original message verbatim.
    #[error("{}", unknown_message(.0))]
    Unknown(String),
}

fn validation_message(reason: &ValidationReason) -> &'static str {
    match reason {
        ValidationReason::NotAnImage => "Please upload a valid image file",
        ValidationReason::TooLarge => "Image size should be less than 10MB",
        ValidationReason::DecodeFailed => "Failed to load image. Please try again.",
    }
}

fn unknown_message(message: &str) -> &str {
    if message.is_empty() {
        "Failed to start camera. Please try again."
    } else {
        message
    }
}

impl ErrorKind {
    /// Whether the failure came from acquiring the camera.
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            ErrorKind::PermissionDenied
                | ErrorKind::DeviceNotFound
                | ErrorKind::DeviceBusy
                | ErrorKind::Unsupported
        )
    }
}

/// A failure signal as reported by an external collaborator.
///
/// `name` identifies the failure (for camera APIs this is the exception name,
/// e.g. `NotAllowedError`); `message` is free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFailure {
    pub name: String,
    pub message: String,
}

impl RawFailure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// A failure while loading a model.
    pub fn model_load(message: impl Into<String>) -> Self {
        Self::new("ModelLoadError", message)
    }

    /// A failure while running a model.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::new("InferenceError", message)
    }
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RawFailure {}

impl From<&RawFailure> for ErrorKind {
    fn from(raw: &RawFailure) -> Self {
        match raw.name.as_str() {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                ErrorKind::PermissionDenied
            }
            "NotFoundError" | "DevicesNotFoundError" | "OverconstrainedError" => {
                ErrorKind::DeviceNotFound
            }
            "NotReadableError" | "TrackStartError" => ErrorKind::DeviceBusy,
            "NotSupportedError" => ErrorKind::Unsupported,
            "ModelLoadError" => ErrorKind::ModelLoadFailed,
            "InferenceError" => ErrorKind::InferenceFailed,
            "EncodingError" => ErrorKind::ValidationFailed(ValidationReason::DecodeFailed),
            _ => ErrorKind::Unknown(raw.message.clone()),
        }
    }
}

/// Maps a raw failure onto the error taxonomy. Deterministic; unrecognized
/// names become [`ErrorKind::Unknown`] with the original message.
pub fn classify(raw: &RawFailure) -> ErrorKind {
    ErrorKind::from(raw)
}

/// The error currently shown to the user. Replaces any prior error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind) -> Self {
        let message = kind.to_string();
        Self { kind, message }
    }

    /// An error shown with wording specific to where it happened.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<ErrorKind> for ErrorInfo {
    fn from(kind: ErrorKind) -> Self {
        ErrorInfo::new(kind)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors raised while loading a [`SessionConfig`](crate::SessionConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] io::Error),

    /// The configuration is not valid JSON or does not match the schema.
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// A value parsed but is out of range.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_failures_map_by_name() {
        let cases = [
            ("NotAllowedError", ErrorKind::PermissionDenied),
            ("NotFoundError", ErrorKind::DeviceNotFound),
            ("NotReadableError", ErrorKind::DeviceBusy),
            ("NotSupportedError", ErrorKind::Unsupported),
            ("SecurityError", ErrorKind::PermissionDenied),
            ("TrackStartError", ErrorKind::DeviceBusy),
        ];
        for (name, expected) in cases {
            assert_eq!(classify(&RawFailure::new(name, "boom")), expected, "{name}");
        }
    }

    #[test]
    fn test_unknown_failure_keeps_message() {
        let raw = RawFailure::new("AbortError", "Starting videoinput failed");
        assert_eq!(
            classify(&raw),
            ErrorKind::Unknown("Starting videoinput failed".to_string())
        );
        assert_eq!(classify(&raw).to_string(), "Starting videoinput failed");
    }

    #[test]
    fn test_unknown_without_message_has_fallback_text() {
        let kind = classify(&RawFailure::new("Weird", ""));
        assert_eq!(kind, ErrorKind::Unknown(String::new()));
        assert_eq!(kind.to_string(), "Failed to start camera. Please try again.");
    }

    #[test]
    fn test_model_failures() {
        assert_eq!(
            classify(&RawFailure::model_load("404")),
            ErrorKind::ModelLoadFailed
        );
        assert_eq!(
            classify(&RawFailure::inference("tensor shape")),
            ErrorKind::InferenceFailed
        );
    }

    #[test]
    fn test_validation_reasons() {
        assert_eq!(ValidationReason::NotAnImage.as_str(), "not-an-image");
        assert_eq!(ValidationReason::TooLarge.to_string(), "too-large");
        assert_eq!(
            ErrorKind::ValidationFailed(ValidationReason::TooLarge).to_string(),
            "Image size should be less than 10MB"
        );
    }

    #[test]
    fn test_error_info_message_follows_kind() {
        let info = ErrorInfo::new(ErrorKind::DeviceNotFound);
        assert_eq!(info.message, "No camera found on your device.");
        assert!(info.kind.is_acquisition());
        assert!(!ErrorKind::InferenceFailed.is_acquisition());
    }

    #[test]
    fn test_error_info_with_context_message() {
        let info = ErrorInfo::with_message(ErrorKind::InferenceFailed, "Try again");
        assert_eq!(info.kind, ErrorKind::InferenceFailed);
        assert_eq!(info.to_string(), "Try again");
    }
}
