//! Error types and handling
//!
//! The closed capture failure taxonomy, state machine misuse errors and
//! configuration errors used across the crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Media type of a missing capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Which side of the session graph failed to attach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachDirection {
    Input,
    Output,
}

impl fmt::Display for AttachDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachDirection::Input => write!(f, "input"),
            AttachDirection::Output => write!(f, "output"),
        }
    }
}

/// Capture failure taxonomy
///
/// This set is closed: recoverability, suggestion text and the recovery
/// procedure are all looked up by exhaustive match in `recovery::policy`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CaptureError {
    #[error("{media} capture device unavailable")]
    DeviceUnavailable { media: MediaKind },

    #[error("failed to attach session {direction}")]
    AttachFailed { direction: AttachDirection },

    #[error("capture session setup failed")]
    SetupFailed,

    #[error("failed to change capture device")]
    DeviceChangeFailed,

    #[error("failed to configure paired capture")]
    PairingConfigurationFailed,

    #[error("{feature} is not supported on this device")]
    FeatureNotSupported { feature: String },

    #[error("insufficient system resources")]
    InsufficientResources,

    #[error("device is thermally throttled")]
    ThermalThrottling,

    #[error("failed to connect external device")]
    ExternalConnectionFailed,

    #[error("unknown capture error: {cause}")]
    Unknown { cause: String },
}

impl CaptureError {
    /// Stable machine-readable code for this failure kind
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::DeviceUnavailable { .. } => "DEVICE_UNAVAILABLE",
            CaptureError::AttachFailed { .. } => "ATTACH_FAILED",
            CaptureError::SetupFailed => "SETUP_FAILED",
            CaptureError::DeviceChangeFailed => "DEVICE_CHANGE_FAILED",
            CaptureError::PairingConfigurationFailed => "PAIRING_CONFIGURATION_FAILED",
            CaptureError::FeatureNotSupported { .. } => "FEATURE_NOT_SUPPORTED",
            CaptureError::InsufficientResources => "INSUFFICIENT_RESOURCES",
            CaptureError::ThermalThrottling => "THERMAL_THROTTLING",
            CaptureError::ExternalConnectionFailed => "EXTERNAL_CONNECTION_FAILED",
            CaptureError::Unknown { .. } => "UNKNOWN",
        }
    }

    /// Whether two errors are of the same kind, ignoring payloads
    pub fn same_kind(&self, other: &CaptureError) -> bool {
        self.code() == other.code()
    }

    pub fn is_recoverable(&self) -> bool {
        crate::recovery::policy::is_recoverable(self)
    }

    pub fn recovery_action(&self) -> Option<crate::recovery::policy::RecoveryAction> {
        crate::recovery::policy::recovery_action(self)
    }

    pub fn suggestions(&self) -> Vec<String> {
        crate::recovery::policy::suggestions(self)
    }
}

/// Session state machine misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("a session transition is already in flight")]
    TransitionInFlight,

    #[error("transition was superseded before it completed")]
    StaleTransition,

    #[error("session is not in an error state")]
    NotInError,

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Result type alias using SessionError
pub type SessionResult<T> = Result<T, SessionError>;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
