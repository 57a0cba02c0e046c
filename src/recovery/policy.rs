//! Recovery policy table
//!
//! Recoverability, user-facing suggestions and the recovery procedure for
//! every capture failure kind, resolved by exhaustive match.

use crate::utils::error::{AttachDirection, CaptureError, MediaKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recovery attempts allowed between two `clear_error` calls
pub const MAX_RETRIES: u32 = 3;

/// Kind-specific recovery procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryAction {
    RetryDiscovery,
    RetryConfiguration,
    RetrySetup,
    RetryDeviceChange,
    FallbackToSingle,
    ReduceResourceUsage,
    AwaitThermalRecovery,
    RetryExternalConnection,
}

/// Procedure for an error, or `None` when the error is terminal
pub fn recovery_action(error: &CaptureError) -> Option<RecoveryAction> {
    match error {
        CaptureError::DeviceUnavailable { .. } => Some(RecoveryAction::RetryDiscovery),
        CaptureError::AttachFailed { .. } => Some(RecoveryAction::RetryConfiguration),
        CaptureError::SetupFailed => Some(RecoveryAction::RetrySetup),
        CaptureError::DeviceChangeFailed => Some(RecoveryAction::RetryDeviceChange),
        CaptureError::PairingConfigurationFailed => Some(RecoveryAction::FallbackToSingle),
        CaptureError::FeatureNotSupported { .. } => None,
        CaptureError::InsufficientResources => Some(RecoveryAction::ReduceResourceUsage),
        CaptureError::ThermalThrottling => Some(RecoveryAction::AwaitThermalRecovery),
        CaptureError::ExternalConnectionFailed => Some(RecoveryAction::RetryExternalConnection),
        CaptureError::Unknown { .. } => None,
    }
}

pub fn is_recoverable(error: &CaptureError) -> bool {
    recovery_action(error).is_some()
}

/// Ordered, plain-language remediation hints. Empty for terminal errors.
pub fn suggestions(error: &CaptureError) -> Vec<String> {
    let hints: &[&str] = match error {
        CaptureError::DeviceUnavailable {
            media: MediaKind::Video,
        } => &[
            "Make sure no other app is using the camera",
            "Check that camera access is allowed in Settings",
            "Restart the app if the camera stays unavailable",
        ],
        CaptureError::DeviceUnavailable {
            media: MediaKind::Audio,
        } => &[
            "Make sure no other app is using the microphone",
            "Check that microphone access is allowed in Settings",
        ],
        CaptureError::AttachFailed {
            direction: AttachDirection::Input,
        } => &[
            "Close other apps that may be using the camera",
            "Try switching cameras",
        ],
        CaptureError::AttachFailed {
            direction: AttachDirection::Output,
        } => &[
            "Free up some storage space",
            "Try again in a moment",
        ],
        CaptureError::SetupFailed => &[
            "Close and reopen the camera",
            "Restart your device if the problem continues",
        ],
        CaptureError::DeviceChangeFailed => &[
            "Wait a moment before switching cameras again",
            "Try switching back to the previous camera",
        ],
        CaptureError::PairingConfigurationFailed => &[
            "Dual camera will fall back to a single camera",
            "Try a lower resolution for dual camera capture",
        ],
        CaptureError::InsufficientResources => &[
            "Close other apps running in the background",
            "Use a single camera instead of dual camera",
            "Lower the capture resolution",
        ],
        CaptureError::ThermalThrottling => &[
            "Let your device cool down for a few minutes",
            "Remove the case or move out of direct sunlight",
            "Use a single camera until the device cools down",
        ],
        CaptureError::ExternalConnectionFailed => &[
            "Reconnect the external camera",
            "Try a different cable or port",
        ],
        CaptureError::FeatureNotSupported { .. } | CaptureError::Unknown { .. } => &[],
    };
    hints.iter().map(|h| h.to_string()).collect()
}

/// Single explanatory message shown for a terminal error
pub fn terminal_message(error: &CaptureError) -> String {
    match error {
        CaptureError::FeatureNotSupported { feature } => {
            format!("{} is not supported on this device.", feature)
        }
        other => format!("Camera stopped: {}.", other),
    }
}

/// A surfaced failure and the recovery bookkeeping attached to it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub kind: CaptureError,
    pub retry_count: u32,
    pub suggestions: Vec<String>,
    pub recoverable: bool,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(kind: CaptureError, retry_count: u32) -> Self {
        Self {
            suggestions: suggestions(&kind),
            recoverable: is_recoverable(&kind),
            kind,
            retry_count,
            occurred_at: Utc::now(),
        }
    }
}

impl PartialEq for ErrorRecord {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.retry_count == other.retry_count
            && self.recoverable == other.recoverable
            && self.suggestions == other.suggestions
    }
}

impl Eq for ErrorRecord {}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_kind() -> Vec<CaptureError> {
        vec![
            CaptureError::DeviceUnavailable { media: MediaKind::Video },
            CaptureError::DeviceUnavailable { media: MediaKind::Audio },
            CaptureError::AttachFailed { direction: AttachDirection::Input },
            CaptureError::AttachFailed { direction: AttachDirection::Output },
            CaptureError::SetupFailed,
            CaptureError::DeviceChangeFailed,
            CaptureError::PairingConfigurationFailed,
            CaptureError::InsufficientResources,
            CaptureError::ThermalThrottling,
            CaptureError::ExternalConnectionFailed,
        ]
    }

    #[test]
    fn test_recoverable_kinds_have_two_or_three_suggestions() {
        for kind in every_kind() {
            assert!(is_recoverable(&kind), "{:?} should be recoverable", kind);
            let count = suggestions(&kind).len();
            assert!((2..=3).contains(&count), "{:?} has {} suggestions", kind, count);
        }
    }

    #[test]
    fn test_feature_not_supported_is_terminal() {
        let err = CaptureError::FeatureNotSupported {
            feature: "Dual camera".to_string(),
        };
        assert!(!is_recoverable(&err));
        assert!(suggestions(&err).is_empty());
        assert_eq!(terminal_message(&err), "Dual camera is not supported on this device.");
    }

    #[test]
    fn test_action_table() {
        assert_eq!(
            recovery_action(&CaptureError::PairingConfigurationFailed),
            Some(RecoveryAction::FallbackToSingle)
        );
        assert_eq!(
            recovery_action(&CaptureError::ThermalThrottling),
            Some(RecoveryAction::AwaitThermalRecovery)
        );
        assert_eq!(
            recovery_action(&CaptureError::Unknown { cause: "x".into() }),
            None
        );
    }

    #[test]
    fn test_record_equality_ignores_timestamp() {
        let a = ErrorRecord::new(CaptureError::SetupFailed, 1);
        let mut b = ErrorRecord::new(CaptureError::SetupFailed, 1);
        b.occurred_at = a.occurred_at + chrono::Duration::seconds(5);
        assert_eq!(a, b);
        assert!(a.recoverable);
    }
}
