//! Error types and handling for the identity verification pipeline

use std::result::Result as StdResult;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::CaptureKind;
use crate::types::StageKind;

/// Custom result type for verification operations
pub type Result<T> = StdResult<T, VerificationError>;

/// Typed error surface of every stage strategy and the state machine.
///
/// Strategies never let an unclassified error cross their boundary: anything
/// unexpected (transport, decode, backend panic) collapses into
/// `NetworkFailure`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum VerificationError {
    #[error("capture device unavailable")]
    DeviceUnavailable,

    #[error("capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("stage timed out")]
    Timeout,

    #[error("biometric confidence too low (score {score})")]
    LowConfidence { score: u8 },

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("registry validation rejected: {reason}")]
    ValidationRejected { reason: String },

    #[error("verification cancelled")]
    Cancelled,

    #[error("{kind} capture already held")]
    CaptureBusy { kind: CaptureKind },

    #[error("stage {requested} requested out of order")]
    StageOrder {
        /// The stage that is actually next, or `None` when the pipeline has
        /// already completed.
        expected: Option<StageKind>,
        requested: StageKind,
    },
}

impl VerificationError {
    /// Errors the caller may clear by re-invoking the same stage.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::NetworkFailure(_) | Self::LowConfidence { .. }
        )
    }

    /// Errors caused by the execution environment rather than the subject.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable | Self::PermissionDenied(_) | Self::CaptureBusy { .. }
        )
    }
}

impl From<reqwest::Error> for VerificationError {
    fn from(err: reqwest::Error) -> Self {
        VerificationError::NetworkFailure(err.to_string())
    }
}

impl From<serde_json::Error> for VerificationError {
    fn from(err: serde_json::Error) -> Self {
        VerificationError::NetworkFailure(format!("malformed backend response: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_disjoint() {
        let recoverable = VerificationError::NetworkFailure("reset".into());
        assert!(recoverable.is_recoverable());
        assert!(!recoverable.is_environment());

        let environment = VerificationError::CaptureBusy {
            kind: CaptureKind::Nfc,
        };
        assert!(environment.is_environment());
        assert!(!environment.is_recoverable());

        assert!(!VerificationError::Cancelled.is_recoverable());
        assert!(!VerificationError::Cancelled.is_environment());
    }

    #[test]
    fn errors_round_trip_through_serde() {
        // Stage records persist their error; the enum must stay
        // serializable.
        let err = VerificationError::LowConfidence { score: 41 };
        let json = serde_json::to_value(&err).unwrap();
        let back: VerificationError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);

        let err = VerificationError::StageOrder {
            expected: Some(StageKind::Document),
            requested: StageKind::Validation,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: VerificationError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
