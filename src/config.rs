//! Configuration types and validation for the verification pipeline

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VerificationError};
use crate::types::StageKind;

/// Default authenticity score below which a session is flagged for a
/// caller-side warning. Inherited policy; tune per deployment.
pub const DEFAULT_AUTHENTICITY_WARN_THRESHOLD: u8 = 60;

/// Per-stage execution deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTimeouts {
    pub document: Duration,
    pub nfc: Duration,
    pub biometric: Duration,
    pub validation: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            document: Duration::from_secs(30),
            // Chip reads wait for the user to present the card.
            nfc: Duration::from_secs(45),
            biometric: Duration::from_secs(60),
            validation: Duration::from_secs(30),
        }
    }
}

impl StageTimeouts {
    pub fn for_stage(&self, kind: StageKind) -> Duration {
        match kind {
            StageKind::Document => self.document,
            StageKind::Nfc => self.nfc,
            StageKind::Biometric => self.biometric,
            StageKind::Validation => self.validation,
        }
    }
}

/// Backend endpoints consumed by the stage strategies and the reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub forensics_path: String,
    pub facial_path: String,
    pub registry_path: String,
    pub audit_log_path: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost".to_string(),
            forensics_path: "/api/identity/analyze-document".to_string(),
            facial_path: "/api/identity/verify-facial".to_string(),
            registry_path: "/api/identity/validate-official-records".to_string(),
            audit_log_path: "/api/identity/verification-log".to_string(),
        }
    }
}

impl EndpointConfig {
    pub fn forensics_url(&self) -> String {
        format!("{}{}", self.base_url, self.forensics_path)
    }

    pub fn facial_url(&self) -> String {
        format!("{}{}", self.base_url, self.facial_path)
    }

    pub fn registry_url(&self) -> String {
        format!("{}{}", self.base_url, self.registry_path)
    }

    pub fn audit_log_url(&self) -> String {
        format!("{}{}", self.base_url, self.audit_log_path)
    }
}

/// Global session execution config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Forces simulated mode for every stage of this session.
    pub demo_mode: bool,
    /// Authenticity score below which the session is flagged, not failed.
    pub authenticity_warn_threshold: u8,
    pub timeouts: StageTimeouts,
    pub endpoints: EndpointConfig,
    /// Pause before a real biometric capture so the user can frame.
    pub framing_delay: Duration,
    /// Unit delay of the simulated stage timelines.
    pub simulated_step: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            demo_mode: false,
            authenticity_warn_threshold: DEFAULT_AUTHENTICITY_WARN_THRESHOLD,
            timeouts: StageTimeouts::default(),
            endpoints: EndpointConfig::default(),
            framing_delay: Duration::from_secs(2),
            simulated_step: Duration::from_millis(750),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.authenticity_warn_threshold > 100 {
            return Err(VerificationError::ValidationRejected {
                reason: "authenticity threshold must be within 0-100".to_string(),
            });
        }
        for kind in StageKind::ORDER {
            if self.timeouts.for_stage(kind).is_zero() {
                return Err(VerificationError::ValidationRejected {
                    reason: format!("{kind} stage timeout must be non-zero"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = SessionConfig::default();
        config.timeouts.nfc = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn endpoint_urls_join_base_and_path() {
        let endpoints = EndpointConfig {
            base_url: "https://api.example.cl".to_string(),
            ..EndpointConfig::default()
        };
        assert_eq!(
            endpoints.facial_url(),
            "https://api.example.cl/api/identity/verify-facial"
        );
    }
}
