//! Core session and stage data model for the verification pipeline

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VerificationError;

/// The four sequential verification stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Document,
    Nfc,
    Biometric,
    Validation,
}

impl StageKind {
    /// Fixed execution order. A stage never starts unless every earlier
    /// entry of this list has succeeded.
    pub const ORDER: [StageKind; 4] = [
        StageKind::Document,
        StageKind::Nfc,
        StageKind::Biometric,
        StageKind::Validation,
    ];

    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<StageKind> {
        let idx = Self::ORDER.iter().position(|k| *k == self)?;
        Self::ORDER.get(idx + 1).copied()
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Document => write!(f, "document"),
            StageKind::Nfc => write!(f, "nfc"),
            StageKind::Biometric => write!(f, "biometric"),
            StageKind::Validation => write!(f, "validation"),
        }
    }
}

/// Lifecycle of a single stage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Lifecycle of a whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

/// Forensic analysis result for a captured document image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentForensicsReport {
    pub document_detected: bool,
    pub mrz_detected: bool,
    pub mrz_confidence: u8,
    pub uv_features_detected: bool,
    pub alterations_detected: bool,
    pub alterations_confidence: u8,
    /// Overall authenticity score, 0-100. Compared against the configured
    /// warning threshold before the pipeline advances.
    pub overall_authenticity: u8,
}

/// Identity data read from the chip of a national ID card. All fields are
/// opaque strings at this layer; downstream consumers validate them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CedulaIdentity {
    pub rut: String,
    pub nombres: String,
    pub apellidos: String,
    pub nacionalidad: String,
    pub fecha_nacimiento: String,
    pub fecha_emision: String,
    pub fecha_expiracion: String,
    pub sexo: String,
    pub numero_documento: String,
    pub numero_serie: String,
}

impl CedulaIdentity {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.nombres, self.apellidos).trim().to_string()
    }
}

/// Result of the facial match against the document holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricMatchResult {
    pub match_score: u8,
    pub liveness_passed: bool,
    /// Handle of the reference image taken from the document.
    pub reference_image: Option<String>,
    /// Handle of the live captured frame.
    pub captured_image: Option<String>,
}

/// Result of the official-registry lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficialValidationResult {
    pub registry_valid: bool,
    pub document_current: bool,
    /// Raw provider payload, kept verbatim for audit purposes.
    pub raw_details: Option<serde_json::Value>,
}

/// Stage-specific payload attached to a succeeded record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StagePayload {
    Document(DocumentForensicsReport),
    Nfc(CedulaIdentity),
    Biometric(BiometricMatchResult),
    Validation(OfficialValidationResult),
}

impl StagePayload {
    pub fn kind(&self) -> StageKind {
        match self {
            StagePayload::Document(_) => StageKind::Document,
            StagePayload::Nfc(_) => StageKind::Nfc,
            StagePayload::Biometric(_) => StageKind::Biometric,
            StagePayload::Validation(_) => StageKind::Validation,
        }
    }
}

/// Per-stage execution record. Mutated only by the state machine while the
/// stage runs; immutable once status leaves `Running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub kind: StageKind,
    pub status: StageStatus,
    pub progress: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub payload: Option<StagePayload>,
    pub error: Option<VerificationError>,
}

impl StageRecord {
    pub fn pending(kind: StageKind) -> Self {
        Self {
            kind,
            status: StageStatus::Pending,
            progress: 0,
            started_at: None,
            ended_at: None,
            payload: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, StageStatus::Succeeded | StageStatus::Failed)
    }
}

/// One verification attempt: ordered stage records plus overall status.
/// Owned exclusively by the state machine; callers only ever see snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSession {
    pub id: String,
    pub records: Vec<StageRecord>,
    pub status: SessionStatus,
    pub demo_mode: bool,
    /// Set when the document stage reported an authenticity score below the
    /// configured threshold. A warning for the caller, never a failure.
    pub low_authenticity_warning: bool,
}

impl VerificationSession {
    pub fn new(id: String, demo_mode: bool) -> Self {
        Self {
            id,
            records: StageKind::ORDER.iter().map(|k| StageRecord::pending(*k)).collect(),
            status: SessionStatus::NotStarted,
            demo_mode,
            low_authenticity_warning: false,
        }
    }

    pub fn record(&self, kind: StageKind) -> &StageRecord {
        // Records are seeded for all four kinds at construction.
        self.records
            .iter()
            .find(|r| r.kind == kind)
            .unwrap_or_else(|| unreachable!("record for {kind} always exists"))
    }

    pub(crate) fn record_mut(&mut self, kind: StageKind) -> &mut StageRecord {
        self.records
            .iter_mut()
            .find(|r| r.kind == kind)
            .unwrap_or_else(|| unreachable!("record for {kind} always exists"))
    }

    /// The next stage that has not yet succeeded, in pipeline order.
    pub fn next_stage(&self) -> Option<StageKind> {
        self.records
            .iter()
            .find(|r| r.status != StageStatus::Succeeded)
            .map(|r| r.kind)
    }

    /// Identity read by the NFC stage, once available.
    pub fn identity(&self) -> Option<&CedulaIdentity> {
        match self.record(StageKind::Nfc).payload.as_ref() {
            Some(StagePayload::Nfc(identity)) => Some(identity),
            _ => None,
        }
    }
}

/// Terminal result handed to the certification/signing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    pub records: Vec<StageRecord>,
    /// Present when the NFC stage completed, regardless of later failures.
    pub identity: Option<CedulaIdentity>,
    pub low_authenticity_warning: bool,
    /// The error that aborted the pipeline, when it did not complete.
    pub terminal_error: Option<VerificationError>,
}

impl VerificationOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == SessionStatus::Succeeded
    }
}
