//! Identity verification orchestrator for Chilean cédula documents.
//! Drives a fixed four-stage pipeline (document forensics, NFC chip read,
//! biometric facial match, official-registry validation) over exclusive
//! capture hardware, with simulated fallbacks for demo and headless runs.

// Core pipeline and configuration
pub mod config;
pub mod error;
pub mod machine;
pub mod session;
pub mod types;

// Capture hardware, cancellation and progress plumbing
pub mod cancel;
pub mod capture;
pub mod progress;

// Stage strategies
pub mod stages;

// Backend transport and audit reporting
pub mod backend;
pub mod reporter;

pub use backend::{
    AuditEvent, FacialMatchRequest, FacialMatchResponse, HttpBackend, RegistryRequest,
    RegistryResponse, VerificationBackend,
};
pub use cancel::{cancel_pair, CancelSource, CancelToken};
pub use capture::{
    CameraConstraints, CameraStream, CapturePlatform, CaptureHandle, CaptureKind,
    CaptureResourceManager, DeviceCapabilities, HeadlessPlatform, NfcTagReader, PhaseCallback,
};
pub use config::{EndpointConfig, SessionConfig, StageTimeouts};
pub use error::{Result, VerificationError};
pub use machine::VerificationStateMachine;
pub use progress::{NfcReadPhase, ProgressSink};
pub use session::{SessionCallbacks, SessionFacade, SessionHandle};
pub use stages::{ExecutionMode, StageInput, StageStrategy};
pub use types::{
    BiometricMatchResult, CedulaIdentity, DocumentForensicsReport, OfficialValidationResult,
    SessionStatus, StageKind, StagePayload, StageRecord, StageStatus, VerificationOutcome,
    VerificationSession,
};
