//! Stage strategies: one executor per verification stage
//!
//! Every strategy obeys the same policy: typed errors only (anything
//! unexpected collapses into `NetworkFailure`), cancellation checked at each
//! suspension point, monotonic progress with a final 100 on success.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::backend::VerificationBackend;
use crate::cancel::CancelToken;
use crate::capture::CaptureResourceManager;
use crate::config::SessionConfig;
use crate::error::{Result, VerificationError};
use crate::progress::ProgressSink;
use crate::types::{CedulaIdentity, StageKind, StagePayload};

pub mod biometric;
pub mod document;
pub mod nfc;
pub mod validation;

pub use biometric::BiometricStage;
pub use document::DocumentStage;
pub use nfc::NfcStage;
pub use validation::ValidationStage;

/// Whether a stage talks to real hardware/backends or runs its canned
/// deterministic substitute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    Real,
    Simulated,
}

/// Input handed to a strategy by the state machine.
#[derive(Debug, Clone)]
pub enum StageInput {
    /// No input; the stage reads from hardware.
    None,
    /// Document image blob for forensic analysis.
    Image(Vec<u8>),
    /// Identity read earlier in the pipeline, for corroboration.
    Identity(CedulaIdentity),
}

/// Shared execution environment for one stage run.
#[derive(Clone)]
pub struct StageContext {
    pub session_id: String,
    pub config: Arc<SessionConfig>,
    pub backend: Arc<dyn VerificationBackend>,
    pub captures: Arc<CaptureResourceManager>,
    pub cancel: CancelToken,
}

impl StageContext {
    pub fn new(
        session_id: String,
        config: Arc<SessionConfig>,
        backend: Arc<dyn VerificationBackend>,
        captures: Arc<CaptureResourceManager>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            session_id,
            config,
            backend,
            captures,
            cancel,
        }
    }

    /// Races `fut` against cancellation.
    pub async fn run_cancellable<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            res = fut => res,
            () = self.cancel.cancelled() => Err(VerificationError::Cancelled),
        }
    }

    /// Cancellable sleep used by simulated timelines and framing delays.
    pub async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            () = sleep(duration) => Ok(()),
            () = self.cancel.cancelled() => Err(VerificationError::Cancelled),
        }
    }

    /// Walks a canned progress timeline, one simulated step per checkpoint.
    pub async fn simulate_timeline(&self, progress: &ProgressSink, checkpoints: &[u8]) -> Result<()> {
        for &checkpoint in checkpoints {
            self.pause(self.config.simulated_step).await?;
            progress.report(checkpoint);
        }
        Ok(())
    }
}

/// Common contract of the four stage executors.
#[async_trait]
pub trait StageStrategy: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn execute(
        &self,
        ctx: &StageContext,
        input: StageInput,
        mode: ExecutionMode,
        progress: &ProgressSink,
    ) -> Result<StagePayload>;
}

/// Strategy for a given stage kind.
pub fn strategy_for(kind: StageKind) -> Box<dyn StageStrategy> {
    match kind {
        StageKind::Document => Box::new(DocumentStage),
        StageKind::Nfc => Box::new(NfcStage),
        StageKind::Biometric => Box::new(BiometricStage),
        StageKind::Validation => Box::new(ValidationStage),
    }
}
