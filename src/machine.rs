//! Verification state machine: ordered, caller-driven stage execution

use std::sync::Arc;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::backend::VerificationBackend;
use crate::cancel::CancelToken;
use crate::capture::CaptureResourceManager;
use crate::config::SessionConfig;
use crate::error::{Result, VerificationError};
use crate::progress::ProgressSink;
use crate::reporter::ResultReporter;
use crate::stages::{strategy_for, ExecutionMode, StageContext, StageInput};
use crate::types::{
    SessionStatus, StageKind, StagePayload, StageRecord, StageStatus, VerificationOutcome,
    VerificationSession,
};

/// Drives the pipeline Idle → Document → Nfc → Biometric → Validation →
/// Completed | Aborted.
///
/// Advancement is explicit: each stage runs only when the caller invokes
/// [`run_stage`](Self::run_stage), matching the manual checkpoints the
/// surrounding workflow depends on. Nothing auto-chains. A failed stage
/// aborts the session; the caller may retry by re-invoking the same stage.
pub struct VerificationStateMachine {
    session: VerificationSession,
    config: Arc<SessionConfig>,
    backend: Arc<dyn VerificationBackend>,
    captures: Arc<CaptureResourceManager>,
    reporter: ResultReporter,
    document_image: Option<Vec<u8>>,
}

impl VerificationStateMachine {
    pub fn new(
        session_id: String,
        config: Arc<SessionConfig>,
        backend: Arc<dyn VerificationBackend>,
        captures: Arc<CaptureResourceManager>,
    ) -> Self {
        let reporter = ResultReporter::new(Arc::clone(&backend), session_id.clone(), config.demo_mode);
        Self {
            session: VerificationSession::new(session_id, config.demo_mode),
            config,
            backend,
            captures,
            reporter,
            document_image: None,
        }
    }

    pub fn session(&self) -> &VerificationSession {
        &self.session
    }

    /// Read-only snapshot for callers; the session itself never leaves the
    /// machine.
    pub fn snapshot(&self) -> VerificationSession {
        self.session.clone()
    }

    /// Supplies the image blob the document stage analyzes in real mode.
    pub fn set_document_image(&mut self, image: Vec<u8>) {
        self.document_image = Some(image);
    }

    fn check_order(&self, requested: StageKind) -> Result<()> {
        match self.session.status {
            SessionStatus::Succeeded => Err(VerificationError::StageOrder {
                expected: None,
                requested,
            }),
            SessionStatus::Cancelled => Err(VerificationError::Cancelled),
            _ => {
                let expected = self.session.next_stage();
                if expected == Some(requested) {
                    Ok(())
                } else {
                    Err(VerificationError::StageOrder {
                        expected,
                        requested,
                    })
                }
            }
        }
    }

    fn input_for(&self, kind: StageKind) -> StageInput {
        match kind {
            StageKind::Document => match &self.document_image {
                Some(image) => StageInput::Image(image.clone()),
                None => StageInput::None,
            },
            StageKind::Nfc => StageInput::None,
            StageKind::Biometric | StageKind::Validation => match self.session.identity() {
                Some(identity) => StageInput::Identity(identity.clone()),
                // Unreachable when ordering holds; the strategy rejects it.
                None => StageInput::None,
            },
        }
    }

    /// Executes one stage to completion, failure, timeout or cancellation.
    ///
    /// Returns the finished stage record; `Err` is reserved for caller
    /// misuse (out-of-order stage, already-cancelled session). Execution
    /// failures land in the record with the session marked aborted.
    #[instrument(skip(self, progress, cancel), fields(session = %self.session.id))]
    pub async fn run_stage(
        &mut self,
        kind: StageKind,
        mode: ExecutionMode,
        progress: ProgressSink,
        cancel: CancelToken,
    ) -> Result<StageRecord> {
        self.check_order(kind)?;
        cancel.check()?;

        // Demo sessions never touch hardware or real backends.
        let effective_mode = if self.session.demo_mode {
            ExecutionMode::Simulated
        } else {
            mode
        };

        let input = self.input_for(kind);
        let ctx = StageContext::new(
            self.session.id.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.backend),
            Arc::clone(&self.captures),
            cancel.clone(),
        );

        {
            let record = self.session.record_mut(kind);
            record.status = StageStatus::Running;
            record.progress = 0;
            record.started_at = Some(Utc::now());
            record.ended_at = None;
            record.payload = None;
            record.error = None;
        }
        self.session.status = SessionStatus::InProgress;
        info!(stage = %kind, mode = ?effective_mode, "stage started");

        let strategy = strategy_for(kind);
        let deadline = self.config.timeouts.for_stage(kind);
        let result = tokio::select! {
            res = timeout(deadline, strategy.execute(&ctx, input, effective_mode, &progress)) => {
                match res {
                    Ok(inner) => inner,
                    Err(_) => Err(VerificationError::Timeout),
                }
            }
            () = cancel.cancelled() => Err(VerificationError::Cancelled),
        };

        match result {
            Ok(payload) => self.complete_stage(kind, payload),
            Err(err) => self.fail_stage(kind, err, &progress),
        }

        Ok(self.session.record(kind).clone())
    }

    fn complete_stage(&mut self, kind: StageKind, payload: StagePayload) {
        if let StagePayload::Document(report) = &payload {
            if report.overall_authenticity < self.config.authenticity_warn_threshold {
                warn!(
                    authenticity = report.overall_authenticity,
                    threshold = self.config.authenticity_warn_threshold,
                    "document authenticity below threshold, flagging session"
                );
                self.session.low_authenticity_warning = true;
            }
        }

        let record = self.session.record_mut(kind);
        record.status = StageStatus::Succeeded;
        record.progress = 100;
        record.ended_at = Some(Utc::now());
        record.payload = Some(payload);

        if kind == StageKind::Validation {
            self.session.status = SessionStatus::Succeeded;
            info!("verification pipeline completed");
        }
        self.reporter.report_stage(kind, true);
    }

    fn fail_stage(&mut self, kind: StageKind, err: VerificationError, progress: &ProgressSink) {
        warn!(stage = %kind, %err, "stage failed");
        let cancelled = err == VerificationError::Cancelled;

        let record = self.session.record_mut(kind);
        record.status = StageStatus::Failed;
        record.progress = progress.last();
        record.ended_at = Some(Utc::now());
        record.error = Some(err);

        self.session.status = if cancelled {
            SessionStatus::Cancelled
        } else {
            SessionStatus::Failed
        };
        self.reporter.report_stage(kind, false);
    }

    /// Marks the session cancelled outside of stage execution. Any record
    /// still `Running` (it cannot normally be, the machine is exclusive
    /// while a stage runs) is closed out as cancelled.
    pub fn mark_cancelled(&mut self) {
        if self.session.status == SessionStatus::Succeeded {
            return;
        }
        for record in &mut self.session.records {
            if record.status == StageStatus::Running {
                record.status = StageStatus::Failed;
                record.ended_at = Some(Utc::now());
                record.error = Some(VerificationError::Cancelled);
            }
        }
        self.session.status = SessionStatus::Cancelled;
    }

    /// Terminal result, once the session has succeeded, aborted or been
    /// cancelled.
    pub fn outcome(&self) -> Option<VerificationOutcome> {
        let terminal = matches!(
            self.session.status,
            SessionStatus::Succeeded | SessionStatus::Failed | SessionStatus::Cancelled
        );
        if !terminal {
            return None;
        }
        let terminal_error = self
            .session
            .records
            .iter()
            .rev()
            .find_map(|r| r.error.clone());
        Some(VerificationOutcome {
            session_id: self.session.id.clone(),
            status: self.session.status,
            records: self.session.records.clone(),
            identity: self.session.identity().cloned(),
            low_authenticity_warning: self.session.low_authenticity_warning,
            terminal_error,
        })
    }
}

impl std::fmt::Debug for VerificationStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationStateMachine")
            .field("session", &self.session.id)
            .field("status", &self.session.status)
            .finish()
    }
}
