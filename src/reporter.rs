//! Fire-and-forget audit reporting of stage outcomes

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{AuditEvent, VerificationBackend};
use crate::types::StageKind;

const DOCUMENT_TYPE: &str = "CÉDULA DE IDENTIDAD";

/// Posts one audit event per stage outcome to the logging endpoint.
///
/// This is the only component allowed to swallow errors: a failed audit
/// post is logged and forgotten, it never changes the pipeline outcome.
#[derive(Clone)]
pub struct ResultReporter {
    backend: Arc<dyn VerificationBackend>,
    session_id: String,
    demo_mode: bool,
}

impl ResultReporter {
    pub fn new(backend: Arc<dyn VerificationBackend>, session_id: String, demo_mode: bool) -> Self {
        Self {
            backend,
            session_id,
            demo_mode,
        }
    }

    fn event(&self, kind: StageKind, success: bool) -> AuditEvent {
        let verification_method = if self.demo_mode {
            format!("{kind}-demo")
        } else {
            kind.to_string()
        };
        AuditEvent {
            verification_method,
            document_type: DOCUMENT_TYPE.to_string(),
            success,
            session_id: self.session_id.clone(),
        }
    }

    /// Posts the event and absorbs any failure.
    pub async fn post(&self, kind: StageKind, success: bool) {
        let event = self.event(kind, success);
        match self.backend.log_verification(event).await {
            Ok(()) => debug!(%kind, success, "audit event posted"),
            Err(err) => warn!(%kind, %err, "audit post failed, continuing"),
        }
    }

    /// Fire-and-forget variant used by the state machine.
    pub fn report_stage(&self, kind: StageKind, success: bool) {
        let reporter = self.clone();
        tokio::spawn(async move {
            reporter.post(kind, success).await;
        });
    }
}

impl std::fmt::Debug for ResultReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultReporter")
            .field("session_id", &self.session_id)
            .field("demo_mode", &self.demo_mode)
            .finish()
    }
}
