//! Session facade: the only surface surrounding code depends on

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::backend::VerificationBackend;
use crate::cancel::{cancel_pair, CancelSource};
use crate::capture::{
    CameraConstraints, CapturePlatform, CaptureResourceManager, DeviceCapabilities,
};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::machine::VerificationStateMachine;
use crate::progress::ProgressSink;
use crate::stages::ExecutionMode;
use crate::types::{
    CedulaIdentity, SessionStatus, StageKind, StageRecord, StageStatus, VerificationOutcome,
    VerificationSession,
};

type SuccessFn = Box<dyn Fn(CedulaIdentity) + Send + Sync>;
type ErrorFn = Box<dyn Fn(String) + Send + Sync>;
type CompleteFn = Box<dyn Fn(bool, VerificationOutcome) + Send + Sync>;
type ProgressFn = Box<dyn Fn(StageKind, u8) + Send + Sync>;

/// Outward callback contract of a session.
///
/// `on_error` fires for every stage failure (a retry may follow);
/// `on_complete` is terminal and fires exactly once, at the first of:
/// pipeline completion, final-stage failure, cancellation. `on_success`
/// delivers the verified identity whenever the pipeline completes.
#[derive(Default)]
pub struct SessionCallbacks {
    on_success: Option<SuccessFn>,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
    on_progress: Option<ProgressFn>,
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, f: impl Fn(CedulaIdentity) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(bool, VerificationOutcome) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_progress(mut self, f: impl Fn(StageKind, u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Entry point for verification sessions.
///
/// Probes device capabilities exactly once at construction and caches them;
/// every session started from this facade shares one capture manager, so
/// hardware exclusivity holds across concurrent sessions.
pub struct SessionFacade {
    backend: Arc<dyn VerificationBackend>,
    captures: Arc<CaptureResourceManager>,
    capabilities: DeviceCapabilities,
}

impl SessionFacade {
    pub async fn new(
        platform: Arc<dyn CapturePlatform>,
        backend: Arc<dyn VerificationBackend>,
    ) -> Self {
        let capabilities = platform.probe().await;
        info!(
            camera = capabilities.camera,
            nfc = capabilities.nfc,
            "device capabilities probed"
        );
        let captures = Arc::new(CaptureResourceManager::new(
            platform,
            capabilities,
            CameraConstraints::default(),
        ));
        Self {
            backend,
            captures,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    /// Mode a stage should run in for the given config on this device:
    /// simulated when the session is a demo or the required hardware is
    /// absent, real otherwise.
    pub fn preferred_mode(&self, config: &SessionConfig, kind: StageKind) -> ExecutionMode {
        if config.demo_mode {
            return ExecutionMode::Simulated;
        }
        let supported = match kind {
            StageKind::Nfc => self.capabilities.nfc,
            StageKind::Biometric => self.capabilities.camera,
            StageKind::Document | StageKind::Validation => true,
        };
        if supported {
            ExecutionMode::Real
        } else {
            ExecutionMode::Simulated
        }
    }

    #[instrument(skip(self, config, callbacks))]
    pub fn start_session(
        &self,
        config: SessionConfig,
        callbacks: SessionCallbacks,
    ) -> Result<SessionHandle> {
        config.validate()?;
        let session_id = format!("ivs-{}", Uuid::new_v4());
        info!(%session_id, demo = config.demo_mode, "verification session started");

        let machine = VerificationStateMachine::new(
            session_id.clone(),
            Arc::new(config),
            Arc::clone(&self.backend),
            Arc::clone(&self.captures),
        );
        let (cancel, _token) = cancel_pair();
        Ok(SessionHandle {
            inner: Arc::new(SessionShared {
                session_id,
                machine: tokio::sync::Mutex::new(machine),
                cancel,
                callbacks,
                terminal_fired: AtomicBool::new(false),
                live_progress: Mutex::new(None),
            }),
        })
    }
}

impl std::fmt::Debug for SessionFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFacade")
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

struct SessionShared {
    session_id: String,
    machine: tokio::sync::Mutex<VerificationStateMachine>,
    cancel: CancelSource,
    callbacks: SessionCallbacks,
    terminal_fired: AtomicBool,
    live_progress: Mutex<Option<(StageKind, u8)>>,
}

/// Caller-side handle of one verification session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Latest progress report of the stage currently (or last) running.
    pub fn progress(&self) -> Option<(StageKind, u8)> {
        *self.inner.live_progress.lock()
    }

    pub async fn set_document_image(&self, image: Vec<u8>) {
        self.inner.machine.lock().await.set_document_image(image);
    }

    /// Read-only snapshot of the session and its stage records.
    pub async fn session(&self) -> VerificationSession {
        self.inner.machine.lock().await.snapshot()
    }

    /// Snapshot of the four stage records, in pipeline order.
    pub async fn records(&self) -> Vec<StageRecord> {
        self.inner.machine.lock().await.snapshot().records
    }

    /// Terminal outcome, once the session has succeeded, aborted or been
    /// cancelled.
    pub async fn outcome(&self) -> Option<VerificationOutcome> {
        self.inner.machine.lock().await.outcome()
    }

    /// Runs one stage to its end and returns the finished record.
    ///
    /// Stages advance only through explicit calls here, in pipeline order;
    /// re-invoking a failed stage is the retry path.
    pub async fn run_stage(&self, kind: StageKind, mode: ExecutionMode) -> Result<StageRecord> {
        let shared = &self.inner;
        {
            *shared.live_progress.lock() = Some((kind, 0));
        }
        let progress_shared = Arc::clone(shared);
        let sink = ProgressSink::new(Arc::new(move |value| {
            *progress_shared.live_progress.lock() = Some((kind, value));
            if let Some(cb) = &progress_shared.callbacks.on_progress {
                cb(kind, value);
            }
        }));

        let token = shared.cancel.token();
        let record = {
            let mut machine = shared.machine.lock().await;
            machine.run_stage(kind, mode, sink, token).await?
        };

        match record.status {
            StageStatus::Succeeded => {
                if kind == StageKind::Validation {
                    self.finish_successfully().await;
                }
            }
            StageStatus::Failed => {
                if let (Some(cb), Some(err)) = (&shared.callbacks.on_error, &record.error) {
                    cb(err.to_string());
                }
                let cancelled = {
                    let machine = shared.machine.lock().await;
                    machine.session().status == SessionStatus::Cancelled
                };
                // A failed final stage is terminal just like cancellation:
                // the registry verdict ends the attempt even if the caller
                // later retries the stage.
                if cancelled || kind == StageKind::Validation {
                    self.fire_terminal(false).await;
                }
            }
            _ => {}
        }

        Ok(record)
    }

    /// Cancels the session: interrupts the in-flight stage at its next
    /// suspension point, releases any held capture handle, and fires the
    /// terminal callback.
    pub async fn cancel(&self) {
        self.inner.cancel.cancel();
        // Taking the machine lock waits for the in-flight stage to unwind
        // cooperatively, which is what bounds the grace period.
        {
            let mut machine = self.inner.machine.lock().await;
            machine.mark_cancelled();
        }
        self.fire_terminal(false).await;
    }

    async fn finish_successfully(&self) {
        let (identity, outcome) = {
            let machine = self.inner.machine.lock().await;
            (
                machine.session().identity().cloned(),
                machine.outcome(),
            )
        };
        // The verified identity is always delivered, even when an earlier
        // terminal report (failed validation, later retried) already
        // consumed the once-guard below.
        if let (Some(cb), Some(identity)) = (&self.inner.callbacks.on_success, identity) {
            cb(identity);
        }
        if self.inner.terminal_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        if let (Some(cb), Some(outcome)) = (&self.inner.callbacks.on_complete, outcome) {
            cb(true, outcome);
        }
    }

    async fn fire_terminal(&self, success: bool) {
        if self.inner.terminal_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let outcome = self.inner.machine.lock().await.outcome();
        if let (Some(cb), Some(outcome)) = (&self.inner.callbacks.on_complete, outcome) {
            cb(success, outcome);
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.inner.session_id)
            .finish()
    }
}
