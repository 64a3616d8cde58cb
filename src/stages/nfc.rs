//! NFC stage: reading the identity off the document's chip

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::capture::CaptureKind;
use crate::error::{Result, VerificationError};
use crate::progress::{NfcReadPhase, ProgressSink};
use crate::stages::{ExecutionMode, StageContext, StageInput, StageStrategy};
use crate::types::{CedulaIdentity, StageKind, StagePayload};

/// Canned identity yielded by the simulated chip read.
pub fn simulated_identity() -> CedulaIdentity {
    CedulaIdentity {
        rut: "12.345.678-9".to_string(),
        nombres: "CARLOS ANDRÉS".to_string(),
        apellidos: "GÓMEZ SOTO".to_string(),
        nacionalidad: "CHILENA".to_string(),
        fecha_nacimiento: "15/05/1990".to_string(),
        fecha_emision: "22/10/2019".to_string(),
        fecha_expiracion: "22/10/2029".to_string(),
        sexo: "M".to_string(),
        numero_documento: "12345678".to_string(),
        numero_serie: "ACF23580917".to_string(),
    }
}

/// Reads the chip of the identity document through the NFC capture handle.
///
/// Progress is driven by [`NfcReadPhase`] checkpoints emitted by the read
/// driver, never by inspecting message text.
#[derive(Debug, Default)]
pub struct NfcStage;

#[async_trait]
impl StageStrategy for NfcStage {
    fn kind(&self) -> StageKind {
        StageKind::Nfc
    }

    #[instrument(skip(self, ctx, _input, progress), fields(session = %ctx.session_id))]
    async fn execute(
        &self,
        ctx: &StageContext,
        _input: StageInput,
        mode: ExecutionMode,
        progress: &ProgressSink,
    ) -> Result<StagePayload> {
        ctx.cancel.check()?;

        // Held for the whole stage; dropped (and therefore released) on
        // every exit path, including cancellation and timeout.
        let handle = ctx.captures.acquire(CaptureKind::Nfc).await?;

        let identity = match mode {
            ExecutionMode::Simulated => {
                info!("nfc stage running simulated chip read");
                for phase in NfcReadPhase::SEQUENCE {
                    ctx.pause(ctx.config.simulated_step).await?;
                    progress.report_phase(phase);
                }
                simulated_identity()
            }
            ExecutionMode::Real => {
                if !ctx.captures.capabilities().nfc {
                    return Err(VerificationError::DeviceUnavailable);
                }
                let reader = handle
                    .nfc()
                    .ok_or(VerificationError::DeviceUnavailable)?
                    .clone();

                let phase_sink = progress.clone();
                let on_phase: Arc<dyn Fn(NfcReadPhase) + Send + Sync> =
                    Arc::new(move |phase| phase_sink.report_phase(phase));

                ctx.run_cancellable(reader.read_tag(on_phase)).await?
            }
        };

        progress.finish();
        drop(handle);
        info!(rut = %identity.rut, "nfc stage complete");
        Ok(StagePayload::Nfc(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::backend::{
        AuditEvent, FacialMatchRequest, FacialMatchResponse, RegistryRequest, RegistryResponse,
        VerificationBackend,
    };
    use crate::cancel::cancel_pair;
    use crate::capture::{
        CameraConstraints, CaptureResourceManager, DeviceCapabilities, HeadlessPlatform,
    };
    use crate::config::SessionConfig;
    use crate::types::DocumentForensicsReport;
    use parking_lot::Mutex;

    struct NoopBackend;

    #[async_trait]
    impl VerificationBackend for NoopBackend {
        async fn analyze_document(&self, _image: &[u8]) -> Result<DocumentForensicsReport> {
            Err(VerificationError::NetworkFailure("not wired".into()))
        }
        async fn verify_facial(&self, _r: FacialMatchRequest) -> Result<FacialMatchResponse> {
            Err(VerificationError::NetworkFailure("not wired".into()))
        }
        async fn validate_official_records(&self, _r: RegistryRequest) -> Result<RegistryResponse> {
            Err(VerificationError::NetworkFailure("not wired".into()))
        }
        async fn log_verification(&self, _e: AuditEvent) -> Result<()> {
            Ok(())
        }
    }

    fn ctx_with_caps(caps: DeviceCapabilities) -> StageContext {
        let (_source, token) = cancel_pair();
        StageContext::new(
            "test-session".to_string(),
            Arc::new(SessionConfig::default()),
            Arc::new(NoopBackend),
            Arc::new(CaptureResourceManager::new(
                Arc::new(HeadlessPlatform),
                caps,
                CameraConstraints::default(),
            )),
            token,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_read_yields_canned_identity_at_full_progress() {
        let ctx = ctx_with_caps(DeviceCapabilities::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let sink = ProgressSink::new(Arc::new(move |v| seen_cb.lock().push(v)));

        let payload = NfcStage
            .execute(&ctx, StageInput::None, ExecutionMode::Simulated, &sink)
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec![15, 40, 65, 80, 90, 100]);
        match payload {
            StagePayload::Nfc(identity) => {
                assert_eq!(identity.rut, "12.345.678-9");
                assert_eq!(identity.nombres, "CARLOS ANDRÉS");
                assert_eq!(identity.numero_serie, "ACF23580917");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn real_mode_without_nfc_support_is_device_unavailable() {
        let ctx = ctx_with_caps(DeviceCapabilities::default());
        let err = NfcStage
            .execute(&ctx, StageInput::None, ExecutionMode::Real, &ProgressSink::discard())
            .await
            .unwrap_err();
        assert_eq!(err, VerificationError::DeviceUnavailable);
        // The handle acquired before the capability check must be released.
        assert!(!ctx.captures.is_held(CaptureKind::Nfc));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_read_releases_the_handle() {
        let (source, token) = cancel_pair();
        let mut ctx = ctx_with_caps(DeviceCapabilities::default());
        ctx.cancel = token;

        let captures = Arc::clone(&ctx.captures);
        let task = tokio::spawn(async move {
            NfcStage
                .execute(&ctx, StageInput::None, ExecutionMode::Simulated, &ProgressSink::discard())
                .await
        });
        tokio::task::yield_now().await;
        source.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err, VerificationError::Cancelled);
        assert!(!captures.is_held(CaptureKind::Nfc));
    }
}
