//! Document forensics stage: authenticity analysis of the captured ID image

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::error::{Result, VerificationError};
use crate::progress::ProgressSink;
use crate::stages::{ExecutionMode, StageContext, StageInput, StageStrategy};
use crate::types::{DocumentForensicsReport, StageKind, StagePayload};

/// Canned forensic verdict used by the simulated path.
pub fn simulated_report() -> DocumentForensicsReport {
    DocumentForensicsReport {
        document_detected: true,
        mrz_detected: true,
        mrz_confidence: 85,
        uv_features_detected: true,
        alterations_detected: false,
        alterations_confidence: 5,
        overall_authenticity: 92,
    }
}

/// Runs forensic analysis over the uploaded document image.
///
/// A low authenticity score never fails this stage; the state machine turns
/// it into a session-level warning flag against the configured threshold.
#[derive(Debug, Default)]
pub struct DocumentStage;

#[async_trait]
impl StageStrategy for DocumentStage {
    fn kind(&self) -> StageKind {
        StageKind::Document
    }

    #[instrument(skip(self, ctx, input, progress), fields(session = %ctx.session_id))]
    async fn execute(
        &self,
        ctx: &StageContext,
        input: StageInput,
        mode: ExecutionMode,
        progress: &ProgressSink,
    ) -> Result<StagePayload> {
        ctx.cancel.check()?;

        let report = match mode {
            ExecutionMode::Simulated => {
                info!("document stage running simulated forensics");
                ctx.simulate_timeline(progress, &[10, 30, 60, 85, 100]).await?;
                simulated_report()
            }
            ExecutionMode::Real => {
                let image = match input {
                    StageInput::Image(bytes) if !bytes.is_empty() => bytes,
                    _ => {
                        return Err(VerificationError::ValidationRejected {
                            reason: "document image required for forensic analysis".to_string(),
                        })
                    }
                };
                progress.report(10);
                let report = ctx
                    .run_cancellable(ctx.backend.analyze_document(&image))
                    .await?;
                progress.report(90);
                if report.alterations_detected {
                    warn!(
                        confidence = report.alterations_confidence,
                        "forensics reported possible alterations"
                    );
                }
                progress.finish();
                report
            }
        };

        info!(authenticity = report.overall_authenticity, "document stage complete");
        Ok(StagePayload::Document(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backend::{
        AuditEvent, FacialMatchRequest, FacialMatchResponse, RegistryRequest, RegistryResponse,
        VerificationBackend,
    };
    use crate::cancel::cancel_pair;
    use crate::capture::{
        CameraConstraints, CaptureResourceManager, DeviceCapabilities, HeadlessPlatform,
    };
    use crate::config::SessionConfig;

    struct UnreachableBackend;

    #[async_trait]
    impl VerificationBackend for UnreachableBackend {
        async fn analyze_document(&self, _image: &[u8]) -> Result<DocumentForensicsReport> {
            panic!("simulated stage must not touch the backend");
        }
        async fn verify_facial(&self, _r: FacialMatchRequest) -> Result<FacialMatchResponse> {
            panic!("simulated stage must not touch the backend");
        }
        async fn validate_official_records(&self, _r: RegistryRequest) -> Result<RegistryResponse> {
            panic!("simulated stage must not touch the backend");
        }
        async fn log_verification(&self, _e: AuditEvent) -> Result<()> {
            Ok(())
        }
    }

    fn test_ctx() -> StageContext {
        let config = Arc::new(SessionConfig::default());
        let (_source, token) = cancel_pair();
        StageContext::new(
            "test-session".to_string(),
            config,
            Arc::new(UnreachableBackend),
            Arc::new(CaptureResourceManager::new(
                Arc::new(HeadlessPlatform),
                DeviceCapabilities::default(),
                CameraConstraints::default(),
            )),
            token,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_run_is_deterministic() {
        let ctx = test_ctx();
        let sink = ProgressSink::discard();

        let first = DocumentStage
            .execute(&ctx, StageInput::None, ExecutionMode::Simulated, &sink)
            .await
            .unwrap();
        let second = DocumentStage
            .execute(&ctx, StageInput::None, ExecutionMode::Simulated, &ProgressSink::discard())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(sink.last(), 100);
        match first {
            StagePayload::Document(report) => {
                assert_eq!(report.overall_authenticity, 92);
                assert!(report.mrz_detected);
                assert!(!report.alterations_detected);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn real_mode_requires_an_image() {
        let ctx = test_ctx();
        let err = DocumentStage
            .execute(&ctx, StageInput::None, ExecutionMode::Real, &ProgressSink::discard())
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::ValidationRejected { .. }));
    }
}
