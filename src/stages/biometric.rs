//! Biometric stage: live facial capture and match against the document

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{info, instrument, warn};

use crate::backend::FacialMatchRequest;
use crate::capture::CaptureKind;
use crate::error::{Result, VerificationError};
use crate::progress::ProgressSink;
use crate::stages::{ExecutionMode, StageContext, StageInput, StageStrategy};
use crate::types::{BiometricMatchResult, CedulaIdentity, StageKind, StagePayload};

/// Canned match produced by the simulated path.
pub fn simulated_match() -> BiometricMatchResult {
    BiometricMatchResult {
        match_score: 97,
        liveness_passed: true,
        reference_image: None,
        captured_image: None,
    }
}

/// Captures one frame from the front camera and corroborates it against the
/// identity read off the chip.
#[derive(Debug, Default)]
pub struct BiometricStage;

impl BiometricStage {
    fn identity_from(input: StageInput) -> Result<CedulaIdentity> {
        match input {
            StageInput::Identity(identity) => Ok(identity),
            _ => Err(VerificationError::ValidationRejected {
                reason: "biometric stage requires the chip identity".to_string(),
            }),
        }
    }
}

#[async_trait]
impl StageStrategy for BiometricStage {
    fn kind(&self) -> StageKind {
        StageKind::Biometric
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
        let identity = Self::identity_from(input)?;

        let handle = ctx.captures.acquire(CaptureKind::Camera).await?;

        let result = match mode {
            ExecutionMode::Simulated => {
                info!("biometric stage running simulated match");
                ctx.simulate_timeline(progress, &[20, 40, 60, 80, 100]).await?;
                simulated_match()
            }
            ExecutionMode::Real => {
                if !ctx.captures.capabilities().camera {
                    return Err(VerificationError::DeviceUnavailable);
                }
                let camera = handle
                    .camera()
                    .ok_or(VerificationError::DeviceUnavailable)?
                    .clone();

                progress.report(20);
                ctx.run_cancellable(camera.wait_ready()).await?;

                // Give the user a moment to frame before the still is taken.
                ctx.pause(ctx.config.framing_delay).await?;
                progress.report(40);

                let frame = ctx.run_cancellable(camera.capture_frame()).await?;
                let face_image = BASE64.encode(&frame);
                progress.report(60);

                let request = FacialMatchRequest {
                    face_image: face_image.clone(),
                    document_id: identity.numero_documento.clone(),
                    session_id: ctx.session_id.clone(),
                };
                let response = ctx
                    .run_cancellable(ctx.backend.verify_facial(request))
                    .await?;
                progress.report(80);

                if !response.success {
                    let score = response.score.unwrap_or(0);
                    warn!(score, message = ?response.message, "facial match rejected");
                    return Err(VerificationError::LowConfidence { score });
                }

                progress.finish();
                BiometricMatchResult {
                    match_score: response.score.unwrap_or(100),
                    liveness_passed: true,
                    reference_image: None,
                    captured_image: Some(face_image),
                }
            }
        };

        progress.finish();
        drop(handle);
        info!(score = result.match_score, "biometric stage complete");
        Ok(StagePayload::Biometric(result))
    }
}
