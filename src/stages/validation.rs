//! Validation stage: contrast against the official registry

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::backend::RegistryRequest;
use crate::error::{Result, VerificationError};
use crate::progress::ProgressSink;
use crate::stages::{ExecutionMode, StageContext, StageInput, StageStrategy};
use crate::types::{CedulaIdentity, OfficialValidationResult, StageKind, StagePayload};

const DOCUMENT_TYPE: &str = "CEDULA_CHILENA";

/// Canned registry verdict used by the simulated path.
pub fn simulated_validation() -> OfficialValidationResult {
    OfficialValidationResult {
        registry_valid: true,
        document_current: true,
        raw_details: Some(serde_json::json!({
            "registrosCivil": "VERIFICADO",
            "identidadValida": true,
            "documentoVigente": true,
        })),
    }
}

/// Validates the chip identity against the official registry. The document
/// number is checked locally first; an empty one never reaches the network.
#[derive(Debug, Default)]
pub struct ValidationStage;

impl ValidationStage {
    fn identity_from(input: StageInput) -> Result<CedulaIdentity> {
        match input {
            StageInput::Identity(identity) => Ok(identity),
            _ => Err(VerificationError::ValidationRejected {
                reason: "registry validation requires the chip identity".to_string(),
            }),
        }
    }
}

#[async_trait]
impl StageStrategy for ValidationStage {
    fn kind(&self) -> StageKind {
        StageKind::Validation
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

        if identity.numero_documento.trim().is_empty() {
            return Err(VerificationError::ValidationRejected {
                reason: "document number missing, cannot query official records".to_string(),
            });
        }

        let result = match mode {
            ExecutionMode::Simulated => {
                info!("validation stage running simulated registry check");
                ctx.simulate_timeline(progress, &[20, 40, 60, 80, 100]).await?;
                simulated_validation()
            }
            ExecutionMode::Real => {
                progress.report(20);
                let request = RegistryRequest {
                    document_id: identity.numero_documento.clone(),
                    document_type: DOCUMENT_TYPE.to_string(),
                    full_name: identity.full_name(),
                    session_id: ctx.session_id.clone(),
                };
                let response = ctx
                    .run_cancellable(ctx.backend.validate_official_records(request))
                    .await?;
                progress.report(70);

                if !response.success {
                    let reason = response
                        .message
                        .unwrap_or_else(|| "registry reported an invalid document".to_string());
                    warn!(%reason, "registry validation rejected");
                    return Err(VerificationError::ValidationRejected { reason });
                }

                progress.finish();
                OfficialValidationResult {
                    registry_valid: true,
                    document_current: true,
                    raw_details: response.details,
                }
            }
        };

        progress.finish();
        info!("validation stage complete");
        Ok(StagePayload::Validation(result))
    }
}
