//! Network contracts of the verification backends
//!
//! All four stage services speak JSON over HTTPS. The trait keeps the
//! strategies testable; [`HttpBackend`] is the production implementation.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EndpointConfig;
use crate::error::{Result, VerificationError};
use crate::types::DocumentForensicsReport;

/// Audit event posted for every stage outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub verification_method: String,
    pub document_type: String,
    pub success: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacialMatchRequest {
    /// Captured frame, base64-encoded.
    pub face_image: String,
    pub document_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FacialMatchResponse {
    pub success: bool,
    pub message: Option<String>,
    /// Match score when the provider reports one alongside a failure.
    pub score: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRequest {
    pub document_id: String,
    pub document_type: String,
    pub full_name: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryResponse {
    pub success: bool,
    pub details: Option<serde_json::Value>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
struct ForensicsRequest {
    image: String,
}

#[derive(Debug, Deserialize)]
struct ForensicsResponse {
    results: DocumentForensicsReport,
}

/// Stage-facing view of the remote verification services.
#[async_trait]
pub trait VerificationBackend: Send + Sync {
    /// Runs forensic analysis over a document image blob.
    async fn analyze_document(&self, image: &[u8]) -> Result<DocumentForensicsReport>;

    /// Matches a live frame against the document holder.
    async fn verify_facial(&self, request: FacialMatchRequest) -> Result<FacialMatchResponse>;

    /// Checks document id and holder against the official registry.
    async fn validate_official_records(&self, request: RegistryRequest)
        -> Result<RegistryResponse>;

    /// Posts an audit event. Callers treat failures as non-fatal.
    async fn log_verification(&self, event: AuditEvent) -> Result<()>;
}

/// Production backend speaking to the identity endpoints over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    endpoints: EndpointConfig,
}

impl HttpBackend {
    pub fn new(endpoints: EndpointConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    pub fn with_client(client: reqwest::Client, endpoints: EndpointConfig) -> Self {
        Self { client, endpoints }
    }

    async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        debug!(%url, "posting verification request");
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(VerificationError::NetworkFailure(format!(
                "{url} returned {status}"
            )));
        }
        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl VerificationBackend for HttpBackend {
    async fn analyze_document(&self, image: &[u8]) -> Result<DocumentForensicsReport> {
        let request = ForensicsRequest {
            image: BASE64.encode(image),
        };
        let response: ForensicsResponse =
            self.post_json(&self.endpoints.forensics_url(), &request).await?;
        Ok(response.results)
    }

    async fn verify_facial(&self, request: FacialMatchRequest) -> Result<FacialMatchResponse> {
        self.post_json(&self.endpoints.facial_url(), &request).await
    }

    async fn validate_official_records(
        &self,
        request: RegistryRequest,
    ) -> Result<RegistryResponse> {
        self.post_json(&self.endpoints.registry_url(), &request).await
    }

    async fn log_verification(&self, event: AuditEvent) -> Result<()> {
        // The ack body is provider-defined; only transport success matters.
        let response = self
            .client
            .post(self.endpoints.audit_log_url())
            .json(&event)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(VerificationError::NetworkFailure(format!(
                "audit log returned {status}"
            )));
        }
        Ok(())
    }
}
