//! Wire-level contract tests for [`HttpBackend`] against a mock server.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use mockito::{Matcher, Server};
use serde_json::json;

use verid::{
    AuditEvent, EndpointConfig, FacialMatchRequest, HttpBackend, RegistryRequest,
    VerificationBackend, VerificationError,
};

fn endpoints_for(server: &Server) -> EndpointConfig {
    EndpointConfig {
        base_url: server.url(),
        ..EndpointConfig::default()
    }
}

#[tokio::test]
async fn analyze_document_posts_base64_and_unwraps_results() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/identity/analyze-document")
        .match_body(Matcher::Json(json!({
            "image": BASE64.encode([1u8, 2, 3]),
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "results": {
                    "document_detected": true,
                    "mrz_detected": true,
                    "mrz_confidence": 85,
                    "uv_features_detected": true,
                    "alterations_detected": false,
                    "alterations_confidence": 5,
                    "overall_authenticity": 92
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let backend = HttpBackend::new(endpoints_for(&server));
    let report = backend.analyze_document(&[1, 2, 3]).await.unwrap();
    assert_eq!(report.overall_authenticity, 92);
    assert!(report.mrz_detected);
    mock.assert_async().await;
}

#[tokio::test]
async fn verify_facial_failure_carries_provider_score() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/identity/verify-facial")
        .match_body(Matcher::PartialJson(json!({
            "documentId": "12345678",
            "sessionId": "s-1",
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "success": false,
                "message": "match below threshold",
                "score": 41
            })
            .to_string(),
        )
        .create_async()
        .await;

    let backend = HttpBackend::new(endpoints_for(&server));
    let response = backend
        .verify_facial(FacialMatchRequest {
            face_image: BASE64.encode([0xFFu8, 0xD8]),
            document_id: "12345678".into(),
            session_id: "s-1".into(),
        })
        .await
        .unwrap();
    assert!(!response.success);
    assert_eq!(response.score, Some(41));
    mock.assert_async().await;
}

#[tokio::test]
async fn validate_official_records_returns_raw_details() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/identity/validate-official-records")
        .match_body(Matcher::PartialJson(json!({
            "documentId": "12345678",
            "documentType": "CEDULA_CHILENA",
            "fullName": "CARLOS ANDRÉS GÓMEZ SOTO",
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "success": true,
                "details": {
                    "registrosCivil": "VERIFICADO",
                    "identidadValida": true,
                    "documentoVigente": true
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let backend = HttpBackend::new(endpoints_for(&server));
    let response = backend
        .validate_official_records(RegistryRequest {
            document_id: "12345678".into(),
            document_type: "CEDULA_CHILENA".into(),
            full_name: "CARLOS ANDRÉS GÓMEZ SOTO".into(),
            session_id: "s-1".into(),
        })
        .await
        .unwrap();
    assert!(response.success);
    let details = response.details.unwrap();
    assert_eq!(details["registrosCivil"], "VERIFICADO");
    mock.assert_async().await;
}

#[tokio::test]
async fn log_verification_posts_camel_case_event() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/identity/verification-log")
        .match_body(Matcher::Json(json!({
            "verificationMethod": "nfc",
            "documentType": "CÉDULA DE IDENTIDAD",
            "success": true,
            "sessionId": "s-1",
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let backend = HttpBackend::new(endpoints_for(&server));
    backend
        .log_verification(AuditEvent {
            verification_method: "nfc".into(),
            document_type: "CÉDULA DE IDENTIDAD".into(),
            success: true,
            session_id: "s-1".into(),
        })
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn server_errors_map_to_network_failure() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/identity/analyze-document")
        .with_status(502)
        .create_async()
        .await;

    let backend = HttpBackend::new(endpoints_for(&server));
    let err = backend.analyze_document(&[1, 2, 3]).await.unwrap_err();
    match err {
        VerificationError::NetworkFailure(message) => assert!(message.contains("502")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_maps_to_network_failure() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/identity/verify-facial")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("not json")
        .create_async()
        .await;

    let backend = HttpBackend::new(endpoints_for(&server));
    let err = backend
        .verify_facial(FacialMatchRequest {
            face_image: String::new(),
            document_id: "12345678".into(),
            session_id: "s-1".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VerificationError::NetworkFailure(_)));
}
