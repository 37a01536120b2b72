//! Tests for the backend HTTP client against a mock server.

use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use tokio_test::assert_ok;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use viddy_models::{
    ClientId, JobHandle, JobIdentifier, RemoteStatus, StartProcessingRequest, UploadTarget,
};

use crate::client::BackendClient;
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::transport::JobBackend;

// =============================================================================
// Test Helpers
// =============================================================================

const API_KEY: &str = "test-key";

fn client_for(server: &MockServer) -> BackendClient {
    let config = BackendConfig::for_base_url(&server.uri())
        .unwrap()
        .with_api_key(API_KEY);
    BackendClient::new(config).unwrap()
}

fn job_id() -> JobIdentifier {
    JobIdentifier::from_string("clip_0123456789_6f1c2d4e-0000-4000-8000-000000000000.mp4")
}

// =============================================================================
// Upload Target
// =============================================================================

#[tokio::test]
async fn test_request_upload_target_sends_bearer_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get_upload_url"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_json(json!({
            "filename": job_id().as_str(),
            "contentType": "video/mp4"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "upload_url": format!("{}/bucket/object?sig=abc", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let target = client
        .request_upload_target(&job_id(), "video/mp4")
        .await
        .unwrap();

    assert!(target.upload_url.ends_with("/bucket/object?sig=abc"));
    assert_eq!(target.method, "PUT");
}

#[tokio::test]
async fn test_request_upload_target_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get_upload_url"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "Invalid API Key"})))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .request_upload_target(&job_id(), "video/mp4")
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Unauthorized(_)));
    assert!(err.to_string().contains("Invalid API Key"));
}

// =============================================================================
// Transfer
// =============================================================================

#[tokio::test]
async fn test_transfer_puts_bytes_with_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/bucket/object"))
        .and(header("content-type", "video/mp4"))
        .and(header("x-goog-meta-source", "viddyscribe"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut target = UploadTarget::put(format!("{}/bucket/object", server.uri()));
    target
        .headers
        .insert("x-goog-meta-source".to_string(), "viddyscribe".to_string());

    assert_ok!(
        client_for(&server)
            .transfer(&target, "video/mp4", Bytes::from_static(b"\x00\x00\x00\x18ftyp"))
            .await
    );

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].body, b"\x00\x00\x00\x18ftyp".to_vec());
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_transfer_failure_status() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_string("SignatureDoesNotMatch"))
        .mount(&server)
        .await;

    let target = UploadTarget::put(format!("{}/bucket/object", server.uri()));
    let err = client_for(&server)
        .transfer(&target, "video/mp4", Bytes::from_static(b"abc"))
        .await
        .unwrap_err();

    assert_eq!(err.http_status(), Some(403));
}

#[tokio::test]
async fn test_slow_transfer_outlives_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/bucket/object"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .expect(1)
        .mount(&server)
        .await;

    let config = BackendConfig {
        request_timeout: Duration::from_secs(1),
        ..BackendConfig::for_base_url(&server.uri()).unwrap()
    };
    let target = UploadTarget::put(format!("{}/bucket/object", server.uri()));

    assert_ok!(
        BackendClient::new(config)
            .unwrap()
            .transfer(&target, "video/mp4", Bytes::from(vec![0u8; 1024 * 1024]))
            .await
    );
}

#[tokio::test]
async fn test_transfer_bounded_by_upload_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let config = BackendConfig {
        upload_timeout: Duration::from_secs(1),
        ..BackendConfig::for_base_url(&server.uri()).unwrap()
    };
    let target = UploadTarget::put(format!("{}/bucket/object", server.uri()));

    let err = BackendClient::new(config)
        .unwrap()
        .transfer(&target, "video/mp4", Bytes::from_static(b"abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Network(ref e) if e.is_timeout()));
}

// =============================================================================
// Start Processing
// =============================================================================

#[tokio::test]
async fn test_start_processing_returns_handle() {
    let server = MockServer::start().await;
    let client_id = ClientId::from_string("c1");
    Mock::given(method("POST"))
        .and(path("/start_processing"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_json(json!({
            "filename": job_id().as_str(),
            "client_id": "c1",
            "add_bg_music": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "Processing started",
            "output_video_name": "H1"
        })))
        .mount(&server)
        .await;

    let request = StartProcessingRequest {
        filename: job_id(),
        client_id,
        add_bg_music: true,
    };
    let handle = client_for(&server).start_processing(&request).await.unwrap();
    assert_eq!(handle, JobHandle::from_string("H1"));
}

#[tokio::test]
async fn test_start_processing_empty_body_falls_back_to_identifier() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/start_processing"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let request = StartProcessingRequest {
        filename: job_id(),
        client_id: ClientId::from_string("c1"),
        add_bg_music: false,
    };
    let handle = client_for(&server).start_processing(&request).await.unwrap();
    assert_eq!(handle.as_str(), job_id().as_str());
}

#[tokio::test]
async fn test_start_processing_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/start_processing"))
        .respond_with(ResponseTemplate::new(500).set_body_string("queue unavailable"))
        .mount(&server)
        .await;

    let request = StartProcessingRequest {
        filename: job_id(),
        client_id: ClientId::from_string("c1"),
        add_bg_music: false,
    };
    let err = client_for(&server)
        .start_processing(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::ServerError(500, _)));
}

// =============================================================================
// Status Polling
// =============================================================================

#[tokio::test]
async fn test_poll_status_sends_client_id_and_normalises() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/update_status/H1"))
        .and(query_param("client_id", "c1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "Error processing video"})),
        )
        .mount(&server)
        .await;

    let status = client_for(&server)
        .poll_status(&ClientId::from_string("c1"), &JobHandle::from_string("H1"))
        .await
        .unwrap();

    assert_eq!(status.status, RemoteStatus::Error);
    assert_eq!(status.message.as_deref(), Some("Error processing video"));
}

#[tokio::test]
async fn test_poll_status_canonical_completed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/update_status/H1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "outputLocation": "videos/out1.mp4"
        })))
        .mount(&server)
        .await;

    let status = client_for(&server)
        .poll_status(&ClientId::from_string("c1"), &JobHandle::from_string("H1"))
        .await
        .unwrap();

    assert_eq!(status.status, RemoteStatus::Completed);
    assert_eq!(status.output_location.as_deref(), Some("videos/out1.mp4"));
}

// =============================================================================
// Download Link
// =============================================================================

#[tokio::test]
async fn test_download_link_not_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download_video/H1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "File not found"})))
        .mount(&server)
        .await;

    let link = client_for(&server)
        .download_link(&JobHandle::from_string("H1"))
        .await
        .unwrap();
    assert_eq!(link, None);
}

#[tokio::test]
async fn test_download_link_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download_video/H1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "signed_url": "https://storage.example/out1.mp4?sig=1"
        })))
        .mount(&server)
        .await;

    let link = client_for(&server)
        .download_link(&JobHandle::from_string("H1"))
        .await
        .unwrap();
    assert_eq!(link.as_deref(), Some("https://storage.example/out1.mp4?sig=1"));
}
