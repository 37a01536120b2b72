//! Session tests over the real HTTP and WebSocket clients.
//!
//! The HTTP API is a wiremock server and the realtime channel a local
//! tokio-tungstenite server, so these run without a backend.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use viddy_backend::{BackendClient, BackendConfig, WsTransport};
use viddy_models::{Job, JobPhase, UploadFile, UploadOptions};
use viddy_tracker::{MemoryStore, Session, TrackerConfig};

// =============================================================================
// Test Helpers
// =============================================================================

/// What the realtime server does after the handshake.
enum ServerScript {
    Push(String),
    Drop,
}

async fn realtime_server(script: ServerScript) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        match script {
            ServerScript::Push(text) => {
                ws.send(Message::Text(text)).await.unwrap();
                while let Some(Ok(_)) = ws.next().await {}
            }
            ServerScript::Drop => drop(ws),
        }
    });

    format!("ws://{}", addr)
}

async fn mount_submission(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/get_upload_url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "upload_url": format!("{}/storage/object", server.uri())
        })))
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/storage/object"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/start_processing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "processing",
            "output_video_name": "H1"
        })))
        .mount(server)
        .await;
}

fn session(server: &MockServer, realtime_url: String) -> Session {
    let config = BackendConfig {
        base_url: server.uri(),
        realtime_url,
        api_key: Some("test-key".to_string()),
        ..BackendConfig::default()
    };
    Session::new(
        Arc::new(BackendClient::new(config.clone()).unwrap()),
        Arc::new(WsTransport::new(config)),
        Arc::new(MemoryStore::new()),
        TrackerConfig::default(),
    )
}

async fn wait_for_terminal(session: &Session) -> Job {
    let mut rx = session.subscribe();
    let job = tokio::time::timeout(
        Duration::from_secs(10),
        rx.wait_for(|job| job.as_ref().is_some_and(Job::is_terminal)),
    )
    .await
    .expect("job did not finish")
    .unwrap();
    job.clone().unwrap()
}

fn clip() -> UploadFile {
    UploadFile::new("clip.mp4", vec![1u8; 2048])
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_push_completion_and_download_link() {
    let server = MockServer::start().await;
    mount_submission(&server).await;

    Mock::given(method("GET"))
        .and(path("/download_video/H1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "signed_url": "https://signed.test/out1.mp4"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/update_status/H1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
        .expect(0)
        .mount(&server)
        .await;

    let realtime_url = realtime_server(ServerScript::Push(
        json!({
            "status": "completed",
            "outputLocation": "videos/out1.mp4",
            "jobHandle": "H1"
        })
        .to_string(),
    ))
    .await;

    let session = session(&server, realtime_url);
    let job_id = assert_ok!(session.submit(clip(), UploadOptions::default()).await);

    let job = wait_for_terminal(&session).await;
    assert_eq!(job.id, job_id);
    assert_eq!(job.phase(), JobPhase::Completed);
    assert_eq!(job.output_location(), Some("videos/out1.mp4"));

    let url = assert_ok!(session.retrieve_result().await);
    assert_eq!(url, "https://signed.test/out1.mp4");
}

#[tokio::test]
async fn test_dropped_channel_falls_back_to_polling() {
    let server = MockServer::start().await;
    mount_submission(&server).await;

    Mock::given(method("GET"))
        .and(path("/update_status/H1"))
        .and(query_param("client_id", "persisted-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "error",
            "message": "codec unsupported"
        })))
        .mount(&server)
        .await;

    let realtime_url = realtime_server(ServerScript::Drop).await;
    let backend = BackendConfig {
        base_url: server.uri(),
        realtime_url,
        ..BackendConfig::default()
    };

    let store = Arc::new(MemoryStore::new());
    viddy_tracker::KeyValueStore::set(
        store.as_ref(),
        viddy_tracker::identity::CLIENT_ID_KEY,
        viddy_tracker::identity::StoredValue {
            value: "persisted-client".to_string(),
            expires_at: chrono::Utc::now() + chrono::Duration::days(1),
        },
    )
    .unwrap();

    let session = Session::new(
        Arc::new(BackendClient::new(backend.clone()).unwrap()),
        Arc::new(WsTransport::new(backend)),
        store,
        TrackerConfig::default(),
    );

    session.submit(clip(), UploadOptions::default()).await.unwrap();

    let job = wait_for_terminal(&session).await;
    assert_eq!(job.phase(), JobPhase::Error);
    assert_eq!(job.error_message(), Some("codec unsupported"));
    assert_eq!(job.client_id.as_str(), "persisted-client");
}

#[tokio::test]
async fn test_rejected_upload_target_fails_submission() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get_upload_url"))
        .respond_with(ResponseTemplate::new(413).set_body_string("quota exceeded"))
        .mount(&server)
        .await;

    let session = session(&server, "ws://127.0.0.1:9".to_string());
    let err = session
        .submit(clip(), UploadOptions::default())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("upload URL"));
    let job = session.current_job().unwrap();
    assert_eq!(job.phase(), JobPhase::Error);
    assert!(session.channel_phase().is_none());
}

/// Full round trip against a deployed backend.
#[tokio::test]
#[ignore = "requires a running backend (VIDDY_BACKEND_URL)"]
async fn test_live_backend_round_trip() {
    dotenvy::dotenv().ok();

    let backend = BackendConfig::from_env().expect("backend configuration");
    let session = Session::new(
        Arc::new(BackendClient::new(backend.clone()).unwrap()),
        Arc::new(WsTransport::new(backend)),
        Arc::new(MemoryStore::new()),
        TrackerConfig::from_env(),
    );

    let path = std::env::var("VIDDY_SAMPLE_VIDEO").expect("VIDDY_SAMPLE_VIDEO");
    let bytes = std::fs::read(&path).expect("sample video");
    let name = std::path::Path::new(&path)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();

    session
        .submit(UploadFile::new(name, bytes), UploadOptions::default())
        .await
        .expect("submission");

    let mut rx = session.subscribe();
    let job = rx
        .wait_for(|job| job.as_ref().is_some_and(Job::is_terminal))
        .await
        .unwrap()
        .clone()
        .unwrap();
    println!("Final state: {:?}", job.state);
}
