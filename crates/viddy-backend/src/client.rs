//! Backend HTTP client.
//!
//! Wire endpoints:
//! - `POST /get_upload_url` -> signed upload target
//! - `PUT <upload_url>` -> direct-to-storage transfer
//! - `POST /start_processing` -> job handle
//! - `GET /update_status/{handle}?client_id=` -> job status
//! - `GET /download_video/{handle}` -> signed download link (404 until ready)

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use tracing::{debug, info_span, Instrument};

use viddy_models::{
    ClientId, DownloadLinkResponse, JobHandle, JobIdentifier, StartProcessingRequest,
    StartProcessingResponse, StatusMessage, UploadTarget, UploadUrlRequest,
};

use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};
use crate::metrics::record_request;
use crate::transport::JobBackend;

/// Backend HTTP client.
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    config: BackendConfig,
}

impl BackendClient {
    /// Create a new backend client.
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("viddy-backend/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(BackendError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> BackendResult<Self> {
        Self::new(BackendConfig::from_env()?)
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Execute a request with a tracing span and metrics.
    async fn execute_request<T, F>(&self, operation: &str, key: &str, fut: F) -> BackendResult<T>
    where
        F: std::future::Future<Output = BackendResult<T>>,
    {
        let span = info_span!("backend_request", operation = %operation, key = %key);

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn handle_error_response(url: &str, response: reqwest::Response) -> BackendError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        BackendError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}

#[async_trait]
impl JobBackend for BackendClient {
    async fn request_upload_target(
        &self,
        id: &JobIdentifier,
        content_type: &str,
    ) -> BackendResult<UploadTarget> {
        let url = self.endpoint("get_upload_url");
        let body = UploadUrlRequest {
            filename: id.clone(),
            content_type: content_type.to_string(),
        };

        self.execute_request("get_upload_url", id.as_str(), async {
            let response = self
                .authorized(self.http.post(&url))
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(Self::handle_error_response(&url, response).await);
            }

            let target: UploadTarget = response.json().await?;
            if target.upload_url.trim().is_empty() {
                return Err(BackendError::invalid_response("empty upload_url"));
            }
            debug!(method = %target.method, "Received upload target");
            Ok(target)
        })
        .await
    }

    async fn transfer(
        &self,
        target: &UploadTarget,
        content_type: &str,
        bytes: Bytes,
    ) -> BackendResult<()> {
        let method = Method::from_bytes(target.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| {
                BackendError::invalid_response(format!("bad upload method {:?}", target.method))
            })?;
        let size = bytes.len();

        self.execute_request("transfer", "storage", async {
            let mut request = self
                .http
                .request(method, &target.upload_url)
                .timeout(self.config.upload_timeout)
                .header(reqwest::header::CONTENT_TYPE, content_type);
            for (name, value) in &target.headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = request.body(bytes).send().await?;
            if !response.status().is_success() {
                return Err(Self::handle_error_response("storage transfer", response).await);
            }

            debug!(bytes = size, "Transfer complete");
            Ok(())
        })
        .await
    }

    async fn start_processing(
        &self,
        request: &StartProcessingRequest,
    ) -> BackendResult<JobHandle> {
        let url = self.endpoint("start_processing");

        self.execute_request("start_processing", request.filename.as_str(), async {
            let response = self
                .authorized(self.http.post(&url))
                .json(request)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(Self::handle_error_response(&url, response).await);
            }

            // Some deployments answer with an empty body.
            let text = response.text().await?;
            let body: StartProcessingResponse = if text.trim().is_empty() {
                StartProcessingResponse::default()
            } else {
                serde_json::from_str(&text)?
            };
            Ok(body.handle_or(&request.filename))
        })
        .await
    }

    async fn poll_status(
        &self,
        client_id: &ClientId,
        handle: &JobHandle,
    ) -> BackendResult<StatusMessage> {
        let url = self.endpoint(&format!(
            "update_status/{}",
            urlencoding::encode(handle.as_str())
        ));

        self.execute_request("update_status", handle.as_str(), async {
            let response = self
                .authorized(self.http.get(&url))
                .query(&[("client_id", client_id.as_str())])
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(Self::handle_error_response(&url, response).await);
            }

            Ok(response.json::<StatusMessage>().await?)
        })
        .await
    }

    async fn download_link(&self, handle: &JobHandle) -> BackendResult<Option<String>> {
        let url = self.endpoint(&format!(
            "download_video/{}",
            urlencoding::encode(handle.as_str())
        ));

        self.execute_request("download_video", handle.as_str(), async {
            let response = self.authorized(self.http.get(&url)).send().await?;

            match response.status() {
                StatusCode::NOT_FOUND => Ok(None),
                status if status.is_success() => {
                    let body: DownloadLinkResponse = response.json().await?;
                    Ok(body.signed_url.filter(|u| !u.trim().is_empty()))
                }
                _ => Err(Self::handle_error_response(&url, response).await),
            }
        })
        .await
    }
}
