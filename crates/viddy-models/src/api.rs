//! Backend request and response bodies.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{ClientId, JobHandle, JobIdentifier};

/// `POST /get_upload_url` body.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UploadUrlRequest {
    pub filename: JobIdentifier,
    #[serde(rename = "contentType")]
    pub content_type: String,
}

/// Where and how to transfer the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UploadTarget {
    /// Signed URL
    #[serde(alias = "uploadUrl")]
    pub upload_url: String,

    /// HTTP method, `PUT` when absent
    #[serde(default = "default_upload_method")]
    pub method: String,

    /// Extra headers the storage provider requires
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_upload_method() -> String {
    "PUT".to_string()
}

impl UploadTarget {
    pub fn put(upload_url: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            method: default_upload_method(),
            headers: HashMap::new(),
        }
    }
}

/// `POST /start_processing` body.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StartProcessingRequest {
    pub filename: JobIdentifier,
    pub client_id: ClientId,
    pub add_bg_music: bool,
}

/// `POST /start_processing` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StartProcessingResponse {
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default, alias = "jobHandle", alias = "output_video_name")]
    pub job_handle: Option<String>,
}

impl StartProcessingResponse {
    /// Handle to track; the backend may omit it, in which case the job is
    /// tracked under its identifier.
    pub fn handle_or(&self, id: &JobIdentifier) -> JobHandle {
        match self.job_handle.as_deref().map(str::trim) {
            Some(handle) if !handle.is_empty() => JobHandle::from_string(handle),
            _ => JobHandle::from(id),
        }
    }
}

/// `GET /download_video/{handle}` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DownloadLinkResponse {
    #[serde(default, alias = "signedUrl", alias = "url")]
    pub signed_url: Option<String>,
}
