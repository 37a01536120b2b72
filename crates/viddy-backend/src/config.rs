//! Backend endpoint configuration.

use std::time::Duration;

use url::Url;

use crate::error::{BackendError, BackendResult};

const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 30 * 60;

/// Where the backend lives and how to reach it.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// HTTP API base URL
    pub base_url: String,
    /// Realtime channel base URL (`ws://` or `wss://`)
    pub realtime_url: String,
    /// Bearer credential attached to API calls
    pub api_key: Option<String>,
    /// Per-request timeout for API calls
    pub request_timeout: Duration,
    /// Timeout for the storage transfer, which carries the whole video
    pub upload_timeout: Duration,
    /// TCP/TLS connect timeout, also bounds the realtime handshake
    pub connect_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            realtime_url: "ws://localhost:8080".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl BackendConfig {
    /// Create config from environment variables.
    pub fn from_env() -> BackendResult<Self> {
        let base_url = std::env::var("VIDDY_BACKEND_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let base_url = normalize(&base_url, &["http", "https"])?;

        let realtime_url = match std::env::var("VIDDY_REALTIME_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
        {
            Some(url) => normalize(&url, &["ws", "wss"])?,
            None => realtime_from_base(&base_url)?,
        };

        let api_key = std::env::var("VIDDYSCRIBE_API_KEY")
            .ok()
            .filter(|s| !s.is_empty());

        let request_timeout_secs: u64 = std::env::var("VIDDY_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let upload_timeout_secs: u64 = std::env::var("VIDDY_UPLOAD_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS);

        let connect_timeout_secs: u64 = std::env::var("VIDDY_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            base_url,
            realtime_url,
            api_key,
            request_timeout: Duration::from_secs(request_timeout_secs),
            upload_timeout: Duration::from_secs(upload_timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        })
    }

    /// Point both endpoints at one server (used by tests).
    pub fn for_base_url(base_url: &str) -> BackendResult<Self> {
        let base_url = normalize(base_url, &["http", "https"])?;
        let realtime_url = realtime_from_base(&base_url)?;
        Ok(Self {
            base_url,
            realtime_url,
            ..Self::default()
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

fn normalize(raw: &str, schemes: &[&str]) -> BackendResult<String> {
    let url = Url::parse(raw.trim())
        .map_err(|e| BackendError::config(format!("invalid URL {:?}: {}", raw, e)))?;
    if !schemes.contains(&url.scheme()) {
        return Err(BackendError::config(format!(
            "URL {:?} must use one of {:?}",
            raw, schemes
        )));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// `http(s)://host/path` -> `ws(s)://host/path`.
fn realtime_from_base(base_url: &str) -> BackendResult<String> {
    let mut url = Url::parse(base_url)
        .map_err(|e| BackendError::config(format!("invalid URL {:?}: {}", base_url, e)))?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| BackendError::config(format!("cannot derive realtime URL from {}", base_url)))?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}
