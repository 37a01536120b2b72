//! Result retrieval.
//!
//! Turns the output location of a completed job into a fetchable URL. A
//! location that already is an HTTP(S) URL is used as is; otherwise the
//! download link endpoint is asked a bounded number of times, a fixed
//! interval apart, until the link is provisioned.

use std::time::Duration;

use tracing::{debug, info_span, warn, Instrument};

use viddy_backend::JobBackend;
use viddy_models::JobHandle;

use crate::error::{TrackerError, TrackerResult};
use crate::metrics::record_retrieval;

/// How hard to try before giving up on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_secs(3),
        }
    }
}

fn is_fetchable(location: &str) -> bool {
    url::Url::parse(location)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Resolve a download URL for a completed job.
pub async fn resolve_download_url(
    backend: &dyn JobBackend,
    handle: &JobHandle,
    output_location: &str,
    policy: &RetrievalPolicy,
) -> TrackerResult<String> {
    if is_fetchable(output_location) {
        record_retrieval("direct");
        return Ok(output_location.to_string());
    }

    let attempts = policy.attempts.max(1);
    let mut last_reason = String::from("download link not available");

    for attempt in 0..attempts {
        let span = info_span!("download_link", handle = %handle, attempt = attempt + 1);

        match backend.download_link(handle).instrument(span).await {
            Ok(Some(url)) => {
                record_retrieval("ok");
                return Ok(url);
            }
            Ok(None) => {
                debug!(handle = %handle, attempt = attempt + 1, "Download link not ready");
            }
            Err(e) if e.is_retryable() => {
                warn!(handle = %handle, attempt = attempt + 1, "Download link request failed: {}", e);
                last_reason = e.to_string();
            }
            Err(e) => {
                record_retrieval("rejected");
                return Err(TrackerError::Retrieval(e.to_string()));
            }
        }

        if attempt + 1 < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    record_retrieval("exhausted");
    Err(TrackerError::Retrieval(format!(
        "{} after {} attempts",
        last_reason, attempts
    )))
}
