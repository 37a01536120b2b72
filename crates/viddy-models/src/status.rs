//! Job status vocabulary shared by the realtime channel and status polling.
//!
//! Both transports deliver the same body:
//!
//! ```json
//! {"status": "processing" | "completed" | "error", "outputLocation": "...", "message": "..."}
//! ```
//!
//! Older backends answer polls with free text (`"Processing completed"`,
//! `"Error processing video"`, `"Processing video... This may take 4-10
//! minutes."`). Those strings are normalised here so the rest of the client
//! only ever sees [`RemoteStatus`].

use serde::{Deserialize, Serialize};

/// Job status as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    /// Job is still running
    Processing,
    /// Job finished; an output location should be present
    Completed,
    /// Job failed; a message should be present
    Error,
}

impl RemoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Processing => "processing",
            RemoteStatus::Completed => "completed",
            RemoteStatus::Error => "error",
        }
    }

    /// Check if this is a terminal status (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteStatus::Completed | RemoteStatus::Error)
    }

    /// Normalise a status string, including legacy free-text values.
    pub fn from_text(text: &str) -> Self {
        let lower = text.trim().to_ascii_lowercase();
        match lower.as_str() {
            "completed" | "complete" | "done" | "processing completed" => RemoteStatus::Completed,
            "error" | "failed" => RemoteStatus::Error,
            _ if lower.starts_with("error") => RemoteStatus::Error,
            _ => RemoteStatus::Processing,
        }
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw wire body before normalisation.
#[derive(Debug, Clone, Deserialize)]
struct RawStatusMessage {
    status: String,
    #[serde(default, alias = "outputLocation", alias = "output_url", alias = "output_path")]
    output_location: Option<String>,
    #[serde(default, alias = "detail")]
    message: Option<String>,
    #[serde(default, alias = "jobHandle", alias = "output_video_name")]
    job_handle: Option<String>,
}

/// A status report from either transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawStatusMessage")]
pub struct StatusMessage {
    /// Normalised status
    pub status: RemoteStatus,
    /// Where the result lives (terminal `completed` only)
    #[serde(rename = "outputLocation", skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
    /// Human-readable detail; for legacy bodies, the original status text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Job the report is about, when the transport multiplexes jobs
    #[serde(rename = "jobHandle", skip_serializing_if = "Option::is_none")]
    pub job_handle: Option<String>,
}

impl From<RawStatusMessage> for StatusMessage {
    fn from(raw: RawStatusMessage) -> Self {
        let status = RemoteStatus::from_text(&raw.status);
        let canonical = raw.status.trim().eq_ignore_ascii_case(status.as_str());
        // Legacy free-text statuses carry their meaning in the status string.
        let message = match raw.message {
            Some(m) => Some(m),
            None if !canonical && !raw.status.trim().is_empty() => Some(raw.status.trim().to_string()),
            None => None,
        };

        Self {
            status,
            output_location: raw.output_location.filter(|s| !s.is_empty()),
            message,
            job_handle: raw.job_handle.filter(|s| !s.is_empty()),
        }
    }
}

impl StatusMessage {
    pub fn processing() -> Self {
        Self {
            status: RemoteStatus::Processing,
            output_location: None,
            message: None,
            job_handle: None,
        }
    }

    pub fn completed(output_location: impl Into<String>) -> Self {
        Self {
            status: RemoteStatus::Completed,
            output_location: Some(output_location.into()),
            message: None,
            job_handle: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: RemoteStatus::Error,
            output_location: None,
            message: Some(message.into()),
            job_handle: None,
        }
    }

    /// Attach the job handle this report is about.
    pub fn for_job(mut self, handle: impl Into<String>) -> Self {
        self.job_handle = Some(handle.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Which transport produced a [`StatusSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Realtime,
    Poll,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Realtime => "realtime",
            SignalSource::Poll => "poll",
        }
    }
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transport-independent status observation fed to the job state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSignal {
    pub source: SignalSource,
    pub status: RemoteStatus,
    pub output_location: Option<String>,
    pub message: Option<String>,
}

impl StatusSignal {
    pub fn new(source: SignalSource, message: StatusMessage) -> Self {
        Self {
            source,
            status: message.status,
            output_location: message.output_location,
            message: message.message,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
