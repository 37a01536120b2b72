//! Job definitions and the job lifecycle.
//!
//! ```text
//! Idle ──▶ Uploading ──▶ AwaitingStatus ──▶ Completed
//!              │                │       └──▶ Error
//!              ├──▶ Error       └──────────▶ Cancelled
//!              └──▶ Cancelled
//! ```
//!
//! `Completed`, `Error` and `Cancelled` are terminal. The only mutation
//! allowed after `Completed` is annotating it with the outcome of result
//! retrieval; the phase never changes again.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{ClientId, JobHandle, JobIdentifier};

/// Phase of a job, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    #[default]
    Idle,
    Uploading,
    AwaitingStatus,
    Completed,
    Error,
    Cancelled,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Idle => "idle",
            JobPhase::Uploading => "uploading",
            JobPhase::AwaitingStatus => "awaiting_status",
            JobPhase::Completed => "completed",
            JobPhase::Error => "error",
            JobPhase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Error | JobPhase::Cancelled)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What made a job end in [`JobState::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Backend refused to hand out an upload target
    UploadTarget,
    /// Byte transfer to storage failed
    Transfer,
    /// Backend refused to start processing
    StartProcessing,
    /// Backend reported that processing failed
    JobProcessing,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UploadTarget => "upload_target",
            FailureKind::Transfer => "transfer",
            FailureKind::StartProcessing => "start_processing",
            FailureKind::JobProcessing => "job_processing",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job state with payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Uploading,
    AwaitingStatus {
        /// Latest non-terminal status text from the backend
        #[serde(skip_serializing_if = "Option::is_none")]
        status_text: Option<String>,
    },
    Completed {
        output_location: String,
        /// Fetchable URL, once result retrieval succeeded
        #[serde(skip_serializing_if = "Option::is_none")]
        download_url: Option<String>,
        /// Why result retrieval gave up; the job itself still succeeded
        #[serde(skip_serializing_if = "Option::is_none")]
        retrieval_error: Option<String>,
    },
    Error {
        kind: FailureKind,
        message: String,
    },
    Cancelled,
}

impl JobState {
    pub fn phase(&self) -> JobPhase {
        match self {
            JobState::Idle => JobPhase::Idle,
            JobState::Uploading => JobPhase::Uploading,
            JobState::AwaitingStatus { .. } => JobPhase::AwaitingStatus,
            JobState::Completed { .. } => JobPhase::Completed,
            JobState::Error { .. } => JobPhase::Error,
            JobState::Cancelled => JobPhase::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }
}

/// Rejected job state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job {job_id}: illegal transition {from} -> {to}")]
    Illegal {
        job_id: String,
        from: JobPhase,
        to: JobPhase,
    },
}

impl TransitionError {
    fn illegal(job: &Job, to: JobPhase) -> Self {
        Self::Illegal {
            job_id: job.id.to_string(),
            from: job.phase(),
            to,
        }
    }
}

/// One submitted file tracked end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Job identifier (also the storage object key)
    pub id: JobIdentifier,

    /// Client the job was submitted from
    pub client_id: ClientId,

    /// Submission timestamp
    pub submitted_at: DateTime<Utc>,

    /// Mix background music into the output
    #[serde(default)]
    pub add_bg_music: bool,

    /// Backend handle, known once processing started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<JobHandle>,

    /// Current state
    #[serde(flatten)]
    pub state: JobState,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job in `Idle`.
    pub fn new(
        id: JobIdentifier,
        client_id: ClientId,
        add_bg_music: bool,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            client_id,
            submitted_at,
            add_bg_music,
            handle: None,
            state: JobState::Idle,
            updated_at: submitted_at,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.state.phase()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Output location of a completed job.
    pub fn output_location(&self) -> Option<&str> {
        match &self.state {
            JobState::Completed { output_location, .. } => Some(output_location),
            _ => None,
        }
    }

    /// Failure message of a failed job.
    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            JobState::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn download_url(&self) -> Option<&str> {
        match &self.state {
            JobState::Completed { download_url, .. } => download_url.as_deref(),
            _ => None,
        }
    }

    pub fn retrieval_error(&self) -> Option<&str> {
        match &self.state {
            JobState::Completed {
                retrieval_error, ..
            } => retrieval_error.as_deref(),
            _ => None,
        }
    }

    /// Latest non-terminal status text.
    pub fn status_text(&self) -> Option<&str> {
        match &self.state {
            JobState::AwaitingStatus { status_text } => status_text.as_deref(),
            _ => None,
        }
    }

    /// `Idle -> Uploading`.
    pub fn begin_upload(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.phase() != JobPhase::Idle {
            return Err(TransitionError::illegal(self, JobPhase::Uploading));
        }
        self.set(JobState::Uploading, now);
        Ok(())
    }

    /// `Uploading -> AwaitingStatus`, recording the backend handle.
    pub fn await_status(
        &mut self,
        handle: JobHandle,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.phase() != JobPhase::Uploading {
            return Err(TransitionError::illegal(self, JobPhase::AwaitingStatus));
        }
        self.handle = Some(handle);
        self.set(JobState::AwaitingStatus { status_text: None }, now);
        Ok(())
    }

    /// Record a non-terminal status report.
    ///
    /// Returns `false` when the text did not change.
    pub fn update_status_text(
        &mut self,
        text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        let text = text.into();
        if self.phase() != JobPhase::AwaitingStatus {
            return Err(TransitionError::illegal(self, JobPhase::AwaitingStatus));
        }
        if self.status_text() == Some(text.as_str()) {
            return Ok(false);
        }
        self.set(
            JobState::AwaitingStatus {
                status_text: Some(text),
            },
            now,
        );
        Ok(true)
    }

    /// `AwaitingStatus -> Completed`.
    pub fn complete(
        &mut self,
        output_location: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.phase() != JobPhase::AwaitingStatus {
            return Err(TransitionError::illegal(self, JobPhase::Completed));
        }
        self.set(
            JobState::Completed {
                output_location: output_location.into(),
                download_url: None,
                retrieval_error: None,
            },
            now,
        );
        Ok(())
    }

    /// `Uploading | AwaitingStatus -> Error`.
    pub fn fail(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !matches!(self.phase(), JobPhase::Uploading | JobPhase::AwaitingStatus) {
            return Err(TransitionError::illegal(self, JobPhase::Error));
        }
        self.set(
            JobState::Error {
                kind,
                message: message.into(),
            },
            now,
        );
        Ok(())
    }

    /// `Uploading | AwaitingStatus -> Cancelled`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !matches!(self.phase(), JobPhase::Uploading | JobPhase::AwaitingStatus) {
            return Err(TransitionError::illegal(self, JobPhase::Cancelled));
        }
        self.set(JobState::Cancelled, now);
        Ok(())
    }

    /// Annotate a completed job with its fetchable URL.
    pub fn record_download(
        &mut self,
        url: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.phase() != JobPhase::Completed {
            return Err(TransitionError::illegal(self, JobPhase::Completed));
        }
        if let JobState::Completed {
            download_url,
            retrieval_error,
            ..
        } = &mut self.state
        {
            *download_url = Some(url.into());
            *retrieval_error = None;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Annotate a completed job with a retrieval failure.
    pub fn record_retrieval_failure(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.phase() != JobPhase::Completed {
            return Err(TransitionError::illegal(self, JobPhase::Completed));
        }
        if let JobState::Completed {
            retrieval_error, ..
        } = &mut self.state
        {
            *retrieval_error = Some(message.into());
        }
        self.updated_at = now;
        Ok(())
    }

    fn set(&mut self, state: JobState, now: DateTime<Utc>) {
        self.state = state;
        self.updated_at = now;
    }
}
