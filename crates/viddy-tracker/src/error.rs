//! Tracker error types.

use thiserror::Error;

use viddy_models::{FailureKind, JobPhase, UploadError};

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Could not get an upload URL: {0}")]
    UploadTarget(String),

    #[error("Upload failed: {0}")]
    Transfer(String),

    #[error("Could not start processing: {0}")]
    StartProcessing(String),

    #[error("Status channel error: {0}")]
    Channel(String),

    #[error("Processing failed: {0}")]
    JobProcessing(String),

    #[error("Could not retrieve the result: {0}")]
    Retrieval(String),

    #[error("Invalid file: {0}")]
    InvalidFile(#[from] UploadError),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("No completed job (current state: {0})")]
    NotCompleted(String),

    #[error("Client store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn not_completed(phase: Option<JobPhase>) -> Self {
        Self::NotCompleted(phase.map_or("none", |p| p.as_str()).to_string())
    }

    /// Build the error for a failed submission step.
    pub fn submission(kind: FailureKind, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match kind {
            FailureKind::UploadTarget => Self::UploadTarget(msg),
            FailureKind::Transfer => Self::Transfer(msg),
            FailureKind::StartProcessing => Self::StartProcessing(msg),
            FailureKind::JobProcessing => Self::JobProcessing(msg),
        }
    }

    /// The job failure this error corresponds to, if any.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TrackerError::UploadTarget(_) => Some(FailureKind::UploadTarget),
            TrackerError::Transfer(_) => Some(FailureKind::Transfer),
            TrackerError::StartProcessing(_) => Some(FailureKind::StartProcessing),
            TrackerError::JobProcessing(_) => Some(FailureKind::JobProcessing),
            _ => None,
        }
    }

    /// Retrieval failures mean the job itself succeeded.
    pub fn is_retrieval(&self) -> bool {
        matches!(self, TrackerError::Retrieval(_))
    }
}
