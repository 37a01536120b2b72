//! Shared data models for the ViddyScribe client.
//!
//! This crate provides Serde-serializable types for:
//! - Client identities and job identifiers
//! - Jobs and the job state machine vocabulary
//! - Backend request/response bodies
//! - Job status messages and realtime channel frames
//! - Upload validation

pub mod api;
pub mod client_id;
pub mod job;
pub mod job_id;
pub mod status;
pub mod upload;
pub mod ws;

// Re-export common types
pub use api::{
    DownloadLinkResponse, StartProcessingRequest, StartProcessingResponse, UploadTarget,
    UploadUrlRequest,
};
pub use client_id::ClientId;
pub use job::{FailureKind, Job, JobPhase, JobState, TransitionError};
pub use job_id::{JobHandle, JobIdentifier, ParsedJobName};
pub use status::{RemoteStatus, SignalSource, StatusMessage, StatusSignal};
pub use upload::{UploadError, UploadFile, UploadOptions, MAX_UPLOAD_BYTES};
pub use ws::{RealtimeEvent, RealtimeFrame, CLOSE_NORMAL};
