//! Structured tracking logs.
//!
//! Lines carry the job identifier and stage, and once the backend has
//! accepted the job, its handle. Status lines also carry the signal source,
//! so a log search shows whether a job finished over the realtime channel or
//! through polling.

use std::fmt;
use std::time::Duration;

use tracing::{error, info, warn, Span};

use viddy_models::{FailureKind, JobHandle, JobIdentifier, RemoteStatus, StatusSignal};

/// Part of a submission's life a logger reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Upload,
    Tracking,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Tracking => "tracking",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logger bound to one job and one stage.
#[derive(Debug, Clone)]
pub struct TrackingLogger {
    job_id: String,
    stage: Stage,
    handle: Option<String>,
}

impl TrackingLogger {
    pub fn new(job_id: &JobIdentifier, stage: Stage) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
            handle: None,
        }
    }

    /// Attach the backend handle the job is tracked under.
    pub fn with_handle(mut self, handle: &JobHandle) -> Self {
        self.handle = Some(handle.to_string());
        self
    }

    fn handle_field(&self) -> &str {
        self.handle.as_deref().unwrap_or("-")
    }

    pub fn log_submitted(&self, file_name: &str, bytes: u64) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            file = %file_name,
            bytes,
            "Submitting video"
        );
    }

    pub fn log_transferred(&self, bytes: u64, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Video transferred to storage"
        );
    }

    pub fn log_accepted(&self, handle: &JobHandle, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            handle = %handle,
            elapsed_ms = elapsed.as_millis() as u64,
            "Backend accepted job"
        );
    }

    pub fn log_step_failed(&self, kind: FailureKind, message: &str) {
        error!(
            job_id = %self.job_id,
            stage = %self.stage,
            step = %kind,
            "Submission failed: {}", message
        );
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            handle = %self.handle_field(),
            "{}", message
        );
    }

    pub fn log_superseded(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            stage = %self.stage,
            handle = %self.handle_field(),
            "{}", message
        );
    }

    pub fn log_status_text(&self, text: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            handle = %self.handle_field(),
            "Status: {}", text
        );
    }

    /// Terminal status that ended tracking.
    pub fn log_terminal(&self, signal: &StatusSignal, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        if signal.status == RemoteStatus::Error {
            warn!(
                job_id = %self.job_id,
                handle = %self.handle_field(),
                source = %signal.source,
                status = %signal.status,
                elapsed_ms,
                "Job failed: {}", signal.message.as_deref().unwrap_or("no message")
            );
        } else {
            info!(
                job_id = %self.job_id,
                handle = %self.handle_field(),
                source = %signal.source,
                status = %signal.status,
                location = signal.output_location.as_deref().unwrap_or("-"),
                elapsed_ms,
                "Job finished"
            );
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    /// Span to run the stage in.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            stage = %self.stage,
            handle = %self.handle_field()
        )
    }
}
