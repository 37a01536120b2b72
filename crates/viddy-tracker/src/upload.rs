//! Upload orchestration.
//!
//! Runs the three submission steps in order: request an upload target,
//! transfer the bytes, start processing. The job must still be the current
//! one and still `Uploading` before each step; a cancel in between stops the
//! sequence. The first failing step fails the job with the matching
//! [`FailureKind`].

use std::time::Instant;

use bytes::Bytes;

use viddy_backend::{BackendError, JobBackend};
use viddy_models::{
    ClientId, FailureKind, JobHandle, JobIdentifier, JobPhase, StartProcessingRequest,
    UploadFile, UploadOptions,
};

use crate::error::{TrackerError, TrackerResult};
use crate::logging::{Stage, TrackingLogger};
use crate::metrics::record_submission;
use crate::state::JobStateMachine;

/// Submit `file` for `job_id`, leaving the job in `AwaitingStatus` on success.
///
/// The job must already be `Uploading`.
pub async fn run_upload(
    backend: &dyn JobBackend,
    state: &JobStateMachine,
    job_id: &JobIdentifier,
    client_id: &ClientId,
    file: UploadFile,
    options: UploadOptions,
) -> TrackerResult<JobHandle> {
    let logger = TrackingLogger::new(job_id, Stage::Upload);
    let started = Instant::now();
    let size = file.size();
    logger.log_submitted(&file.name, size);

    ensure_uploading(state, job_id)?;
    let target = backend
        .request_upload_target(job_id, &file.content_type)
        .await
        .map_err(|e| fail_step(state, job_id, &logger, FailureKind::UploadTarget, e))?;

    ensure_uploading(state, job_id)?;
    let content_type = file.content_type;
    backend
        .transfer(&target, &content_type, Bytes::from(file.bytes))
        .await
        .map_err(|e| fail_step(state, job_id, &logger, FailureKind::Transfer, e))?;
    logger.log_transferred(size, started.elapsed());

    ensure_uploading(state, job_id)?;
    let request = StartProcessingRequest {
        filename: job_id.clone(),
        client_id: client_id.clone(),
        add_bg_music: options.add_bg_music,
    };
    let handle = backend
        .start_processing(&request)
        .await
        .map_err(|e| fail_step(state, job_id, &logger, FailureKind::StartProcessing, e))?;

    if !state.await_status(job_id, handle.clone()) {
        logger
            .clone()
            .with_handle(&handle)
            .log_superseded("Job no longer uploading when processing started");
        record_submission("cancelled");
        return Err(TrackerError::Cancelled);
    }

    record_submission("ok");
    logger.log_accepted(&handle, started.elapsed());
    Ok(handle)
}

fn ensure_uploading(state: &JobStateMachine, job_id: &JobIdentifier) -> TrackerResult<()> {
    if state.phase_of(job_id) == Some(JobPhase::Uploading) {
        Ok(())
    } else {
        record_submission("cancelled");
        Err(TrackerError::Cancelled)
    }
}

fn fail_step(
    state: &JobStateMachine,
    job_id: &JobIdentifier,
    logger: &TrackingLogger,
    kind: FailureKind,
    error: BackendError,
) -> TrackerError {
    let message = error.to_string();
    if !state.fail(job_id, kind, &message) {
        // Cancelled while the step was in flight.
        record_submission("cancelled");
        return TrackerError::Cancelled;
    }
    logger.log_step_failed(kind, &message);
    record_submission(kind.as_str());
    TrackerError::submission(kind, message)
}
