//! Authoritative job state.
//!
//! Holds the single tracked [`Job`] behind a `watch` channel so observers see
//! every change. Every mutation names the job it is meant for; a mutation for
//! any job other than the current one, or one the job lifecycle forbids, is
//! dropped without notifying observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use viddy_models::{
    FailureKind, Job, JobHandle, JobIdentifier, JobPhase, RemoteStatus, StatusSignal,
    TransitionError,
};

#[derive(Debug)]
struct Shared {
    tx: watch::Sender<Option<Job>>,
    revision: AtomicU64,
}

/// Observable state of the current job.
#[derive(Debug, Clone)]
pub struct JobStateMachine {
    shared: Arc<Shared>,
}

impl Default for JobStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStateMachine {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                tx,
                revision: AtomicU64::new(0),
            }),
        }
    }

    /// Observe the current job.
    pub fn subscribe(&self) -> watch::Receiver<Option<Job>> {
        self.shared.tx.subscribe()
    }

    pub fn snapshot(&self) -> Option<Job> {
        self.shared.tx.borrow().clone()
    }

    pub fn active_id(&self) -> Option<JobIdentifier> {
        self.shared.tx.borrow().as_ref().map(|job| job.id.clone())
    }

    /// Whether `id` is the current job.
    pub fn is_current(&self, id: &JobIdentifier) -> bool {
        self.shared
            .tx
            .borrow()
            .as_ref()
            .is_some_and(|job| &job.id == id)
    }

    /// Phase of `id`, or `None` when it is not the current job.
    pub fn phase_of(&self, id: &JobIdentifier) -> Option<JobPhase> {
        self.shared
            .tx
            .borrow()
            .as_ref()
            .filter(|job| &job.id == id)
            .map(Job::phase)
    }

    /// Number of accepted mutations so far.
    pub fn revision(&self) -> u64 {
        self.shared.revision.load(Ordering::SeqCst)
    }

    /// Make `job` the current job, replacing any previous one.
    pub fn replace(&self, job: Job) {
        self.shared.tx.send_replace(Some(job));
        self.shared.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// `Idle -> Uploading`.
    pub fn begin_upload(&self, id: &JobIdentifier) -> bool {
        self.mutate(id, "begin_upload", |job, now| job.begin_upload(now).map(|_| true))
    }

    /// `Uploading -> AwaitingStatus`.
    pub fn await_status(&self, id: &JobIdentifier, handle: JobHandle) -> bool {
        self.mutate(id, "await_status", |job, now| {
            job.await_status(handle, now).map(|_| true)
        })
    }

    /// Record a non-terminal status text.
    pub fn update_status_text(&self, id: &JobIdentifier, text: &str) -> bool {
        self.mutate(id, "update_status_text", |job, now| {
            job.update_status_text(text, now)
        })
    }

    /// Apply the terminal signal chosen by the status channel.
    ///
    /// A completion without an output location is recorded under the job
    /// handle, which the download link endpoint accepts.
    pub fn apply_terminal(&self, id: &JobIdentifier, signal: &StatusSignal) -> bool {
        self.mutate(id, "apply_terminal", |job, now| match signal.status {
            RemoteStatus::Completed => {
                let location = signal
                    .output_location
                    .clone()
                    .or_else(|| job.handle.as_ref().map(|h| h.to_string()))
                    .unwrap_or_else(|| job.id.to_string());
                job.complete(location, now).map(|_| true)
            }
            RemoteStatus::Error => {
                let message = signal
                    .message
                    .clone()
                    .unwrap_or_else(|| "Processing failed".to_string());
                job.fail(FailureKind::JobProcessing, message, now)
                    .map(|_| true)
            }
            RemoteStatus::Processing => Ok(false),
        })
    }

    /// Fail the job.
    pub fn fail(&self, id: &JobIdentifier, kind: FailureKind, message: &str) -> bool {
        self.mutate(id, "fail", |job, now| job.fail(kind, message, now).map(|_| true))
    }

    /// Cancel the job.
    pub fn cancel(&self, id: &JobIdentifier) -> bool {
        self.mutate(id, "cancel", |job, now| job.cancel(now).map(|_| true))
    }

    pub fn record_download(&self, id: &JobIdentifier, url: &str) -> bool {
        self.mutate(id, "record_download", |job, now| {
            job.record_download(url, now).map(|_| true)
        })
    }

    pub fn record_retrieval_failure(&self, id: &JobIdentifier, message: &str) -> bool {
        self.mutate(id, "record_retrieval_failure", |job, now| {
            job.record_retrieval_failure(message, now).map(|_| true)
        })
    }

    fn mutate<F>(&self, id: &JobIdentifier, operation: &str, f: F) -> bool
    where
        F: FnOnce(&mut Job, DateTime<Utc>) -> Result<bool, TransitionError>,
    {
        let changed = self.shared.tx.send_if_modified(|slot| match slot {
            Some(job) if &job.id == id => match f(job, Utc::now()) {
                Ok(changed) => changed,
                Err(e) => {
                    debug!(operation, "Rejected: {}", e);
                    false
                }
            },
            _ => {
                debug!(job_id = %id, operation, "Dropping mutation for a job that is no longer current");
                false
            }
        });

        if changed {
            self.shared.revision.fetch_add(1, Ordering::SeqCst);
        }
        changed
    }
}
