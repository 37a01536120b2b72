//! Client session.
//!
//! The surface the UI (or the CLI) talks to: `submit`, `cancel`,
//! `teardown`, `retrieve_result`, and a subscribable view of the current
//! [`Job`]. Only one job is tracked at a time; submitting again tears the
//! previous tracker down first.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use viddy_backend::{JobBackend, RealtimeTransport};
use viddy_models::{
    ClientId, Job, JobHandle, JobIdentifier, JobPhase, JobState, UploadFile, UploadOptions,
};

use crate::channel::ChannelPhase;
use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::identity::{get_or_create_client_id, KeyValueStore};
use crate::metrics::record_submission;
use crate::retrieval::resolve_download_url;
use crate::state::JobStateMachine;
use crate::tracker::{spawn_tracking, TrackingContext, TrackingHandle, TrackingReport};
use crate::upload::run_upload;

pub struct Session {
    backend: Arc<dyn JobBackend>,
    realtime: Arc<dyn RealtimeTransport>,
    store: Arc<dyn KeyValueStore>,
    config: TrackerConfig,
    state: JobStateMachine,
    tracking: Mutex<Option<TrackingHandle>>,
}

impl Session {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        realtime: Arc<dyn RealtimeTransport>,
        store: Arc<dyn KeyValueStore>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            backend,
            realtime,
            store,
            config,
            state: JobStateMachine::new(),
            tracking: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Observe the current job.
    pub fn subscribe(&self) -> watch::Receiver<Option<Job>> {
        self.state.subscribe()
    }

    pub fn current_job(&self) -> Option<Job> {
        self.state.snapshot()
    }

    pub fn state(&self) -> &JobStateMachine {
        &self.state
    }

    /// Phase of the current tracker's status channel.
    pub fn channel_phase(&self) -> Option<ChannelPhase> {
        self.lock_tracking().as_ref().map(TrackingHandle::channel_phase)
    }

    /// Client id used for submissions.
    pub fn client_id(&self) -> ClientId {
        get_or_create_client_id(self.store.as_ref(), self.config.client_id_ttl, Utc::now())
    }

    /// Upload `file` and start tracking it.
    ///
    /// Returns once processing has started; completion is observed through
    /// [`Session::subscribe`]. An invalid file is rejected before any job
    /// exists.
    pub async fn submit(
        &self,
        file: UploadFile,
        options: UploadOptions,
    ) -> TrackerResult<JobIdentifier> {
        if let Err(e) = file.validate() {
            record_submission("invalid");
            return Err(e.into());
        }

        let previous = self.lock_tracking().take();
        if let Some(previous) = previous {
            info!(job_id = %previous.job_id(), "Stopping previous tracker before new submission");
            previous.shutdown(self.config.shutdown_grace).await;
        }

        let client_id = self.client_id();
        let submitted_at = Utc::now();
        let job_id = JobIdentifier::generate(&file.name, submitted_at);
        self.state.replace(Job::new(
            job_id.clone(),
            client_id.clone(),
            options.add_bg_music,
            submitted_at,
        ));
        self.state.begin_upload(&job_id);

        let handle = run_upload(
            self.backend.as_ref(),
            &self.state,
            &job_id,
            &client_id,
            file,
            options,
        )
        .await?;

        self.start_tracking(job_id.clone(), client_id, handle)?;
        Ok(job_id)
    }

    fn start_tracking(
        &self,
        job_id: JobIdentifier,
        client_id: ClientId,
        handle: JobHandle,
    ) -> TrackerResult<()> {
        // Held across the phase check so a concurrent cancel either sees the
        // tracker or prevents it from starting.
        let mut slot = self.lock_tracking();
        if self.state.phase_of(&job_id) != Some(JobPhase::AwaitingStatus) {
            return Err(TrackerError::Cancelled);
        }

        *slot = Some(spawn_tracking(TrackingContext {
            job_id,
            client_id,
            handle,
            state: self.state.clone(),
            backend: self.backend.clone(),
            realtime: self.realtime.clone(),
            timings: self.config.channel_timings(),
        }));
        Ok(())
    }

    /// Cancel the current job.
    ///
    /// The job is `Cancelled` when this returns, so nothing the tracker
    /// receives afterwards can change it. The connection and timers are
    /// released on the tracker's next turn: commands are its first select
    /// branch, and handling them there lets the socket close with a close
    /// frame and keeps the tracking report for [`Session::join_tracking`].
    /// Dropping the session aborts the task outright. Returns `false` when
    /// there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let slot = self.lock_tracking();
        let Some(job_id) = self.state.active_id() else {
            return false;
        };

        let cancelled = self.state.cancel(&job_id);
        if let Some(tracking) = slot.as_ref().filter(|t| t.job_id() == &job_id) {
            tracking.cancel();
        }
        if cancelled {
            info!(job_id = %job_id, "Job cancelled");
        }
        cancelled
    }

    /// Stop observing the current job without changing its state.
    pub async fn teardown(&self) -> Option<TrackingReport> {
        let tracking = self.lock_tracking().take()?;
        tracking.shutdown(self.config.shutdown_grace).await
    }

    /// Wait for the current tracker to end on its own.
    pub async fn join_tracking(&self) -> Option<TrackingReport> {
        let tracking = self.lock_tracking().take()?;
        tracking.join().await
    }

    /// Fetchable URL of the completed job's output.
    ///
    /// A link failure leaves the job `Completed` and is reported as
    /// [`TrackerError::Retrieval`], never as a processing failure.
    pub async fn retrieve_result(&self) -> TrackerResult<String> {
        let job = self
            .state
            .snapshot()
            .ok_or_else(|| TrackerError::not_completed(None))?;

        let output_location = match &job.state {
            JobState::Completed {
                download_url: Some(url),
                ..
            } => return Ok(url.clone()),
            JobState::Completed {
                output_location, ..
            } => output_location.clone(),
            JobState::Error { kind, message } => {
                return Err(TrackerError::submission(*kind, message.clone()))
            }
            JobState::Cancelled => return Err(TrackerError::Cancelled),
            _ => return Err(TrackerError::not_completed(Some(job.phase()))),
        };

        let handle = job
            .handle
            .clone()
            .unwrap_or_else(|| JobHandle::from(&job.id));
        let policy = self.config.retrieval_policy();

        match resolve_download_url(self.backend.as_ref(), &handle, &output_location, &policy)
            .await
        {
            Ok(url) => {
                self.state.record_download(&job.id, &url);
                Ok(url)
            }
            Err(e) => {
                warn!(job_id = %job.id, "Result retrieval failed: {}", e);
                self.state.record_retrieval_failure(&job.id, &e.to_string());
                Err(e)
            }
        }
    }

    fn lock_tracking(&self) -> MutexGuard<'_, Option<TrackingHandle>> {
        self.tracking.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
