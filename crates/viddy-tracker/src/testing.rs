//! In-memory backend and realtime fakes for tracker tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Notify};

use viddy_backend::{
    BackendError, BackendResult, JobBackend, RealtimeConnection, RealtimeTransport,
};
use viddy_models::{
    ClientId, JobHandle, JobIdentifier, RealtimeEvent, StartProcessingRequest, StatusMessage,
    UploadTarget,
};

pub const FAKE_HANDLE: &str = "H1";

/// Scripted poll outcome.
#[derive(Debug, Clone)]
pub enum PollScript {
    Status(StatusMessage),
    Fail(u16),
}

/// Scripted download link outcome.
#[derive(Debug, Clone)]
pub enum LinkScript {
    Missing,
    Link(String),
    Fail(u16),
}

fn scripted_error(status: u16) -> BackendError {
    BackendError::from_http_status(status, format!("scripted {}", status))
}

#[derive(Debug, Default)]
pub struct FakeBackend {
    upload_target_failure: Mutex<Option<u16>>,
    transfer_failure: Mutex<Option<u16>>,
    start_failure: Mutex<Option<u16>>,
    polls: Mutex<VecDeque<PollScript>>,
    poll_delay: Mutex<Duration>,
    links: Mutex<VecDeque<LinkScript>>,
    transfer_gate: Mutex<Option<Arc<Notify>>>,
    transfer_started: Notify,
    pub upload_target_calls: AtomicU32,
    pub transfer_calls: AtomicU32,
    pub start_calls: AtomicU32,
    pub poll_calls: AtomicU32,
    pub link_calls: AtomicU32,
    pub transferred: Mutex<Vec<(String, usize)>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_upload_target(&self, status: u16) {
        *self.upload_target_failure.lock().unwrap() = Some(status);
    }

    pub fn fail_transfer(&self, status: u16) {
        *self.transfer_failure.lock().unwrap() = Some(status);
    }

    pub fn fail_start(&self, status: u16) {
        *self.start_failure.lock().unwrap() = Some(status);
    }

    /// Queue a poll outcome. An empty queue answers `processing`.
    pub fn push_poll(&self, script: PollScript) {
        self.polls.lock().unwrap().push_back(script);
    }

    pub fn set_poll_delay(&self, delay: Duration) {
        *self.poll_delay.lock().unwrap() = delay;
    }

    /// Queue a link outcome. An empty queue answers "not yet".
    pub fn push_link(&self, script: LinkScript) {
        self.links.lock().unwrap().push_back(script);
    }

    /// Block transfers until the returned gate is notified.
    pub fn hold_transfer(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.transfer_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Resolves once a transfer has begun.
    pub async fn transfer_started(&self) {
        self.transfer_started.notified().await;
    }

    pub fn polls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn links(&self) -> u32 {
        self.link_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobBackend for FakeBackend {
    async fn request_upload_target(
        &self,
        id: &JobIdentifier,
        _content_type: &str,
    ) -> BackendResult<UploadTarget> {
        self.upload_target_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.upload_target_failure.lock().unwrap() {
            return Err(scripted_error(status));
        }
        Ok(UploadTarget::put(format!("https://storage.test/{}", id)))
    }

    async fn transfer(
        &self,
        target: &UploadTarget,
        _content_type: &str,
        bytes: Bytes,
    ) -> BackendResult<()> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        self.transfer_started.notify_one();
        let gate = self.transfer_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(status) = *self.transfer_failure.lock().unwrap() {
            return Err(scripted_error(status));
        }
        self.transferred
            .lock()
            .unwrap()
            .push((target.upload_url.clone(), bytes.len()));
        Ok(())
    }

    async fn start_processing(
        &self,
        _request: &StartProcessingRequest,
    ) -> BackendResult<JobHandle> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.start_failure.lock().unwrap() {
            return Err(scripted_error(status));
        }
        Ok(JobHandle::from_string(FAKE_HANDLE))
    }

    async fn poll_status(
        &self,
        _client_id: &ClientId,
        _handle: &JobHandle,
    ) -> BackendResult<StatusMessage> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.poll_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let script = self.polls.lock().unwrap().pop_front();
        match script {
            Some(PollScript::Status(message)) => Ok(message),
            Some(PollScript::Fail(status)) => Err(scripted_error(status)),
            None => Ok(StatusMessage::processing()),
        }
    }

    async fn download_link(&self, _handle: &JobHandle) -> BackendResult<Option<String>> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.links.lock().unwrap().pop_front();
        match script {
            Some(LinkScript::Link(url)) => Ok(Some(url)),
            Some(LinkScript::Fail(status)) => Err(scripted_error(status)),
            Some(LinkScript::Missing) | None => Ok(None),
        }
    }
}

// =============================================================================
// Realtime
// =============================================================================

enum ConnectScript {
    Refuse,
    Open(mpsc::UnboundedReceiver<RealtimeEvent>),
}

/// Realtime transport whose connections are fed by the test.
///
/// Connection attempts consume the script in order; an empty script refuses.
#[derive(Default)]
pub struct FakeRealtime {
    script: Mutex<VecDeque<ConnectScript>>,
    pub connects: AtomicU32,
    closes: Arc<AtomicU32>,
}

impl FakeRealtime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accept the next connection; events sent on the returned sender are
    /// delivered to it. Dropping the sender leaves the connection silent.
    pub fn push_open(&self) -> mpsc::UnboundedSender<RealtimeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().unwrap().push_back(ConnectScript::Open(rx));
        tx
    }

    pub fn push_refuse(&self) {
        self.script.lock().unwrap().push_back(ConnectScript::Refuse);
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connections closed by the client.
    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeTransport for FakeRealtime {
    async fn connect(&self, _client_id: &ClientId) -> BackendResult<Box<dyn RealtimeConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(ConnectScript::Open(rx)) => Ok(Box::new(FakeConnection {
                rx,
                finished: None,
                closes: self.closes.clone(),
            })),
            Some(ConnectScript::Refuse) | None => {
                Err(BackendError::websocket("connection refused"))
            }
        }
    }
}

struct FakeConnection {
    rx: mpsc::UnboundedReceiver<RealtimeEvent>,
    finished: Option<RealtimeEvent>,
    closes: Arc<AtomicU32>,
}

#[async_trait]
impl RealtimeConnection for FakeConnection {
    async fn next_event(&mut self) -> RealtimeEvent {
        if let Some(closed) = &self.finished {
            return closed.clone();
        }
        match self.rx.recv().await {
            Some(event) => {
                if matches!(event, RealtimeEvent::Closed { .. }) {
                    self.finished = Some(event.clone());
                }
                event
            }
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        if self.finished.is_none() {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.finished = Some(RealtimeEvent::closed(Some(1000), "client closed"));
        }
    }
}
