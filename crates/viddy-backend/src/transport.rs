//! Contracts the tracker consumes.
//!
//! [`JobBackend`] covers the request/response endpoints and
//! [`RealtimeTransport`] the push channel. Production implementations live in
//! [`crate::client`] and [`crate::realtime`]; tests substitute in-memory fakes.

use async_trait::async_trait;
use bytes::Bytes;

use viddy_models::{
    ClientId, JobHandle, JobIdentifier, RealtimeEvent, StartProcessingRequest, StatusMessage,
    UploadTarget,
};

use crate::error::BackendResult;

/// Request/response side of the backend.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Ask for a signed upload target for `id`.
    async fn request_upload_target(
        &self,
        id: &JobIdentifier,
        content_type: &str,
    ) -> BackendResult<UploadTarget>;

    /// Move the bytes to storage. No bearer credential is sent.
    async fn transfer(
        &self,
        target: &UploadTarget,
        content_type: &str,
        bytes: Bytes,
    ) -> BackendResult<()>;

    /// Register the uploaded artifact as a job and return its handle.
    async fn start_processing(&self, request: &StartProcessingRequest)
        -> BackendResult<JobHandle>;

    /// Ask for the status of a job directly.
    async fn poll_status(
        &self,
        client_id: &ClientId,
        handle: &JobHandle,
    ) -> BackendResult<StatusMessage>;

    /// Fetch a downloadable link; `None` while it is not provisioned yet.
    async fn download_link(&self, handle: &JobHandle) -> BackendResult<Option<String>>;
}

/// Opens realtime status connections.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a connection scoped to `client_id`.
    ///
    /// Resolves once the handshake has completed.
    async fn connect(&self, client_id: &ClientId) -> BackendResult<Box<dyn RealtimeConnection>>;
}

/// An open realtime connection.
#[async_trait]
pub trait RealtimeConnection: Send {
    /// Wait for the next event.
    ///
    /// Must be cancel safe. After a [`RealtimeEvent::Closed`] the connection
    /// is finished and further calls keep reporting it closed.
    async fn next_event(&mut self) -> RealtimeEvent;

    /// Close with a normal closure.
    async fn close(&mut self);
}
