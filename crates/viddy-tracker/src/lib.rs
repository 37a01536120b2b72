//! ViddyScribe job tracking.
//!
//! This crate provides:
//! - Client identity persistence
//! - The upload orchestrator
//! - The status channel state machine and the task that drives it
//! - The observable job state and result retrieval
//! - [`Session`], the surface a UI or CLI drives

pub mod channel;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod retrieval;
pub mod session;
pub mod state;
pub mod tracker;
pub mod upload;

#[cfg(test)]
mod testing;

pub use channel::{ChannelPhase, ChannelTimings, StatusChannel};
pub use config::TrackerConfig;
pub use error::{TrackerError, TrackerResult};
pub use identity::{get_or_create_client_id, FileStore, KeyValueStore, MemoryStore};
pub use logging::{Stage, TrackingLogger};
pub use retrieval::RetrievalPolicy;
pub use session::Session;
pub use state::JobStateMachine;
pub use tracker::{spawn_tracking, TrackingContext, TrackingHandle, TrackingReport};
