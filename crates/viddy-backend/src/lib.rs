//! ViddyScribe backend clients.
//!
//! This crate provides:
//! - The [`JobBackend`] and [`RealtimeTransport`] contracts used by the tracker
//! - A `reqwest` implementation of the HTTP endpoints
//! - A `tokio-tungstenite` implementation of the realtime status channel
//! - Request metrics

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod realtime;
pub mod transport;

#[cfg(test)]
mod client_tests;

pub use client::BackendClient;
pub use config::BackendConfig;
pub use error::{BackendError, BackendResult};
pub use realtime::{WsConnection, WsTransport};
pub use transport::{JobBackend, RealtimeConnection, RealtimeTransport};
