//! Tracker configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::channel::{ChannelTimings, MAX_TIMER};
use crate::retrieval::RetrievalPolicy;

/// Upper bound on `VIDDY_CLIENT_ID_TTL_DAYS`.
pub const MAX_CLIENT_ID_TTL_DAYS: u64 = 3650;

const MAX_RETRIEVAL_ATTEMPTS: u32 = 100;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Tracking, retrieval and identity settings.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Longest silence tolerated on the realtime channel before polling starts
    pub liveness_window: Duration,
    /// Delay between a poll response and the next poll
    pub poll_interval: Duration,
    /// Delay before reconnecting after an abnormal close
    pub reconnect_backoff: Duration,
    /// Download link attempts after completion
    pub retrieval_attempts: u32,
    /// Delay between download link attempts
    pub retrieval_interval: Duration,
    /// How long a persisted client id stays valid
    pub client_id_ttl: Duration,
    /// File backing the client id store
    pub client_store_path: PathBuf,
    /// How long a superseded tracking task gets to close its channel
    pub shutdown_grace: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
            reconnect_backoff: Duration::from_secs(5),
            retrieval_attempts: 3,
            retrieval_interval: Duration::from_secs(3),
            client_id_ttl: Duration::from_secs(7 * SECS_PER_DAY),
            client_store_path: default_store_path(),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl TrackerConfig {
    /// Create config from environment variables.
    ///
    /// Durations are capped at [`MAX_TIMER`]; the client id TTL at
    /// [`MAX_CLIENT_ID_TTL_DAYS`].
    pub fn from_env() -> Self {
        let ttl_days = env_parse("VIDDY_CLIENT_ID_TTL_DAYS")
            .unwrap_or(7u64)
            .min(MAX_CLIENT_ID_TTL_DAYS);

        Self {
            liveness_window: env_secs("VIDDY_LIVENESS_WINDOW_SECS", 30),
            poll_interval: env_secs("VIDDY_POLL_INTERVAL_SECS", 10),
            reconnect_backoff: env_secs("VIDDY_RECONNECT_BACKOFF_SECS", 5),
            retrieval_attempts: env_parse("VIDDY_RETRIEVAL_ATTEMPTS")
                .unwrap_or(3u32)
                .min(MAX_RETRIEVAL_ATTEMPTS),
            retrieval_interval: env_secs("VIDDY_RETRIEVAL_INTERVAL_SECS", 3),
            client_id_ttl: Duration::from_secs(ttl_days * SECS_PER_DAY),
            client_store_path: std::env::var("VIDDY_CLIENT_STORE")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_store_path),
            shutdown_grace: Duration::from_secs(2),
        }
    }

    pub fn channel_timings(&self) -> ChannelTimings {
        ChannelTimings {
            liveness_window: self.liveness_window,
            poll_interval: self.poll_interval,
            reconnect_backoff: self.reconnect_backoff,
        }
        .clamped()
    }

    pub fn retrieval_policy(&self) -> RetrievalPolicy {
        RetrievalPolicy {
            attempts: self.retrieval_attempts.clamp(1, MAX_RETRIEVAL_ATTEMPTS),
            interval: self.retrieval_interval.min(MAX_TIMER),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(key).unwrap_or(default)).min(MAX_TIMER)
}

fn default_store_path() -> PathBuf {
    let home = std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    home.join(".viddyscribe").join("client.json")
}
