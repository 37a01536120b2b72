//! Tracking metrics.
//!
//! - Polls by outcome
//! - Channel phase transitions
//! - Terminal signals by winning transport
//! - Submission and retrieval outcomes

use std::time::Duration;

use metrics::{counter, histogram};

use viddy_models::{RemoteStatus, SignalSource};

use crate::channel::ChannelPhase;

// =============================================================================
// Metric Names
// =============================================================================

pub mod names {
    /// Status polls by outcome.
    pub const POLLS_TOTAL: &str = "viddy_status_polls_total";

    /// Channel phase entries by phase.
    pub const CHANNEL_TRANSITIONS_TOTAL: &str = "viddy_channel_transitions_total";

    /// Terminal signals acted upon by source and status.
    pub const TERMINAL_SIGNALS_TOTAL: &str = "viddy_terminal_signals_total";

    /// Time from tracking start to terminal signal.
    pub const TIME_TO_TERMINAL_SECONDS: &str = "viddy_time_to_terminal_seconds";

    /// Submissions by outcome.
    pub const SUBMISSIONS_TOTAL: &str = "viddy_submissions_total";

    /// Result retrievals by outcome.
    pub const RETRIEVALS_TOTAL: &str = "viddy_retrievals_total";
}

// =============================================================================
// Recording Functions
// =============================================================================

pub fn record_poll(outcome: &'static str) {
    counter!(names::POLLS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_transition(phase: ChannelPhase) {
    counter!(names::CHANNEL_TRANSITIONS_TOTAL, "phase" => phase.as_str()).increment(1);
}

pub fn record_terminal(source: SignalSource, status: RemoteStatus, elapsed: Duration) {
    counter!(
        names::TERMINAL_SIGNALS_TOTAL,
        "source" => source.as_str(),
        "status" => status.as_str()
    )
    .increment(1);

    histogram!(names::TIME_TO_TERMINAL_SECONDS, "source" => source.as_str())
        .record(elapsed.as_secs_f64());
}

pub fn record_submission(outcome: &'static str) {
    counter!(names::SUBMISSIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_retrieval(outcome: &'static str) {
    counter!(names::RETRIEVALS_TOTAL, "outcome" => outcome).increment(1);
}
