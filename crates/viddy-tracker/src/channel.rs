//! Status channel state machine.
//!
//! Decides, for one tracked job, when to (re)connect the realtime channel,
//! when to poll, and which status report ends tracking. It performs no I/O
//! and reads no clock: callers feed it [`ChannelInput`]s and timer expiries
//! with the current instant and execute the returned [`ChannelAction`]s.
//!
//! ```text
//!             open                 silence > liveness window
//! Connecting ─────▶ Live ───────────────────────────────────▶ Degraded
//!     ▲   │          │ ▲                frame                    │
//!     │   │          │ └─────────────────────────────────────────┘
//!     │   │ fail     │ abnormal close (also from Degraded)
//!     │   ▼          ▼
//!     └── Reconnecting (backoff armed, polling on)
//!
//! any state ── terminal status / cancel / teardown ──▶ Closed
//! ```
//!
//! Polling starts on the first of: liveness expiry, connect failure,
//! abnormal close, normal close. Once started it keeps running until
//! `Closed`. The first poll goes out immediately; each following one is
//! scheduled one interval after the previous response.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use viddy_models::{
    JobHandle, RealtimeEvent, RealtimeFrame, SignalSource, StatusMessage, StatusSignal,
};

/// Longest timer the channel arms.
pub const MAX_TIMER: Duration = Duration::from_secs(24 * 60 * 60);

/// Timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimings {
    pub liveness_window: Duration,
    pub poll_interval: Duration,
    pub reconnect_backoff: Duration,
}

impl Default for ChannelTimings {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

impl ChannelTimings {
    /// Every timer brought into range; the liveness window is at least 1ms.
    pub fn clamped(self) -> Self {
        Self {
            liveness_window: self.liveness_window.clamp(Duration::from_millis(1), MAX_TIMER),
            poll_interval: self.poll_interval.min(MAX_TIMER),
            reconnect_backoff: self.reconnect_backoff.min(MAX_TIMER),
        }
    }
}

/// `now + after`, never past [`MAX_TIMER`] and never overflowing.
fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(MAX_TIMER)).unwrap_or(now)
}

/// Phase of the channel itself (not of the job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPhase {
    /// Handshake in flight
    Connecting,
    /// Realtime open, liveness timer armed
    Live,
    /// Realtime silent or gone; polling carries the job
    Degraded,
    /// Backoff armed before the next connection attempt
    Reconnecting,
    /// Tracking over
    Closed,
}

impl ChannelPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelPhase::Connecting => "connecting",
            ChannelPhase::Live => "live",
            ChannelPhase::Degraded => "degraded",
            ChannelPhase::Reconnecting => "reconnecting",
            ChannelPhase::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which transport is currently authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelState {
    pub realtime_connected: bool,
    pub realtime_last_event_at: Option<Instant>,
    pub polling_active: bool,
}

/// Outcome of one status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    Response(StatusMessage),
    Failed(String),
}

/// Everything the channel reacts to, besides timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelInput {
    /// Realtime handshake completed
    Connected,
    /// Realtime handshake failed
    ConnectFailed(String),
    Realtime(RealtimeEvent),
    Poll(PollEvent),
    Cancel,
    Teardown,
}

/// Why tracking ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Terminal,
    Cancelled,
    Teardown,
}

/// Side effects requested by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAction {
    /// Open a realtime connection
    Connect,
    /// Close the realtime connection or abandon a handshake in flight
    CloseRealtime,
    /// Issue one status poll
    IssuePoll,
    /// Non-terminal status text for the job
    Progress(String),
    /// The single terminal status for the job
    Terminal(StatusSignal),
    /// Tracking is over; stop every timer and in-flight request
    Closed(CloseReason),
}

/// Status channel for one job.
#[derive(Debug)]
pub struct StatusChannel {
    handle: JobHandle,
    timings: ChannelTimings,
    phase: ChannelPhase,
    state: ChannelState,
    liveness_deadline: Option<Instant>,
    reconnect_deadline: Option<Instant>,
    poll_deadline: Option<Instant>,
    connect_in_flight: bool,
    poll_in_flight: bool,
    transitions: Vec<ChannelPhase>,
    connect_attempts: u32,
    polls_issued: u32,
}

impl StatusChannel {
    pub fn new(handle: JobHandle, timings: ChannelTimings) -> Self {
        Self {
            handle,
            timings: timings.clamped(),
            phase: ChannelPhase::Connecting,
            state: ChannelState::default(),
            liveness_deadline: None,
            reconnect_deadline: None,
            poll_deadline: None,
            connect_in_flight: false,
            poll_in_flight: false,
            transitions: vec![ChannelPhase::Connecting],
            connect_attempts: 0,
            polls_issued: 0,
        }
    }

    /// Kick off the first connection attempt.
    pub fn start(&mut self) -> Vec<ChannelAction> {
        if self.phase != ChannelPhase::Connecting || self.connect_in_flight {
            return Vec::new();
        }
        self.connect()
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub fn phase(&self) -> ChannelPhase {
        self.phase
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ChannelPhase::Closed
    }

    /// Every phase entered, in order, starting with `Connecting`.
    pub fn transitions(&self) -> &[ChannelPhase] {
        &self.transitions
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    pub fn polls_issued(&self) -> u32 {
        self.polls_issued
    }

    /// Earliest armed timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_closed() {
            return None;
        }
        [
            self.liveness_deadline,
            self.reconnect_deadline,
            self.poll_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Apply one input.
    pub fn on_input(&mut self, input: ChannelInput, now: Instant) -> Vec<ChannelAction> {
        if self.is_closed() {
            trace!(handle = %self.handle, ?input, "Discarding input after close");
            return Vec::new();
        }

        match input {
            ChannelInput::Connected => self.on_connected(now),
            ChannelInput::ConnectFailed(reason) => {
                if !self.connect_in_flight {
                    return Vec::new();
                }
                self.connect_in_flight = false;
                debug!(handle = %self.handle, "Realtime connect failed: {}", reason);
                self.enter_reconnecting(now)
            }
            ChannelInput::Realtime(RealtimeEvent::Frame(frame)) => self.on_frame(frame, now),
            ChannelInput::Realtime(event @ RealtimeEvent::Closed { .. }) => {
                self.on_realtime_closed(event, now)
            }
            ChannelInput::Poll(event) => self.on_poll(event, now),
            ChannelInput::Cancel => self.close(CloseReason::Cancelled),
            ChannelInput::Teardown => self.close(CloseReason::Teardown),
        }
    }

    /// Fire every timer due at `now`.
    pub fn on_timers(&mut self, now: Instant) -> Vec<ChannelAction> {
        let mut actions = Vec::new();
        if self.is_closed() {
            return actions;
        }

        if self.liveness_deadline.is_some_and(|d| d <= now) {
            self.liveness_deadline = None;
            if self.phase == ChannelPhase::Live {
                debug!(
                    handle = %self.handle,
                    window_ms = self.timings.liveness_window.as_millis() as u64,
                    "Realtime channel silent, falling back to polling"
                );
                self.enter(ChannelPhase::Degraded);
                actions.extend(self.start_polling());
            }
        }

        if self.reconnect_deadline.is_some_and(|d| d <= now) {
            self.reconnect_deadline = None;
            if self.phase == ChannelPhase::Reconnecting {
                self.enter(ChannelPhase::Connecting);
                actions.extend(self.connect());
            }
        }

        if self.poll_deadline.is_some_and(|d| d <= now) {
            self.poll_deadline = None;
            if self.state.polling_active && !self.poll_in_flight {
                actions.extend(self.issue_poll());
            }
        }

        actions
    }

    fn on_connected(&mut self, now: Instant) -> Vec<ChannelAction> {
        if !self.connect_in_flight {
            return Vec::new();
        }
        self.connect_in_flight = false;
        self.state.realtime_connected = true;
        self.state.realtime_last_event_at = Some(now);
        self.liveness_deadline = Some(deadline_after(now, self.timings.liveness_window));
        self.enter(ChannelPhase::Live);
        Vec::new()
    }

    fn on_frame(&mut self, frame: RealtimeFrame, now: Instant) -> Vec<ChannelAction> {
        if !self.state.realtime_connected {
            trace!(handle = %self.handle, "Ignoring frame from a connection that is gone");
            return Vec::new();
        }

        // Every frame counts as liveness.
        self.state.realtime_last_event_at = Some(now);
        self.liveness_deadline = Some(deadline_after(now, self.timings.liveness_window));
        if self.phase == ChannelPhase::Degraded {
            self.enter(ChannelPhase::Live);
        }

        match frame {
            RealtimeFrame::Status(message) => {
                let foreign = message
                    .job_handle
                    .as_deref()
                    .is_some_and(|h| h != self.handle.as_str());
                if foreign {
                    trace!(handle = %self.handle, "Ignoring status for another job");
                    return Vec::new();
                }
                self.on_status(SignalSource::Realtime, message)
            }
            RealtimeFrame::Keepalive => Vec::new(),
            RealtimeFrame::Unrecognized(text) => {
                debug!(handle = %self.handle, frame = %text, "Unrecognized realtime frame");
                Vec::new()
            }
        }
    }

    fn on_realtime_closed(&mut self, event: RealtimeEvent, now: Instant) -> Vec<ChannelAction> {
        if !self.state.realtime_connected {
            return Vec::new();
        }
        self.state.realtime_connected = false;
        self.liveness_deadline = None;

        if event.is_normal_close() {
            debug!(handle = %self.handle, "Realtime channel closed normally, polling only");
            self.enter(ChannelPhase::Degraded);
            return self.start_polling();
        }

        if let RealtimeEvent::Closed { code, reason } = &event {
            debug!(handle = %self.handle, ?code, reason = %reason, "Realtime channel dropped");
        }
        self.enter_reconnecting(now)
    }

    fn on_poll(&mut self, event: PollEvent, now: Instant) -> Vec<ChannelAction> {
        if !self.poll_in_flight {
            return Vec::new();
        }
        self.poll_in_flight = false;
        self.poll_deadline = Some(deadline_after(now, self.timings.poll_interval));

        match event {
            PollEvent::Response(message) => self.on_status(SignalSource::Poll, message),
            PollEvent::Failed(reason) => {
                debug!(handle = %self.handle, "Status poll failed: {}", reason);
                Vec::new()
            }
        }
    }

    fn on_status(&mut self, source: SignalSource, message: StatusMessage) -> Vec<ChannelAction> {
        let signal = StatusSignal::new(source, message);
        if !signal.is_terminal() {
            let text = signal
                .message
                .clone()
                .unwrap_or_else(|| signal.status.as_str().to_string());
            return vec![ChannelAction::Progress(text)];
        }

        let mut actions = vec![ChannelAction::Terminal(signal)];
        actions.extend(self.close(CloseReason::Terminal));
        actions
    }

    fn connect(&mut self) -> Vec<ChannelAction> {
        self.connect_in_flight = true;
        self.connect_attempts += 1;
        vec![ChannelAction::Connect]
    }

    fn enter_reconnecting(&mut self, now: Instant) -> Vec<ChannelAction> {
        self.state.realtime_connected = false;
        self.liveness_deadline = None;
        self.reconnect_deadline = Some(deadline_after(now, self.timings.reconnect_backoff));
        self.enter(ChannelPhase::Reconnecting);
        self.start_polling()
    }

    fn start_polling(&mut self) -> Vec<ChannelAction> {
        if self.state.polling_active {
            return Vec::new();
        }
        self.state.polling_active = true;
        self.issue_poll()
    }

    fn issue_poll(&mut self) -> Vec<ChannelAction> {
        self.poll_in_flight = true;
        self.polls_issued += 1;
        vec![ChannelAction::IssuePoll]
    }

    fn close(&mut self, reason: CloseReason) -> Vec<ChannelAction> {
        let mut actions = Vec::new();
        if self.state.realtime_connected || self.connect_in_flight {
            actions.push(ChannelAction::CloseRealtime);
        }

        self.state.realtime_connected = false;
        self.state.polling_active = false;
        self.connect_in_flight = false;
        self.poll_in_flight = false;
        self.liveness_deadline = None;
        self.reconnect_deadline = None;
        self.poll_deadline = None;
        self.enter(ChannelPhase::Closed);

        actions.push(ChannelAction::Closed(reason));
        actions
    }

    fn enter(&mut self, phase: ChannelPhase) {
        if self.phase != phase {
            trace!(handle = %self.handle, from = %self.phase, to = %phase, "Channel transition");
            self.phase = phase;
            self.transitions.push(phase);
        }
    }
}
