//! Status tracking driver.
//!
//! Runs a [`StatusChannel`] for one job as a spawned task: executes its
//! actions against the realtime transport and the polling endpoint, feeds
//! their outcomes back in, and applies the resulting progress and terminal
//! status to the [`JobStateMachine`]. All waiting happens in one
//! `tokio::select!`, so timer expiry, realtime frames, poll responses and
//! commands are handled one at a time.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn, Instrument};

use viddy_backend::{BackendResult, JobBackend, RealtimeConnection, RealtimeTransport};
use viddy_models::{ClientId, JobHandle, JobIdentifier, RealtimeEvent, StatusMessage, StatusSignal};

use crate::channel::{
    ChannelAction, ChannelInput, ChannelPhase, ChannelTimings, CloseReason, PollEvent,
    StatusChannel,
};
use crate::logging::{Stage, TrackingLogger};
use crate::metrics::{record_poll, record_terminal, record_transition};
use crate::state::JobStateMachine;

/// Commands accepted by a running tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerCommand {
    /// Stop tracking and cancel the job.
    Cancel,
    /// Stop tracking, leaving the job as it is.
    Teardown,
}

/// Everything a tracker needs for one job.
#[derive(Clone)]
pub struct TrackingContext {
    pub job_id: JobIdentifier,
    pub client_id: ClientId,
    pub handle: JobHandle,
    pub state: JobStateMachine,
    pub backend: Arc<dyn JobBackend>,
    pub realtime: Arc<dyn RealtimeTransport>,
    pub timings: ChannelTimings,
}

/// Summary of a finished tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingReport {
    pub transitions: Vec<ChannelPhase>,
    pub connect_attempts: u32,
    pub polls_issued: u32,
    pub close_reason: Option<CloseReason>,
    /// Terminal signal chosen by the channel, if tracking ended on one.
    pub terminal: Option<StatusSignal>,
}

/// Start tracking `ctx.handle`.
pub fn spawn_tracking(ctx: TrackingContext) -> TrackingHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (phase_tx, phase_rx) = watch::channel(ChannelPhase::Connecting);
    let job_id = ctx.job_id.clone();
    let span = TrackingLogger::new(&ctx.job_id, Stage::Tracking)
        .with_handle(&ctx.handle)
        .create_span();

    let task = tokio::spawn(run(ctx, cmd_rx, phase_tx).instrument(span));

    TrackingHandle {
        job_id,
        cmd_tx,
        phase_rx,
        task: Some(task),
    }
}

/// Owner of a running tracker. Dropping it aborts the task.
#[derive(Debug)]
pub struct TrackingHandle {
    job_id: JobIdentifier,
    cmd_tx: mpsc::UnboundedSender<TrackerCommand>,
    phase_rx: watch::Receiver<ChannelPhase>,
    task: Option<JoinHandle<TrackingReport>>,
}

impl TrackingHandle {
    pub fn job_id(&self) -> &JobIdentifier {
        &self.job_id
    }

    /// Ask the tracker to stop and cancel the job.
    pub fn cancel(&self) -> bool {
        self.cmd_tx.send(TrackerCommand::Cancel).is_ok()
    }

    /// Ask the tracker to stop without touching the job.
    pub fn teardown(&self) -> bool {
        self.cmd_tx.send(TrackerCommand::Teardown).is_ok()
    }

    pub fn channel_phase(&self) -> ChannelPhase {
        *self.phase_rx.borrow()
    }

    pub fn subscribe_channel(&self) -> watch::Receiver<ChannelPhase> {
        self.phase_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Wait for the tracker to end on its own.
    pub async fn join(mut self) -> Option<TrackingReport> {
        let task = self.task.take()?;
        match task.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(job_id = %self.job_id, "Tracking task failed: {}", e);
                None
            }
        }
    }

    /// Tear down and wait up to `grace` for the tracker to close its
    /// channel; abort it after that.
    pub async fn shutdown(mut self, grace: Duration) -> Option<TrackingReport> {
        let _ = self.cmd_tx.send(TrackerCommand::Teardown);
        let mut task = self.task.take()?;

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                warn!(job_id = %self.job_id, "Tracking task failed: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    job_id = %self.job_id,
                    grace_ms = grace.as_millis() as u64,
                    "Tracking task did not stop in time, aborting"
                );
                task.abort();
                None
            }
        }
    }
}

impl Drop for TrackingHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// Driver
// =============================================================================

type ConnectFuture = BoxFuture<'static, BackendResult<Box<dyn RealtimeConnection>>>;
type PollFuture = BoxFuture<'static, BackendResult<StatusMessage>>;

/// In-flight I/O owned by the driver.
#[derive(Default)]
struct Slots {
    connecting: Option<ConnectFuture>,
    connection: Option<Box<dyn RealtimeConnection>>,
    polling: Option<PollFuture>,
}

enum Wake {
    Input(ChannelInput),
    Timers,
}

struct Driver {
    ctx: TrackingContext,
    logger: TrackingLogger,
    started: Instant,
    slots: Slots,
    close_reason: Option<CloseReason>,
    terminal: Option<StatusSignal>,
}

async fn run(
    ctx: TrackingContext,
    mut cmd_rx: mpsc::UnboundedReceiver<TrackerCommand>,
    phase_tx: watch::Sender<ChannelPhase>,
) -> TrackingReport {
    let mut channel = StatusChannel::new(ctx.handle.clone(), ctx.timings);
    let mut driver = Driver {
        logger: TrackingLogger::new(&ctx.job_id, Stage::Tracking).with_handle(&ctx.handle),
        ctx,
        started: Instant::now(),
        slots: Slots::default(),
        close_reason: None,
        terminal: None,
    };
    driver
        .logger
        .log_start(&format!("Tracking handle {}", channel.handle()));

    let mut published = 0;
    let actions = channel.start();
    driver.execute(actions).await;

    loop {
        published = publish_transitions(&channel, &phase_tx, published);
        if channel.is_closed() {
            break;
        }

        let deadline = channel.next_deadline();
        let slots = &mut driver.slots;

        let wake = tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(TrackerCommand::Cancel) => Wake::Input(ChannelInput::Cancel),
                Some(TrackerCommand::Teardown) | None => Wake::Input(ChannelInput::Teardown),
            },

            result = connect_outcome(&mut slots.connecting) => {
                slots.connecting = None;
                match result {
                    Ok(connection) => {
                        slots.connection = Some(connection);
                        Wake::Input(ChannelInput::Connected)
                    }
                    Err(e) => Wake::Input(ChannelInput::ConnectFailed(e.to_string())),
                }
            }

            event = next_event(&mut slots.connection) => {
                if matches!(event, RealtimeEvent::Closed { .. }) {
                    slots.connection = None;
                }
                Wake::Input(ChannelInput::Realtime(event))
            }

            result = poll_outcome(&mut slots.polling) => {
                slots.polling = None;
                match result {
                    Ok(message) => {
                        record_poll("ok");
                        Wake::Input(ChannelInput::Poll(PollEvent::Response(message)))
                    }
                    Err(e) => {
                        record_poll("failed");
                        Wake::Input(ChannelInput::Poll(PollEvent::Failed(e.to_string())))
                    }
                }
            }

            _ = sleep_until_deadline(deadline) => Wake::Timers,
        };

        let now = Instant::now();
        let actions = match wake {
            Wake::Input(input) => channel.on_input(input, now),
            Wake::Timers => channel.on_timers(now),
        };
        driver.execute(actions).await;
    }

    let report = TrackingReport {
        transitions: channel.transitions().to_vec(),
        connect_attempts: channel.connect_attempts(),
        polls_issued: channel.polls_issued(),
        close_reason: driver.close_reason,
        terminal: driver.terminal,
    };
    debug!(
        job_id = %driver.ctx.job_id,
        polls = report.polls_issued,
        connects = report.connect_attempts,
        reason = ?report.close_reason,
        "Tracking finished"
    );
    report
}

impl Driver {
    async fn execute(&mut self, actions: Vec<ChannelAction>) {
        for action in actions {
            match action {
                ChannelAction::Connect => {
                    let realtime = self.ctx.realtime.clone();
                    let client_id = self.ctx.client_id.clone();
                    self.slots.connecting =
                        Some(async move { realtime.connect(&client_id).await }.boxed());
                }
                ChannelAction::CloseRealtime => {
                    self.slots.connecting = None;
                    if let Some(mut connection) = self.slots.connection.take() {
                        connection.close().await;
                    }
                }
                ChannelAction::IssuePoll => {
                    let backend = self.ctx.backend.clone();
                    let client_id = self.ctx.client_id.clone();
                    let handle = self.ctx.handle.clone();
                    self.slots.polling = Some(
                        async move { backend.poll_status(&client_id, &handle).await }.boxed(),
                    );
                }
                ChannelAction::Progress(text) => {
                    if self.ctx.state.update_status_text(&self.ctx.job_id, &text) {
                        self.logger.log_status_text(&text);
                    }
                }
                ChannelAction::Terminal(signal) => {
                    if self.ctx.state.apply_terminal(&self.ctx.job_id, &signal) {
                        record_terminal(signal.source, signal.status, self.started.elapsed());
                        self.logger.log_terminal(&signal, self.started.elapsed());
                    } else {
                        debug!(
                            job_id = %self.ctx.job_id,
                            source = %signal.source,
                            "Terminal status arrived after the job left AwaitingStatus"
                        );
                    }
                    self.terminal = Some(signal);
                }
                ChannelAction::Closed(reason) => {
                    self.slots.connecting = None;
                    self.slots.polling = None;
                    if let Some(mut connection) = self.slots.connection.take() {
                        connection.close().await;
                    }
                    if reason == CloseReason::Cancelled {
                        self.ctx.state.cancel(&self.ctx.job_id);
                    }
                    self.close_reason = Some(reason);
                }
            }
        }
    }
}

fn publish_transitions(
    channel: &StatusChannel,
    phase_tx: &watch::Sender<ChannelPhase>,
    published: usize,
) -> usize {
    let transitions = channel.transitions();
    for phase in &transitions[published.min(transitions.len())..] {
        record_transition(*phase);
    }
    phase_tx.send_if_modified(|current| {
        if *current != channel.phase() {
            *current = channel.phase();
            true
        } else {
            false
        }
    });
    transitions.len()
}

async fn connect_outcome(
    slot: &mut Option<ConnectFuture>,
) -> BackendResult<Box<dyn RealtimeConnection>> {
    match slot {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_event(slot: &mut Option<Box<dyn RealtimeConnection>>) -> RealtimeEvent {
    match slot {
        Some(connection) => connection.next_event().await,
        None => pending().await,
    }
}

async fn poll_outcome(slot: &mut Option<PollFuture>) -> BackendResult<StatusMessage> {
    match slot {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
