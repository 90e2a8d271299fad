//! Session coordinator
//!
//! Owns the session, the frame table, the statistics and the scheduler, and
//! drives them from a single task. Every mutation happens inside
//! [`PipelineCoordinator::run`], which multiplexes the command queue, the
//! channel events, the scheduler wake-up and the in-flight capture/send
//! futures; none of that state is shared, so none of it is locked.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::capture::{CaptureError, Capturer, DeviceInitError};
use crate::config::PipelineConfig;
use crate::display::Presenter;
use crate::pipeline::clock::{FrameIds, PipelineClock, wall_clock_millis};
use crate::pipeline::frames::FrameTable;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::scheduler::{Scheduler, Tick};
use crate::pipeline::state::SessionState;
use crate::pipeline::stats::{StatsAggregator, StatsSnapshot};
use crate::pipeline::types::{FrameRecord, Session, Timestamp};
use crate::utils::net::channel::{Channel, ChannelEvent, SendError};
use crate::utils::net::protocol::{DetectionResult, Inbound, parse_inbound};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    DeviceInit(#[from] DeviceInitError),
}

/// Requests from the collaborator layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Toggle,
    Shutdown,
}

/// Notifications for the collaborator layer
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Started { device_id: String },
    Stopped { summary: StatsSnapshot },
    Disconnected { reason: String },
    InitFailed { reason: String },
}

/// Cloneable command sender for a running coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { commands: tx }, rx)
    }

    /// Returns false once the coordinator has shut down.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn start(&self) -> bool {
        self.send(Command::Start)
    }

    pub fn stop(&self) -> bool {
        self.send(Command::Stop)
    }

    pub fn toggle(&self) -> bool {
        self.send(Command::Toggle)
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }
}

/// Result of an asynchronous operation, fed back into the loop
enum Completion {
    Captured {
        capturer: Capturer,
        generation: u64,
        started: Timestamp,
        /// Wall-clock read taken when the capture began, source of the frame id
        clock_read: u64,
        outcome: Result<Bytes, CaptureError>,
    },
    Sent {
        generation: u64,
        frame_id: u64,
        result: Result<(), SendError>,
    },
}

pub struct PipelineCoordinator {
    config: PipelineConfig,
    session: Session,
    state: SessionState,
    clock: PipelineClock,
    frame_ids: FrameIds,
    frames: FrameTable,
    stats: StatsAggregator,
    scheduler: Scheduler,
    health: Arc<PipelineHealth>,
    /// `None` while a capture is in flight
    capturer: Option<Capturer>,
    channel: Arc<dyn Channel>,
    presenter: Box<dyn Presenter>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    /// Bumped on every start and stop; completions from an older generation
    /// belong to a finished session and are discarded.
    generation: u64,
    start_retry_at: Option<Timestamp>,
    /// Set once the unechoed-id warning was logged in strict mode
    warned_unechoed: bool,
    inflight: FuturesUnordered<BoxFuture<'static, Completion>>,
}

impl PipelineCoordinator {
    pub fn new(
        config: PipelineConfig,
        device_id: String,
        capturer: Capturer,
        channel: Arc<dyn Channel>,
        presenter: Box<dyn Presenter>,
    ) -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let frames = if config.strict_correlation {
            FrameTable::strict()
        } else {
            FrameTable::new()
        };

        let coordinator = Self {
            session: Session::new(device_id, config.target_interval()),
            state: SessionState::Idle,
            clock: PipelineClock::new(),
            frame_ids: FrameIds::new(),
            frames,
            stats: StatsAggregator::new(config.stats_window(), config.display_latency_cap_ms),
            scheduler: Scheduler::new(
                config.target_interval(),
                config.throttle_backoff(),
                config.max_pending_frames,
            ),
            health: Arc::new(PipelineHealth::new()),
            capturer: Some(capturer),
            channel,
            presenter,
            events: events_tx,
            generation: 0,
            start_retry_at: None,
            warned_unechoed: false,
            inflight: FuturesUnordered::new(),
            config,
        };
        (coordinator, events_rx)
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        Arc::clone(&self.health)
    }

    /// Run until shutdown.
    ///
    /// The device is checked first; if it never becomes ready the session can
    /// not start and the error is returned after an `InitFailed` event.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Result<(), PipelineError> {
        let mut device = String::new();
        if let Some(capturer) = self.capturer.as_mut() {
            device = format!(
                "{}, {}KB max frame",
                capturer.source_name(),
                capturer.max_frame_size() / 1024
            );
            let init = capturer
                .initialize(
                    self.config.device_init_attempts,
                    self.config.device_init_retry(),
                )
                .await;
            if let Err(e) = init {
                error!("Coordinator: {}", e);
                self.emit(PipelineEvent::InitFailed {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        }

        info!(
            "Coordinator: ready (device {}, {:?} interval, {} pending max, camera {})",
            self.session.device_id,
            self.scheduler.interval(),
            self.config.max_pending_frames,
            device
        );

        let mut channel_alive = true;
        loop {
            let wake = self.next_wake().map(|ts| self.clock.instant_at(ts));

            tokio::select! {
                command = commands.recv() => {
                    let now = self.clock.now();
                    let Some(command) = command else { break };
                    if !self.on_command(command, now) {
                        break;
                    }
                }
                event = channel_events.recv(), if channel_alive => {
                    let now = self.clock.now();
                    match event {
                        Some(event) => self.on_channel_event(event, now),
                        None => {
                            channel_alive = false;
                            self.disconnect("channel event stream ended".to_string());
                        }
                    }
                }
                Some(completion) = self.inflight.next() => {
                    let now = self.clock.now();
                    self.on_completion(completion, now);
                }
                _ = tokio::time::sleep_until(wake.unwrap_or_else(tokio::time::Instant::now)), if wake.is_some() => {
                    let now = self.clock.now();
                    self.on_wake(now);
                }
            }
        }

        self.stop();
        info!("Coordinator: shut down");
        Ok(())
    }

    fn next_wake(&self) -> Option<Timestamp> {
        match (self.scheduler.deadline(), self.start_retry_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Apply a command. Returns false on shutdown.
    fn on_command(&mut self, command: Command, now: Timestamp) -> bool {
        match command {
            Command::Start => self.request_start(now),
            Command::Stop => {
                self.stop();
            }
            Command::Toggle => {
                if self.state.is_idle() {
                    self.request_start(now);
                } else {
                    self.stop();
                }
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    // ── Lifecycle ───────────────────────────────────────────────

    fn request_start(&mut self, now: Timestamp) {
        match self.state {
            SessionState::Idle => {
                if self.channel.is_open() {
                    self.enter_running(now);
                } else {
                    info!("Coordinator: channel not open yet, deferring start");
                    self.state = SessionState::Starting { requested_at: now };
                    self.start_retry_at = Some(now.add(self.config.start_retry()));
                }
            }
            state => debug!("Coordinator: start ignored while {}", state),
        }
    }

    fn retry_start(&mut self, now: Timestamp) {
        self.start_retry_at = None;
        if let SessionState::Starting { requested_at } = self.state {
            if self.channel.is_open() {
                self.enter_running(now);
            } else {
                debug!(
                    "Coordinator: still waiting for channel ({:?})",
                    now.since(requested_at)
                );
                self.start_retry_at = Some(now.add(self.config.start_retry()));
            }
        }
    }

    fn enter_running(&mut self, now: Timestamp) {
        let target = SessionState::Running { started_at: now };
        debug_assert!(self.state.can_transition_to(&target));

        self.generation += 1;
        self.state = target;
        self.session.running = true;
        self.start_retry_at = None;
        self.frames.clear();
        self.stats.reset(now);
        self.scheduler.start(now);

        info!("Coordinator: session running for device {}", self.session.device_id);
        self.emit(PipelineEvent::Started {
            device_id: self.session.device_id.clone(),
        });
    }

    /// Stop the session. Returns false if there was nothing to stop.
    pub fn stop(&mut self) -> bool {
        match self.state {
            SessionState::Idle | SessionState::Stopping => false,
            SessionState::Starting { .. } => {
                info!("Coordinator: pending start abandoned");
                self.start_retry_at = None;
                self.state = SessionState::Idle;
                true
            }
            SessionState::Running { started_at } => {
                self.state = SessionState::Stopping;
                self.session.running = false;
                self.generation += 1;
                debug!("Scheduler: {:?} -> Stopped", self.scheduler.state());
                self.scheduler.stop();
                let dropped = self.frames.clear();
                self.presenter.clear();

                let stats = self.stats.snapshot();
                info!(
                    "Coordinator: session stopped after {:?}: sent {} frames, received {} results, {:.1} fps, {:.0}ms latency ({} pending dropped)",
                    self.clock.now().since(started_at),
                    stats.sent_frames,
                    stats.received_results,
                    stats.fps,
                    self.stats.latency_ms(),
                    dropped
                );
                info!("Coordinator: {}", self.health.summary());

                self.state = SessionState::Idle;
                self.emit(PipelineEvent::Stopped { summary: stats });
                true
            }
        }
    }

    /// Transport-fatal failure: stop and tell the collaborator.
    fn disconnect(&mut self, reason: String) {
        if self.stop() {
            warn!("Coordinator: disconnected: {}", reason);
            self.emit(PipelineEvent::Disconnected { reason });
        } else {
            debug!("Coordinator: channel down while idle: {}", reason);
        }
    }

    // ── Channel ─────────────────────────────────────────────────

    fn on_channel_event(&mut self, event: ChannelEvent, now: Timestamp) {
        match event {
            ChannelEvent::Open => {
                info!("Coordinator: channel open");
                if self.state.is_starting() {
                    self.enter_running(now);
                }
            }
            ChannelEvent::Message(text) => self.on_message(&text, now),
            ChannelEvent::Error(e) => self.disconnect(format!("channel error: {}", e)),
            ChannelEvent::Close { code, reason } => {
                self.disconnect(format!("channel closed ({}) {}", code, reason))
            }
        }
    }

    fn on_message(&mut self, text: &str, now: Timestamp) {
        if !self.state.is_running() {
            debug!("Coordinator: ignoring message, session not running");
            return;
        }

        match parse_inbound(text) {
            Ok(Inbound::Result(result)) => self.on_result(result, now),
            Ok(Inbound::Other(kind)) => {
                self.health.record_ignored();
                debug!("Coordinator: ignoring '{}' message", kind);
            }
            Err(e) => {
                self.health.record_malformed();
                warn!("Coordinator: malformed message ({}): {:.200}", e, text);
                if e.is_result() {
                    self.on_unreadable_result(e.frame_id(), now);
                }
            }
        }
    }

    /// A result that could not be decoded still answers a frame: release its
    /// slot without timing or rendering it.
    fn on_unreadable_result(&mut self, frame_id: Option<u64>, now: Timestamp) {
        self.stats.record_received();
        match self.frames.correlate(frame_id, now, 0.0) {
            Some(hit) => debug!(
                "Coordinator: frame {} released by an unreadable result",
                hit.record.frame_id
            ),
            None => self.health.record_uncorrelated(),
        }
        self.stats.refresh(now);
    }

    fn on_result(&mut self, result: DetectionResult, now: Timestamp) {
        self.stats.record_received();
        if result.skipped_objects > 0 {
            debug!(
                "Coordinator: {} undecodable object(s) left out of the result",
                result.skipped_objects
            );
        }
        if self.config.strict_correlation && result.frame_id.is_none() && !self.warned_unechoed {
            self.warned_unechoed = true;
            warn!(
                "Coordinator: service does not echo frame ids; with strict correlation pending frames are never released and capture will stall"
            );
        }

        let server_latency = result.server_latency_ms.unwrap_or(0.0).max(0.0);
        match self.frames.correlate(result.frame_id, now, server_latency) {
            Some(hit) => {
                trace!(
                    "Coordinator: frame {} answered ({:?}) in {:.1}ms",
                    hit.record.frame_id, hit.mode, hit.latency_ms
                );
                self.stats.record_latency(hit.latency_ms);
            }
            None => {
                self.health.record_uncorrelated();
                debug!("Coordinator: result without a pending frame, not timed");
            }
        }

        self.stats.refresh(now);
        self.presenter.render(&result, &self.stats.snapshot());
    }

    // ── Capture loop ────────────────────────────────────────────

    fn on_wake(&mut self, now: Timestamp) {
        if self.start_retry_at.is_some_and(|at| at <= now) {
            self.retry_start(now);
        }
        if self.scheduler.is_due(now) {
            self.on_tick(now);
        }
    }

    fn on_tick(&mut self, now: Timestamp) {
        let may_run = self.session.running && self.channel.is_open();
        match self.scheduler.tick(now, self.frames.len(), may_run) {
            Tick::Capture => self.begin_capture(now),
            Tick::Throttle(backoff) => {
                self.health.record_throttle();
                let waiting = self
                    .frames
                    .oldest()
                    .map(|record| now.since(record.sent_at))
                    .unwrap_or_default();
                debug!(
                    "Scheduler: {} frames pending (oldest {:?}), backing off {:?}",
                    self.frames.len(),
                    waiting,
                    backoff
                );
            }
            Tick::Wait(_) => {}
            Tick::Halt => debug!("Scheduler: stopped"),
        }
    }

    fn begin_capture(&mut self, now: Timestamp) {
        let Some(mut capturer) = self.capturer.take() else {
            // a capture from the previous session has not returned yet
            debug!("Scheduler: device busy, skipping tick");
            self.scheduler.settle(now);
            return;
        };

        let generation = self.generation;
        let clock_read = wall_clock_millis();
        self.inflight.push(
            async move {
                let outcome = capturer.capture().await;
                Completion::Captured {
                    capturer,
                    generation,
                    started: now,
                    clock_read,
                    outcome,
                }
            }
            .boxed(),
        );
    }

    fn on_completion(&mut self, completion: Completion, now: Timestamp) {
        match completion {
            Completion::Captured {
                capturer,
                generation,
                started,
                clock_read,
                outcome,
            } => {
                self.capturer = Some(capturer);
                if generation != self.generation || !self.session.running {
                    debug!("Coordinator: discarding frame captured by a stopped session");
                    return;
                }

                match outcome {
                    Ok(frame) => self.dispatch(frame, started, clock_read, now),
                    Err(e) => {
                        if e.is_oversized() {
                            self.health.record_oversized();
                        } else {
                            self.health.record_capture_failure();
                        }
                        warn!("Capturer: frame dropped: {}", e);
                        self.scheduler.settle(now);
                    }
                }
            }
            Completion::Sent {
                generation,
                frame_id,
                result,
            } => {
                if generation != self.generation {
                    return;
                }

                if let Err(e) = result {
                    self.health.record_send_failure();
                    self.frames.remove(frame_id);
                    warn!("Coordinator: frame {} not sent: {}", frame_id, e);
                    if e.is_terminal() {
                        self.disconnect(e.to_string());
                        return;
                    }
                } else {
                    trace!("Coordinator: frame {} sent", frame_id);
                }
                self.scheduler.settle(now);
            }
        }
    }

    /// Register the frame and hand it to the channel.
    fn dispatch(
        &mut self,
        frame: Bytes,
        capture_start: Timestamp,
        clock_read: u64,
        now: Timestamp,
    ) {
        let frame_id = self.frame_ids.next(clock_read);
        self.frames.register(FrameRecord {
            frame_id,
            capture_start,
            sent_at: now,
            capture_duration: now.since(capture_start),
        });
        self.stats.record_sent();
        self.health.record_sent(frame.len());
        self.stats.refresh(now);

        debug!(
            "Coordinator: sending frame {} ({:.1}KB, captured in {:?})",
            frame_id,
            frame.len() as f64 / 1024.0,
            now.since(capture_start)
        );

        let channel = Arc::clone(&self.channel);
        let generation = self.generation;
        self.inflight.push(
            async move {
                let result = channel.send(frame).await;
                Completion::Sent {
                    generation,
                    frame_id,
                    result,
                }
            }
            .boxed(),
        );
    }
}
