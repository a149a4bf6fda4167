//! Stepped playback over a remote simulation run.
//!
//! Every step request (autoplay tick, seek buttons, slider) goes through
//! [`PlaybackController::begin`], which resolves from the cache when it can
//! and otherwise hands back a [`FetchTicket`]. The caller performs the fetch
//! and returns the outcome through [`PlaybackController::complete`]; a ticket
//! whose step is no longer the one on screen only updates the cache.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::config::PlaybackConfig;
use crate::frame::{Frame, WorldLayout};
use crate::history::{HistoryStore, Lookup};
use crate::logging::{
    log, log_fetch, log_mode_change, log_notice, log_stale, log_step_resolved, obj, v_str, Domain, Level,
};
use crate::params::{ParamsError, RunParams};
use crate::present::{agent_points, day_of, StepView};
use crate::remote::{RemoteReply, RemoteStepSource, StepOutcome};
use crate::series::SeriesAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Idle,
    Running,
    Paused,
    Ended,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Running => "running",
            Mode::Paused => "paused",
            Mode::Ended => "ended",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchKind {
    /// Step beyond the frontier, served by the step endpoint.
    Frontier,
    /// Evicted step, served by the old-data endpoint.
    Historical,
}

/// An outstanding request, tagged with the step it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub model: String,
    pub step: u64,
    pub kind: FetchKind,
    run: u64,
}

/// Message for the notification layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub success: bool,
    pub message: String,
}

impl Notice {
    fn ok(message: impl Into<String>) -> Self {
        let n = Self { success: true, message: message.into() };
        log_notice(n.success, &n.message);
        n
    }

    fn error(message: impl Into<String>) -> Self {
        let n = Self { success: false, message: message.into() };
        log_notice(n.success, &n.message);
        n
    }
}

/// What a playback request amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Step is on screen.
    Presented(StepView),
    /// A fetch is needed before anything can be shown.
    Pending(FetchTicket),
    /// Response stored but not shown; the user has moved on.
    Cached(u64),
    /// The simulation reported completion.
    Ended(Notice),
    Failed(Notice),
    /// Nothing to do (paused tick, no active run, response from an old run).
    Ignored,
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("invalid run parameters: {0}")]
    InvalidParams(#[from] ParamsError),

    #[error("simulation service rejected the run: {0}")]
    InitRejected(String),
}

pub struct PlaybackController<S: RemoteStepSource + ?Sized> {
    source: Arc<S>,
    model: String,
    cfg: PlaybackConfig,
    history: HistoryStore,
    series: SeriesAggregator,
    world: WorldLayout,
    agent_count: Option<usize>,
    current_step: Option<u64>,
    mode: Mode,
    /// Bumped on every initiate/reset so late responses from a previous
    /// run are dropped.
    run: u64,
    in_flight: usize,
}

impl<S: RemoteStepSource + ?Sized + 'static> PlaybackController<S> {
    pub fn new(source: Arc<S>, model: impl Into<String>, cfg: PlaybackConfig) -> Self {
        let history = HistoryStore::new(cfg.retention_window);
        let series = SeriesAggregator::new(&cfg.categories, cfg.marker_margin);
        Self {
            source,
            model: model.into(),
            cfg,
            history,
            series,
            world: WorldLayout::default(),
            agent_count: None,
            current_step: None,
            mode: Mode::Idle,
            run: 0,
            in_flight: 0,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// `None` until the first run starts.
    pub fn current_step(&self) -> Option<u64> {
        self.current_step
    }

    pub fn latest_step(&self) -> u64 {
        self.history.latest()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn series(&self) -> &SeriesAggregator {
        &self.series
    }

    pub fn world(&self) -> &WorldLayout {
        &self.world
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            log_mode_change(&self.model, self.mode.as_str(), mode.as_str());
            self.mode = mode;
        }
    }

    fn reset(&mut self) {
        self.run += 1;
        self.history.clear();
        self.series.reset();
        self.world = WorldLayout::default();
        self.agent_count = None;
        self.in_flight = 0;
    }

    // -------------------------------------------------------------------------
    // Run lifecycle
    // -------------------------------------------------------------------------

    /// Validate, start a run on the service, load the world map and resolve
    /// step 1. Nothing changes if validation or the init call fails.
    pub async fn initiate(&mut self, params: &RunParams) -> Result<Resolution, PlaybackError> {
        if let Err(err) = params.validate() {
            log(
                Level::Warn,
                Domain::Params,
                "rejected",
                obj(&[("model", v_str(&self.model)), ("msg", v_str(&err.to_string()))]),
            );
            return Err(err.into());
        }

        let reply = self.source.init(&self.model, params).await;
        if !reply.success {
            log_notice(false, &reply.message);
            return Err(PlaybackError::InitRejected(reply.message));
        }
        log(
            Level::Info,
            Domain::Playback,
            "initiated",
            obj(&[
                ("model", v_str(&self.model)),
                ("params_hash", v_str(&params.fingerprint())),
                ("msg", v_str(&reply.message)),
            ]),
        );

        self.reset();
        self.current_step = Some(0);
        self.set_mode(Mode::Paused);

        match self.source.world_map(&self.model).await {
            Ok(world) => self.world = world,
            Err(msg) => {
                log(
                    Level::Warn,
                    Domain::Remote,
                    "world_map_failed",
                    obj(&[("model", v_str(&self.model)), ("msg", v_str(&msg))]),
                );
            }
        }

        Ok(self.advance(None).await)
    }

    /// Tell the service to stop the run, then return to `Idle` whatever it
    /// answered.
    pub async fn terminate(&mut self) -> RemoteReply {
        let reply = self.source.terminate(&self.model).await;
        self.shut_down("terminate", &reply);
        reply
    }

    /// Like [`terminate`](Self::terminate) but also drops the model on the
    /// service side.
    pub async fn delete(&mut self) -> RemoteReply {
        let reply = self.source.delete(&self.model).await;
        self.shut_down("delete", &reply);
        reply
    }

    fn shut_down(&mut self, action: &str, reply: &RemoteReply) {
        log_fetch(&self.model, self.latest_step(), action, if reply.success { "ok" } else { "failed" });
        self.reset();
        self.current_step = Some(0);
        self.set_mode(Mode::Idle);
    }

    // -------------------------------------------------------------------------
    // Step resolution
    // -------------------------------------------------------------------------

    /// Move to `target` (clamped to step 1) or to the next step, and resolve
    /// it from the cache if possible.
    pub fn begin(&mut self, target: Option<u64>) -> Resolution {
        if self.mode == Mode::Idle {
            return Resolution::Ignored;
        }
        let step = match target {
            Some(t) => t.max(1),
            None => self.current_step.unwrap_or(0) + 1,
        };
        self.current_step = Some(step);

        match self.history.get(step) {
            Lookup::Frame(frame) => {
                log_step_resolved(&self.model, step, "cache");
                Resolution::Presented(self.view(step, &frame))
            }
            Lookup::Tombstone => self.ticket(step, FetchKind::Historical),
            Lookup::Absent if self.mode == Mode::Ended => {
                Resolution::Ended(Notice::ok(format!("simulation ended at step {}", self.latest_step())))
            }
            Lookup::Absent => self.ticket(step, FetchKind::Frontier),
        }
    }

    fn ticket(&mut self, step: u64, kind: FetchKind) -> Resolution {
        self.in_flight += 1;
        Resolution::Pending(FetchTicket { model: self.model.clone(), step, kind, run: self.run })
    }

    /// The request a ticket stands for. Owns everything it needs, so it can
    /// be polled while the controller keeps serving other calls.
    pub fn fetch(&self, ticket: FetchTicket) -> impl Future<Output = (FetchTicket, StepOutcome)> + Send + 'static {
        let source = Arc::clone(&self.source);
        async move {
            let outcome = match ticket.kind {
                FetchKind::Frontier => source.step(&ticket.model, ticket.step).await,
                FetchKind::Historical => source.old_data(&ticket.model, ticket.step).await,
            };
            (ticket, outcome)
        }
    }

    /// Apply a finished fetch.
    pub fn complete(&mut self, ticket: FetchTicket, outcome: StepOutcome) -> Resolution {
        let kind = match ticket.kind {
            FetchKind::Frontier => "frontier",
            FetchKind::Historical => "historical",
        };
        log_fetch(&ticket.model, ticket.step, kind, outcome.as_str());

        if ticket.run != self.run {
            log_stale(&ticket.model, ticket.step, self.current_step.unwrap_or(0));
            return Resolution::Ignored;
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        let step = ticket.step;
        let on_screen = self.current_step == Some(step);

        let outcome = match outcome {
            StepOutcome::Frame(mut frame) => {
                frame.step = step;
                match self.check_frame(frame) {
                    Ok(frame) => StepOutcome::Frame(frame),
                    Err(msg) => StepOutcome::Failure(msg),
                }
            }
            other => other,
        };

        match (ticket.kind, outcome) {
            (FetchKind::Frontier, StepOutcome::Frame(frame)) => {
                let frame = Arc::new(frame);
                self.history.put(step, Arc::clone(&frame));
                self.series.record(step, &frame.category_counts);
                self.present_or_cache(step, &frame, on_screen, "remote")
            }
            (FetchKind::Historical, StepOutcome::Frame(frame)) => {
                let frame = Arc::new(frame);
                if !self.history.rehydrate(step, Arc::clone(&frame)) {
                    return Resolution::Failed(Notice::error(format!("step {} is not a known step", step)));
                }
                self.present_or_cache(step, &frame, on_screen, "old_data")
            }
            (FetchKind::Frontier, StepOutcome::Ended) => {
                self.set_mode(Mode::Ended);
                Resolution::Ended(Notice::ok(format!("simulation ended at step {}", self.latest_step())))
            }
            (_, StepOutcome::Ended | StepOutcome::Failure(_)) if !on_screen => {
                log_stale(&self.model, step, self.current_step.unwrap_or(0));
                Resolution::Ignored
            }
            (FetchKind::Frontier, StepOutcome::Failure(msg)) => {
                self.set_mode(Mode::Ended);
                Resolution::Failed(Notice::error(msg))
            }
            (FetchKind::Historical, StepOutcome::Ended) => {
                Resolution::Failed(Notice::error(format!("no stored data for step {}", step)))
            }
            (FetchKind::Historical, StepOutcome::Failure(msg)) => Resolution::Failed(Notice::error(msg)),
        }
    }

    fn present_or_cache(&self, step: u64, frame: &Frame, on_screen: bool, source: &str) -> Resolution {
        if on_screen {
            log_step_resolved(&self.model, step, source);
            Resolution::Presented(self.view(step, frame))
        } else {
            log_stale(&self.model, step, self.current_step.unwrap_or(0));
            Resolution::Cached(step)
        }
    }

    fn check_frame(&mut self, mut frame: Frame) -> Result<Frame, String> {
        frame.validate().map_err(|e| e.to_string())?;
        match self.agent_count {
            Some(n) if n != frame.agent_count() => {
                return Err(format!("frame has {} agents, run has {}", frame.agent_count(), n));
            }
            Some(_) => {}
            None => self.agent_count = Some(frame.agent_count()),
        }
        frame.ensure_counts();
        Ok(frame)
    }

    /// Resolve a step request all the way, awaiting the fetch if one is needed.
    pub async fn settle(&mut self, resolution: Resolution) -> Resolution {
        match resolution {
            Resolution::Pending(ticket) => {
                let (ticket, outcome) = self.fetch(ticket).await;
                self.complete(ticket, outcome)
            }
            other => other,
        }
    }

    pub async fn advance(&mut self, target: Option<u64>) -> Resolution {
        let r = self.begin(target);
        self.settle(r).await
    }

    // -------------------------------------------------------------------------
    // Autoplay and seeking
    // -------------------------------------------------------------------------

    /// Autoplay step. No-op unless running with no request outstanding.
    pub fn tick(&mut self) -> Resolution {
        if self.mode != Mode::Running || self.in_flight > 0 {
            return Resolution::Ignored;
        }
        self.begin(None)
    }

    pub fn toggle_play(&mut self) -> Mode {
        match self.mode {
            Mode::Running => self.set_mode(Mode::Paused),
            Mode::Paused => self.set_mode(Mode::Running),
            Mode::Idle | Mode::Ended => {}
        }
        self.mode
    }

    fn interrupt(&mut self) {
        if self.mode == Mode::Running {
            self.set_mode(Mode::Paused);
        }
    }

    /// Jump back one retention window, the oldest step that is still cached.
    pub fn seek_first(&mut self) -> Resolution {
        self.interrupt();
        let cur = self.current_step.unwrap_or(0);
        self.begin(Some(cur.saturating_sub(self.history.retention())))
    }

    pub fn seek_previous(&mut self) -> Resolution {
        self.interrupt();
        let cur = self.current_step.unwrap_or(0);
        self.begin(Some(cur.saturating_sub(1)))
    }

    pub fn seek_next(&mut self) -> Resolution {
        self.interrupt();
        let cur = self.current_step.unwrap_or(0);
        self.begin(Some(cur + 1))
    }

    /// Slider seek.
    pub fn seek_to(&mut self, step: u64) -> Resolution {
        self.interrupt();
        self.begin(Some(step))
    }

    /// Ask the service for its latest step and move one past it.
    pub async fn seek_latest(&mut self) -> Resolution {
        if self.mode == Mode::Idle {
            return Resolution::Ignored;
        }
        self.interrupt();
        let reply = self.source.latest_step(&self.model).await;
        if !reply.success {
            return Resolution::Failed(Notice::error("could not query the latest step"));
        }
        self.begin(Some(reply.latest_step + 1))
    }

    fn view(&self, step: u64, frame: &Frame) -> StepView {
        StepView {
            step,
            day: day_of(step, self.cfg.steps_per_day),
            points: agent_points(frame),
            series: self.series.snapshot(self.latest_step().max(step)),
            marker: self.series.marker_at(step),
        }
    }
}
