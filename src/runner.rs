//! Driving loop: one task owns the controller and interleaves the autoplay
//! tick, user commands and completed fetches. Cache and series state are
//! only touched on this task's turn, so nothing is locked.

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::frame::WorldLayout;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::params::RunParams;
use crate::playback::{FetchTicket, Mode, Notice, PlaybackController, Resolution};
use crate::present::StepView;
use crate::remote::{RemoteStepSource, StepOutcome};
use serde_json::json;

#[derive(Debug, Clone)]
pub enum Command {
    Initiate(RunParams),
    TogglePlay,
    SeekFirst,
    SeekPrevious,
    SeekNext,
    SeekLatest,
    SeekTo(u64),
    Terminate,
    Delete,
    Shutdown,
}

impl Command {
    /// Parse a console line. `init` is not accepted here because it needs
    /// run parameters.
    pub fn parse(line: &str) -> Result<Command, String> {
        let mut parts = line.split_whitespace();
        let cmd = match parts.next() {
            Some("play") | Some("pause") | Some("toggle") => Command::TogglePlay,
            Some("first") => Command::SeekFirst,
            Some("prev") | Some("previous") => Command::SeekPrevious,
            Some("next") => Command::SeekNext,
            Some("latest") => Command::SeekLatest,
            Some("seek") => {
                let step = parts
                    .next()
                    .ok_or_else(|| "seek needs a step".to_string())?
                    .parse::<u64>()
                    .map_err(|e| format!("bad step: {}", e))?;
                Command::SeekTo(step)
            }
            Some("terminate") => Command::Terminate,
            Some("delete") => Command::Delete,
            Some("quit") | Some("exit") => Command::Shutdown,
            Some(other) => return Err(format!("unknown command: {}", other)),
            None => return Err("empty command".to_string()),
        };
        Ok(cmd)
    }
}

/// Output for the rendering and notification layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    World(WorldLayout),
    Present(StepView),
    Notice(Notice),
    Mode { mode: Mode },
}

type Inflight = FuturesUnordered<BoxFuture<'static, (FetchTicket, StepOutcome)>>;

/// Run until `Shutdown` or until the command channel closes, then hand the
/// controller back.
pub async fn run<S>(
    mut controller: PlaybackController<S>,
    tick: Duration,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<Event>,
) -> PlaybackController<S>
where
    S: RemoteStepSource + ?Sized + 'static,
{
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending: Inflight = FuturesUnordered::new();
    let mut last_mode = controller.mode();

    log(
        Level::Info,
        Domain::System,
        "runner_start",
        obj(&[("model", v_str(controller.model())), ("tick_ms", json!(tick.as_millis() as u64))]),
    );

    loop {
        // completions first, so a command always sees every response
        // that has already arrived
        let resolution = tokio::select! {
            biased;
            Some((ticket, outcome)) = pending.next(), if !pending.is_empty() => {
                controller.complete(ticket, outcome)
            }
            cmd = commands.recv() => match cmd {
                None | Some(Command::Shutdown) => break,
                Some(cmd) => apply(&mut controller, cmd, &events).await,
            },
            _ = ticker.tick() => controller.tick(),
        };

        dispatch(&controller, resolution, &mut pending, &events).await;

        if controller.mode() != last_mode {
            last_mode = controller.mode();
            let _ = events.send(Event::Mode { mode: last_mode }).await;
        }
    }

    log(
        Level::Info,
        Domain::System,
        "runner_stop",
        obj(&[
            ("model", v_str(controller.model())),
            ("step", json!(controller.current_step().unwrap_or(0))),
            ("abandoned", json!(pending.len())),
        ]),
    );
    controller
}

async fn apply<S>(controller: &mut PlaybackController<S>, cmd: Command, events: &mpsc::Sender<Event>) -> Resolution
where
    S: RemoteStepSource + ?Sized + 'static,
{
    match cmd {
        Command::Initiate(params) => match controller.initiate(&params).await {
            Ok(resolution) => {
                let _ = events.send(Event::World(controller.world().clone())).await;
                resolution
            }
            Err(err) => Resolution::Failed(Notice { success: false, message: err.to_string() }),
        },
        Command::TogglePlay => {
            controller.toggle_play();
            Resolution::Ignored
        }
        Command::SeekFirst => controller.seek_first(),
        Command::SeekPrevious => controller.seek_previous(),
        Command::SeekNext => controller.seek_next(),
        Command::SeekLatest => controller.seek_latest().await,
        Command::SeekTo(step) => controller.seek_to(step),
        Command::Terminate => remote_notice(controller.terminate().await),
        Command::Delete => remote_notice(controller.delete().await),
        Command::Shutdown => Resolution::Ignored,
    }
}

fn remote_notice(reply: crate::remote::RemoteReply) -> Resolution {
    let notice = Notice { success: reply.success, message: reply.message };
    if notice.success {
        Resolution::Ended(notice)
    } else {
        Resolution::Failed(notice)
    }
}

async fn dispatch<S>(
    controller: &PlaybackController<S>,
    resolution: Resolution,
    pending: &mut Inflight,
    events: &mpsc::Sender<Event>,
) where
    S: RemoteStepSource + ?Sized + 'static,
{
    let event = match resolution {
        Resolution::Presented(view) => Event::Present(view),
        Resolution::Pending(ticket) => {
            pending.push(controller.fetch(ticket).boxed());
            return;
        }
        Resolution::Ended(notice) | Resolution::Failed(notice) => Event::Notice(notice),
        Resolution::Cached(_) | Resolution::Ignored => return,
    };
    let _ = events.send(event).await;
}
