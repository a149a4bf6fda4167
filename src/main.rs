use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Duration;

use epiplay::client::HttpStepSource;
use epiplay::config::Config;
use epiplay::logging::{self, log, obj, v_str, Domain, Level};
use epiplay::params::RunParams;
use epiplay::playback::PlaybackController;
use epiplay::runner::{self, Command, Event};

fn load_params(cfg: &Config) -> Result<Option<RunParams>> {
    let Some(path) = &cfg.params_path else {
        return Ok(None);
    };
    let body = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let params: RunParams = serde_json::from_str(&body).with_context(|| format!("parsing {}", path))?;
    Ok(Some(params))
}

fn report(event: &Event) {
    match event {
        Event::World(world) => log(
            Level::Info,
            Domain::System,
            "world",
            obj(&[("locations", json!(world.locations.len()))]),
        ),
        Event::Present(view) => log(
            Level::Info,
            Domain::Playback,
            "present",
            obj(&[
                ("step", json!(view.step)),
                ("day", json!(view.day)),
                ("agents", json!(view.points.len())),
                ("running_max", json!(view.series.running_max)),
            ]),
        ),
        Event::Notice(notice) => log(
            if notice.success { Level::Info } else { Level::Error },
            Domain::System,
            "notice",
            obj(&[("success", json!(notice.success)), ("msg", v_str(&notice.message))]),
        ),
        Event::Mode { mode } => log(Level::Info, Domain::System, "mode", obj(&[("mode", v_str(mode.as_str()))])),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let params = load_params(&cfg)?;
    let source = Arc::new(HttpStepSource::new(&cfg)?);
    let controller = PlaybackController::new(source, cfg.model_name.clone(), cfg.playback());

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("model", v_str(&cfg.model_name)),
            ("server", v_str(&cfg.server_base)),
            ("retention", json!(cfg.retention_window)),
            ("tick_ms", json!(cfg.tick_ms)),
        ]),
    );

    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (ev_tx, mut ev_rx) = mpsc::channel(64);
    let driver = tokio::spawn(runner::run(controller, Duration::from_millis(cfg.tick_ms), cmd_rx, ev_tx));
    let printer = tokio::spawn(async move {
        while let Some(event) = ev_rx.recv().await {
            report(&event);
        }
    });

    if let Some(p) = &params {
        cmd_tx.send(Command::Initiate(p.clone())).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let cmd = if line == "init" {
            match &params {
                Some(p) => Command::Initiate(p.clone()),
                None => {
                    eprintln!("init needs PARAMS_PATH");
                    continue;
                }
            }
        } else {
            match Command::parse(line) {
                Ok(cmd) => cmd,
                Err(msg) => {
                    eprintln!("{}", msg);
                    continue;
                }
            }
        };
        let quit = matches!(cmd, Command::Shutdown);
        cmd_tx.send(cmd).await?;
        if quit {
            break;
        }
    }
    drop(cmd_tx);

    let controller = driver.await?;
    printer.await?;
    log(
        Level::Info,
        Domain::System,
        "shutdown",
        obj(&[("model", v_str(controller.model())), ("latest", json!(controller.latest_step()))]),
    );
    logging::flush();
    Ok(())
}
