//! Autoplay against the in-process synthetic service, then scrub back
//! through evicted history. No network needed.

use anyhow::{anyhow, Result};
use serde_json::json;
use std::sync::Arc;

use epiplay::config::Config;
use epiplay::logging::{self, log, obj, v_str, Domain, Level};
use epiplay::params::{LocationQuota, RunParams};
use epiplay::playback::{PlaybackController, Resolution};
use epiplay::synthetic::{SyntheticConfig, SyntheticSource};

fn demo_params() -> RunParams {
    RunParams {
        num_agents: 200,
        grid_width: 40,
        grid_height: 40,
        initial_infected: 5,
        locations: vec![
            LocationQuota { kind: "home".to_string(), capacity: 960 },
            LocationQuota { kind: "road".to_string(), capacity: 480 },
            LocationQuota { kind: "hospital".to_string(), capacity: 160 },
        ],
        vaccinated_pct: vec![20.0, 30.0],
        extra: Default::default(),
    }
}

fn describe(label: &str, r: &Resolution) {
    let (kind, step) = match r {
        Resolution::Presented(v) => ("presented", v.step),
        Resolution::Pending(t) => ("pending", t.step),
        Resolution::Cached(s) => ("cached", *s),
        Resolution::Ended(_) => ("ended", 0),
        Resolution::Failed(_) => ("failed", 0),
        Resolution::Ignored => ("ignored", 0),
    };
    log(
        Level::Info,
        Domain::Playback,
        "demo",
        obj(&[("action", v_str(label)), ("result", v_str(kind)), ("step", json!(step))]),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let ticks: u64 = std::env::var("DEMO_TICKS").ok().and_then(|v| v.parse().ok()).unwrap_or(60);
    let source = Arc::new(SyntheticSource::new(SyntheticConfig {
        max_steps: ticks / 2,
        ..Default::default()
    }));
    let mut controller = PlaybackController::new(source, "demo", cfg.playback());

    let first = controller
        .initiate(&demo_params())
        .await
        .map_err(|e| anyhow!("initiate failed: {}", e))?;
    describe("initiate", &first);

    controller.toggle_play();
    for _ in 0..ticks {
        let r = controller.tick();
        let r = controller.settle(r).await;
        if !matches!(r, Resolution::Ignored) {
            describe("tick", &r);
        }
    }

    for _ in 0..3 {
        let r = controller.seek_first();
        describe("first", &controller.settle(r).await);
    }
    let r = controller.seek_latest().await;
    describe("latest", &controller.settle(r).await);

    log(
        Level::Info,
        Domain::System,
        "demo_summary",
        obj(&[
            ("mode", v_str(controller.mode().as_str())),
            ("latest", json!(controller.latest_step())),
            ("resident", json!(controller.history().resident())),
            ("running_max", json!(controller.series().running_max())),
        ]),
    );
    logging::flush();
    Ok(())
}
