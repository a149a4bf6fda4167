#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use epiplay::config::PlaybackConfig;
use epiplay::frame::{Frame, LocationRect, WorldLayout};
use epiplay::params::{LocationQuota, RunParams};
use epiplay::remote::{LatestStepReply, RemoteReply, RemoteStepSource, StepOutcome};

pub const AGENTS: usize = 4;

pub fn frame(step: u64, agents: usize) -> Frame {
    let mut counts = BTreeMap::new();
    counts.insert("S".to_string(), 100u64.saturating_sub(step));
    counts.insert("IU".to_string(), step);
    Frame {
        step,
        positions: (0..agents).map(|i| [i as f64, step as f64]).collect(),
        home_location_id: vec![1; agents],
        current_location_id: (0..agents as u64).collect(),
        infection_status: vec!["S".to_string(); agents],
        mask: vec![false; agents],
        vaccination_doses: vec![0; agents],
        category_counts: counts,
    }
}

pub fn params() -> RunParams {
    RunParams {
        num_agents: AGENTS as u64,
        grid_width: 4,
        grid_height: 4,
        initial_infected: 1,
        locations: vec![
            LocationQuota { kind: "home".to_string(), capacity: 12 },
            LocationQuota { kind: "hospital".to_string(), capacity: 4 },
        ],
        vaccinated_pct: vec![50.0],
        extra: Default::default(),
    }
}

pub fn playback_config(retention: u64) -> PlaybackConfig {
    PlaybackConfig { retention_window: retention, ..Default::default() }
}

/// Scripted service: frames up to `max_steps`, END after, with call counters.
pub struct ScriptedSource {
    pub max_steps: u64,
    pub init_ok: AtomicBool,
    pub old_data_ok: AtomicBool,
    pub fail_steps: Mutex<BTreeSet<u64>>,
    pub wrong_agents_at: Mutex<Option<u64>>,
    pub server_latest: AtomicU64,
    pub init_calls: AtomicUsize,
    pub step_calls: AtomicUsize,
    pub old_data_calls: AtomicUsize,
    pub world_calls: AtomicUsize,
    pub terminate_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(max_steps: u64) -> Self {
        Self {
            max_steps,
            init_ok: AtomicBool::new(true),
            old_data_ok: AtomicBool::new(true),
            fail_steps: Mutex::new(BTreeSet::new()),
            wrong_agents_at: Mutex::new(None),
            server_latest: AtomicU64::new(0),
            init_calls: AtomicUsize::new(0),
            step_calls: AtomicUsize::new(0),
            old_data_calls: AtomicUsize::new(0),
            world_calls: AtomicUsize::new(0),
            terminate_calls: AtomicUsize::new(0),
        }
    }

    pub fn steps(&self) -> usize {
        self.step_calls.load(Ordering::SeqCst)
    }

    pub fn old_data(&self) -> usize {
        self.old_data_calls.load(Ordering::SeqCst)
    }

    pub fn fail_step(&self, step: u64) {
        self.fail_steps.lock().unwrap().insert(step);
    }
}

#[async_trait]
impl RemoteStepSource for ScriptedSource {
    async fn init(&self, model: &str, _params: &RunParams) -> RemoteReply {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.init_ok.load(Ordering::SeqCst) {
            RemoteReply::ok(format!("{} created", model))
        } else {
            RemoteReply::failed("model already exists")
        }
    }

    async fn step(&self, _model: &str, step: u64) -> StepOutcome {
        self.step_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_steps.lock().unwrap().contains(&step) {
            return StepOutcome::Failure(format!("step {} exploded", step));
        }
        if step > self.max_steps {
            return StepOutcome::Ended;
        }
        self.server_latest.fetch_max(step, Ordering::SeqCst);
        let agents = match *self.wrong_agents_at.lock().unwrap() {
            Some(s) if s == step => AGENTS + 1,
            _ => AGENTS,
        };
        StepOutcome::Frame(frame(step, agents))
    }

    async fn world_map(&self, _model: &str) -> Result<WorldLayout, String> {
        self.world_calls.fetch_add(1, Ordering::SeqCst);
        Ok(WorldLayout {
            locations: vec![LocationRect {
                x_min: 0.0,
                x_max: 4.0,
                y_min: 0.0,
                y_max: 3.0,
                kind: "home".to_string(),
            }],
        })
    }

    async fn old_data(&self, _model: &str, step: u64) -> StepOutcome {
        self.old_data_calls.fetch_add(1, Ordering::SeqCst);
        if self.old_data_ok.load(Ordering::SeqCst) {
            StepOutcome::Frame(frame(step, AGENTS))
        } else {
            StepOutcome::Failure("old data gone".to_string())
        }
    }

    async fn latest_step(&self, _model: &str) -> LatestStepReply {
        LatestStepReply { success: true, latest_step: self.server_latest.load(Ordering::SeqCst) }
    }

    async fn terminate(&self, model: &str) -> RemoteReply {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        RemoteReply::ok(format!("{} terminated", model))
    }

    async fn delete(&self, model: &str) -> RemoteReply {
        RemoteReply::ok(format!("{} deleted", model))
    }
}
