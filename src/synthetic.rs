//! In-process stand-in for the simulation service: random-walk agents with a
//! simple infection progression. Used by the `demo_replay` binary.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::frame::{Category, Frame, LocationRect, WorldLayout};
use crate::params::RunParams;
use crate::remote::{LatestStepReply, RemoteReply, RemoteStepSource, StepOutcome};

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub seed: u64,
    /// Steps produced before the service reports END.
    pub max_steps: u64,
    pub infect_prob: f64,
    pub detect_prob: f64,
    pub recover_prob: f64,
    pub death_prob: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            max_steps: 240,
            infect_prob: 0.3,
            detect_prob: 0.08,
            recover_prob: 0.04,
            death_prob: 0.004,
        }
    }
}

#[derive(Debug, Clone)]
struct Agent {
    x: f64,
    y: f64,
    home: u64,
    status: Category,
    mask: bool,
    doses: u32,
}

struct Run {
    params: RunParams,
    rng: StdRng,
    agents: Vec<Agent>,
    frames: Vec<Frame>,
}

pub struct SyntheticSource {
    cfg: SyntheticConfig,
    runs: Mutex<BTreeMap<String, Run>>,
}

impl SyntheticSource {
    pub fn new(cfg: SyntheticConfig) -> Self {
        Self { cfg, runs: Mutex::new(BTreeMap::new()) }
    }

    fn spawn(&self, params: &RunParams) -> Run {
        let mut rng = StdRng::seed_from_u64(self.cfg.seed);
        let (w, h) = (params.grid_width as f64, params.grid_height as f64);
        let one_dose = params.vaccinated_pct.first().copied().unwrap_or(0.0) / 100.0;
        let two_doses = params.vaccinated_pct.get(1).copied().unwrap_or(0.0) / 100.0;

        let agents = (0..params.num_agents)
            .map(|i| {
                let roll: f64 = rng.gen();
                let doses = if roll < two_doses {
                    2
                } else if roll < two_doses + one_dose {
                    1
                } else {
                    0
                };
                Agent {
                    x: rng.gen_range(0.0..w),
                    y: rng.gen_range(0.0..h),
                    home: i % params.locations.len().max(1) as u64,
                    status: if i < params.initial_infected { Category::Undetected } else { Category::Susceptible },
                    mask: rng.gen_bool(0.5),
                    doses,
                }
            })
            .collect();

        let mut run = Run { params: params.clone(), rng, agents, frames: Vec::new() };
        let first = snapshot(&run, 0);
        run.frames.push(first);
        run
    }

    fn advance(&self, run: &mut Run) {
        let (w, h) = (run.params.grid_width as f64, run.params.grid_height as f64);
        let infected: Vec<(f64, f64)> = run
            .agents
            .iter()
            .filter(|a| matches!(a.status, Category::Undetected | Category::Detected))
            .map(|a| (a.x, a.y))
            .collect();

        for agent in run.agents.iter_mut() {
            if agent.status != Category::Deceased {
                agent.x = (agent.x + run.rng.gen_range(-1.0..=1.0)).clamp(0.0, w);
                agent.y = (agent.y + run.rng.gen_range(-1.0..=1.0)).clamp(0.0, h);
            }
            agent.status = match agent.status {
                Category::Susceptible => {
                    let exposed = infected.iter().any(|&(x, y)| (x - agent.x).abs() < 1.0 && (y - agent.y).abs() < 1.0);
                    let mask_factor = if agent.mask { 0.5 } else { 1.0 };
                    let shield = mask_factor / (1 + agent.doses) as f64;
                    if exposed && run.rng.gen_bool((self.cfg.infect_prob * shield).clamp(0.0, 1.0)) {
                        Category::Undetected
                    } else {
                        Category::Susceptible
                    }
                }
                Category::Undetected if run.rng.gen_bool(self.cfg.detect_prob) => Category::Detected,
                Category::Detected if run.rng.gen_bool(self.cfg.death_prob) => Category::Deceased,
                Category::Undetected | Category::Detected if run.rng.gen_bool(self.cfg.recover_prob) => {
                    Category::Recovered
                }
                other => other,
            };
        }
        let step = run.frames.len() as u64;
        let frame = snapshot(run, step);
        run.frames.push(frame);
    }
}

fn snapshot(run: &Run, step: u64) -> Frame {
    let locations = run.params.locations.len().max(1) as f64;
    let strip = run.params.grid_height as f64 / locations;
    let mut counts = BTreeMap::new();
    for agent in &run.agents {
        *counts.entry(agent.status.label().to_string()).or_insert(0) += 1;
    }
    Frame {
        step,
        positions: run.agents.iter().map(|a| [a.x, a.y]).collect(),
        home_location_id: run.agents.iter().map(|a| a.home).collect(),
        current_location_id: run
            .agents
            .iter()
            .map(|a| ((a.y / strip) as u64).min(locations as u64 - 1))
            .collect(),
        infection_status: run.agents.iter().map(|a| a.status.label().to_string()).collect(),
        mask: run.agents.iter().map(|a| a.mask).collect(),
        vaccination_doses: run.agents.iter().map(|a| a.doses).collect(),
        category_counts: counts,
    }
}

#[async_trait]
impl RemoteStepSource for SyntheticSource {
    async fn init(&self, model: &str, params: &RunParams) -> RemoteReply {
        let run = self.spawn(params);
        match self.runs.lock() {
            Ok(mut runs) => {
                runs.insert(model.to_string(), run);
                RemoteReply::ok(format!("model {} created", model))
            }
            Err(_) => RemoteReply::failed("state poisoned"),
        }
    }

    async fn step(&self, model: &str, step: u64) -> StepOutcome {
        let Ok(mut runs) = self.runs.lock() else {
            return StepOutcome::Failure("state poisoned".to_string());
        };
        let Some(run) = runs.get_mut(model) else {
            return StepOutcome::Failure(format!("unknown model {}", model));
        };
        if step > self.cfg.max_steps {
            return StepOutcome::Ended;
        }
        while (run.frames.len() as u64) <= step {
            self.advance(run);
        }
        StepOutcome::Frame(run.frames[step as usize].clone())
    }

    async fn world_map(&self, model: &str) -> Result<WorldLayout, String> {
        let runs = self.runs.lock().map_err(|_| "state poisoned".to_string())?;
        let run = runs.get(model).ok_or_else(|| format!("unknown model {}", model))?;
        let strip = run.params.grid_height as f64 / run.params.locations.len().max(1) as f64;
        let locations = run
            .params
            .locations
            .iter()
            .enumerate()
            .map(|(i, quota)| LocationRect {
                x_min: 0.0,
                x_max: run.params.grid_width as f64,
                y_min: i as f64 * strip,
                y_max: (i + 1) as f64 * strip,
                kind: quota.kind.clone(),
            })
            .collect();
        Ok(WorldLayout { locations })
    }

    async fn old_data(&self, model: &str, step: u64) -> StepOutcome {
        let Ok(runs) = self.runs.lock() else {
            return StepOutcome::Failure("state poisoned".to_string());
        };
        match runs.get(model).and_then(|r| r.frames.get(step as usize)) {
            Some(frame) => StepOutcome::Frame(frame.clone()),
            None => StepOutcome::Failure(format!("no data for step {}", step)),
        }
    }

    async fn latest_step(&self, model: &str) -> LatestStepReply {
        let latest = self
            .runs
            .lock()
            .ok()
            .and_then(|runs| runs.get(model).map(|r| r.frames.len() as u64 - 1));
        match latest {
            Some(latest_step) => LatestStepReply { success: true, latest_step },
            None => LatestStepReply { success: false, latest_step: 0 },
        }
    }

    async fn terminate(&self, model: &str) -> RemoteReply {
        RemoteReply::ok(format!("model {} stopped", model))
    }

    async fn delete(&self, model: &str) -> RemoteReply {
        match self.runs.lock() {
            Ok(mut runs) => match runs.remove(model) {
                Some(_) => RemoteReply::ok(format!("model {} deleted", model)),
                None => RemoteReply::failed(format!("unknown model {}", model)),
            },
            Err(_) => RemoteReply::failed("state poisoned"),
        }
    }
}
