use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::frame::{Frame, WorldLayout};
use crate::params::RunParams;

/// Message the service sends when a run has no further steps.
pub const END_MESSAGE: &str = "END";

/// `{success, message}` envelope used by the control endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteReply {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl RemoteReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestStepReply {
    pub success: bool,
    #[serde(default)]
    pub latest_step: u64,
}

/// Body of a step or old-data response.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StepReply {
    Frame(Box<Frame>),
    Status(RemoteReply),
}

/// Result of asking the service for one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Frame(Frame),
    Ended,
    Failure(String),
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Frame(_) => "frame",
            StepOutcome::Ended => "ended",
            StepOutcome::Failure(_) => "failure",
        }
    }
}

impl From<StepReply> for StepOutcome {
    fn from(reply: StepReply) -> Self {
        match reply {
            StepReply::Frame(frame) => StepOutcome::Frame(*frame),
            StepReply::Status(status) if !status.success && status.message == END_MESSAGE => StepOutcome::Ended,
            StepReply::Status(status) if status.success => {
                StepOutcome::Failure("service reported success without a frame".to_string())
            }
            StepReply::Status(status) => StepOutcome::Failure(status.message),
        }
    }
}

/// The simulation service as seen by the playback core.
///
/// Implementations report failures as values; nothing here is retried.
#[async_trait]
pub trait RemoteStepSource: Send + Sync {
    async fn init(&self, model: &str, params: &RunParams) -> RemoteReply;
    async fn step(&self, model: &str, step: u64) -> StepOutcome;
    async fn world_map(&self, model: &str) -> Result<WorldLayout, String>;
    async fn old_data(&self, model: &str, step: u64) -> StepOutcome;
    async fn latest_step(&self, model: &str) -> LatestStepReply;
    async fn terminate(&self, model: &str) -> RemoteReply;
    async fn delete(&self, model: &str) -> RemoteReply;
}
