//! API request and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::{FollowUpContext, HistorySeed, RunPhase};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
}

/// Body for appending or editing an instruction.
#[derive(Debug, Clone, Deserialize)]
pub struct InstructionRequest {
    /// Instruction text; a missing field appends an empty entry.
    #[serde(default)]
    pub text: String,
}

/// Which sequence of steps a run executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunModeKind {
    #[default]
    Instructions,
    Iterations,
}

/// Request to start a run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRunRequest {
    /// Topic for the run (defaults to the built-in topic)
    pub topic: Option<String>,

    #[serde(default)]
    pub mode: RunModeKind,

    /// Follow-up count in iteration mode (defaults to the configured value)
    pub iterations: Option<u32>,

    /// Follow-up instruction override in iteration mode
    pub follow_up: Option<String>,

    #[serde(default)]
    pub carry: FollowUpContext,

    /// Turns the run's history starts with
    pub seed: Option<HistorySeed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartRunResponse {
    pub session_id: Uuid,
    pub topic: String,
    pub steps: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
    pub phase: RunPhase,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructionsResponse {
    pub items: Vec<String>,
    /// Entry removed by a remove-last request, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<String>,
}
