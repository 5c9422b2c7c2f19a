use serde::Serialize;

use super::runner::{RunContext, RunPhase, StepRecord};

/// Synchronous progress callbacks from the runner.
pub trait StepObserver: Send + Sync {
    /// Called once the context is prepared and before the first step.
    fn on_run_started(&self, _ctx: &RunContext) {}

    fn on_step_started(&self, step: usize, instruction: &str);

    fn on_step_completed(&self, record: &StepRecord, raw: &serde_json::Value);

    fn on_step_failed(&self, _step: usize, _error: &str) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl StepObserver for NoopObserver {
    fn on_step_started(&self, _step: usize, _instruction: &str) {}

    fn on_step_completed(&self, _record: &StepRecord, _raw: &serde_json::Value) {}
}

/// Events published to clients of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Status {
        phase: RunPhase,
        steps_completed: usize,
    },
    StepStarted {
        step: usize,
        instruction: String,
        message: String,
    },
    StepCompleted {
        step: usize,
        output: String,
        raw: serde_json::Value,
    },
    StepFailed {
        step: usize,
        error: String,
    },
    RunFinished {
        success: bool,
        message: String,
    },
}

impl PipelineEvent {
    pub fn step_started(step: usize, instruction: &str) -> Self {
        PipelineEvent::StepStarted {
            step,
            instruction: instruction.to_string(),
            message: format!("executing: {}", instruction),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            PipelineEvent::Status { .. } => "status",
            PipelineEvent::StepStarted { .. } => "step_started",
            PipelineEvent::StepCompleted { .. } => "step_completed",
            PipelineEvent::StepFailed { .. } => "step_failed",
            PipelineEvent::RunFinished { .. } => "run_finished",
        }
    }
}
