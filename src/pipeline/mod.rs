//! Prompt pipeline: an editable instruction list executed step by step against
//! one agent that shares a single conversation history.

mod events;
mod instructions;
mod runner;

pub use events::{NoopObserver, PipelineEvent, StepObserver};
pub use instructions::{InstructionList, ValidationError};
pub use runner::{
    FollowUpContext, HistorySeed, PipelineRunner, RunContext, RunError, RunMode, RunOutcome,
    RunPhase, RunState, StepRecord, validate_request,
};
