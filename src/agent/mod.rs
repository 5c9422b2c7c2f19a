//! Agent module - turns (history, instruction) into an output.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Render the shared history plus the instruction as chat messages
//! 2. Call the LLM with the available tools
//! 3. If the LLM requests tool calls, execute them and feed results back
//! 4. Repeat until the LLM produces a final answer or max iterations is reached
//!
//! Malformed model output is re-prompted under a [`RetryPolicy`]; transport and
//! tool failures are returned as [`AgentError`].

mod agent_loop;
mod prompt;
mod retry;

pub use agent_loop::{Agent, ToolStep};
pub use prompt::{
    bootstrap_turns, build_system_prompt, default_instructions, DEFAULT_TOPIC,
    FOLLOW_UP_INSTRUCTION,
};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::conversation::History;
use crate::llm::LlmError;

/// Result of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReply {
    /// Final free-text answer.
    pub output: String,
    /// Whatever the agent attaches about its intermediate steps. Not inspected
    /// by the pipeline.
    pub raw: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("instruction must not be empty")]
    EmptyInstruction,

    #[error("model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("tool `{name}` failed: {message}")]
    Tool { name: String, message: String },

    #[error("model output could not be parsed after {attempts} attempts: {last}")]
    ParseRetriesExhausted { attempts: u32, last: String },

    #[error("no final answer after {0} model calls")]
    MaxIterations(usize),
}

/// The agent capability the pipeline depends on.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run one instruction against the conversation so far.
    ///
    /// `history` may already end with `instruction` as a human turn.
    async fn invoke(&self, history: &History, instruction: &str)
        -> Result<AgentReply, AgentError>;
}
