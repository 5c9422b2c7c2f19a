//! # Autoinno
//!
//! An automated innovation pipeline: a user-editable list of instructions is
//! executed in order against one tool-using research agent that shares a
//! single conversation history across all steps.
//!
//! This library provides:
//! - An HTTP API for sessions, instruction edits and runs, with SSE progress
//! - A tool-based agent loop backed by an OpenAI-compatible chat endpoint
//! - Web search through the Tavily API
//!
//! ## Architecture
//!
//! 1. A session holds an ordered instruction list and the run history
//! 2. Starting a run appends the topic to the first instruction
//! 3. Each instruction becomes a human turn; the agent answers with the whole
//!    history in view and its answer becomes an agent turn
//! 4. The first failing step halts the run
//!
//! ## Example
//!
//! ```rust,ignore
//! use autoinno::{agent::Agent, pipeline::*, Config};
//!
//! let config = Config::from_env()?;
//! let agent = Agent::from_config(&config);
//! let mut ctx = RunContext::new(InstructionList::seeded(vec!["Research".into()]));
//! PipelineRunner::new(&agent, &NoopObserver)
//!     .run(&mut ctx, "toothbrushes", &RunMode::Instructions)
//!     .await?;
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod conversation;
pub mod llm;
pub mod pipeline;
pub mod tools;

pub use config::Config;
