//! Pipeline runner - drives a session's instructions through the agent.
//!
//! Steps run strictly in order. Each step appends the instruction as a human
//! turn, invokes the agent with the whole history and appends the output as an
//! agent turn. A failed step halts the run where it stands; nothing is rolled
//! back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agent::{bootstrap_turns, AgentError, AgentInvoker};
use crate::conversation::{History, Turn};

use super::events::StepObserver;
use super::instructions::{InstructionList, ValidationError};

/// Turns a fresh run's history starts with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySeed {
    /// Innovation-process directives plus the opening dialogue.
    #[default]
    Bootstrap,
    /// One system turn per instruction in the current list.
    Instructions,
    Empty,
}

/// How the previous output reaches the next follow-up step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpContext {
    /// Only through the history, where it is the latest agent turn.
    #[default]
    History,
    /// Also appended to the follow-up instruction text.
    Inline,
}

/// What drives the sequence of steps.
#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    /// Every instruction of the list, topic substituted into the first.
    Instructions,
    /// The topic itself, then `count` repetitions of `follow_up`.
    Iterations {
        count: u32,
        follow_up: String,
        carry: FollowUpContext,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running { step: usize },
    Completed,
    Failed { step: usize },
    Cancelled { step: usize },
}

impl RunPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, RunPhase::Running { .. })
    }
}

/// Output of one completed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub instruction: String,
    pub output: String,
    pub completed_at: DateTime<Utc>,
}

/// Progress of the current (or last) run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    pub phase: RunPhase,
    pub topic: Option<String>,
    pub records: Vec<StepRecord>,
    pub error: Option<String>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: RunPhase::Idle,
            topic: None,
            records: Vec::new(),
            error: None,
        }
    }
}

impl RunState {
    pub fn outputs(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.output.as_str()).collect()
    }
}

/// Everything one session owns: instructions, history and run progress.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub instructions: InstructionList,
    history: History,
    state: RunState,
}

impl RunContext {
    pub fn new(instructions: InstructionList) -> Self {
        Self {
            instructions,
            history: History::new(),
            state: RunState::default(),
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Reset history and run state. The instruction list is only prepared for a
    /// new substitution when `mode` runs over it.
    fn begin_run(&mut self, seed: HistorySeed, topic: &str, mode: &RunMode) {
        if matches!(mode, RunMode::Instructions) {
            self.instructions.begin_run();
        }
        self.history = match seed {
            HistorySeed::Bootstrap => History::from_turns(bootstrap_turns()),
            HistorySeed::Instructions => History::from_turns(
                self.instructions
                    .as_slice()
                    .iter()
                    .map(|i| Turn::System(i.clone()))
                    .collect(),
            ),
            HistorySeed::Empty => History::new(),
        };
        self.state = RunState {
            topic: Some(topic.to_string()),
            ..RunState::default()
        };
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("step {step} failed: {source}")]
    Agent {
        step: usize,
        #[source]
        source: AgentError,
    },
}

/// How a run that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { steps: usize },
    Cancelled { at_step: usize },
}

pub struct PipelineRunner<'a> {
    invoker: &'a dyn AgentInvoker,
    observer: &'a dyn StepObserver,
    seed: HistorySeed,
    cancel: Option<CancellationToken>,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(invoker: &'a dyn AgentInvoker, observer: &'a dyn StepObserver) -> Self {
        Self {
            invoker,
            observer,
            seed: HistorySeed::default(),
            cancel: None,
        }
    }

    pub fn with_seed(mut self, seed: HistorySeed) -> Self {
        self.seed = seed;
        self
    }

    /// Checked between steps; an in-flight invocation is not interrupted.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Execute a full run over `ctx`.
    ///
    /// Validation failures are reported before any state changes. On an agent
    /// failure the context keeps the outputs recorded so far and its phase
    /// points at the failing step.
    pub async fn run(
        &self,
        ctx: &mut RunContext,
        topic: &str,
        mode: &RunMode,
    ) -> Result<RunOutcome, RunError> {
        validate_request(ctx, topic, mode)?;
        let topic = topic.trim();

        let total = match mode {
            RunMode::Instructions if ctx.instructions.is_empty() => {
                tracing::warn!("Run requested over an empty instruction list; nothing to do");
                ctx.begin_run(self.seed, topic, mode);
                ctx.state.phase = RunPhase::Completed;
                return Ok(RunOutcome::Completed { steps: 0 });
            }
            RunMode::Instructions => ctx.instructions.len(),
            RunMode::Iterations { count, .. } => 1 + *count as usize,
        };

        ctx.begin_run(self.seed, topic, mode);
        if matches!(mode, RunMode::Instructions) {
            ctx.instructions.substitute_topic(topic)?;
        }
        self.observer.on_run_started(ctx);
        tracing::info!(topic, steps = total, seeded_turns = ctx.history.len(), "Run started");

        for step in 0..total {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                tracing::info!(step, "Run cancelled before step");
                ctx.state.phase = RunPhase::Cancelled { step };
                return Ok(RunOutcome::Cancelled { at_step: step });
            }
            let instruction = instruction_for(ctx, mode, step, topic);
            self.execute_step(ctx, step, instruction).await?;
        }

        ctx.state.phase = RunPhase::Completed;
        tracing::info!(steps = total, history_len = ctx.history.len(), "Run completed");
        Ok(RunOutcome::Completed { steps: total })
    }

    async fn execute_step(
        &self,
        ctx: &mut RunContext,
        step: usize,
        instruction: String,
    ) -> Result<(), RunError> {
        ctx.state.phase = RunPhase::Running { step };
        self.observer.on_step_started(step, &instruction);
        tracing::info!(step, "executing: {}", instruction);

        ctx.history.push(Turn::Human(instruction.clone()));

        match self.invoker.invoke(&ctx.history, &instruction).await {
            Ok(reply) => {
                ctx.history.push(Turn::Agent(reply.output.clone()));
                let record = StepRecord {
                    step,
                    instruction,
                    output: reply.output,
                    completed_at: Utc::now(),
                };
                self.observer.on_step_completed(&record, &reply.raw);
                ctx.state.records.push(record);
                Ok(())
            }
            Err(source) => {
                let message = source.to_string();
                tracing::error!(step, error = %message, "Step failed; halting run");
                ctx.state.phase = RunPhase::Failed { step };
                ctx.state.error = Some(message.clone());
                self.observer.on_step_failed(step, &message);
                Err(RunError::Agent { step, source })
            }
        }
    }
}

/// Check a run request against `ctx` without changing anything.
pub fn validate_request(
    ctx: &RunContext,
    topic: &str,
    mode: &RunMode,
) -> Result<(), ValidationError> {
    if topic.trim().is_empty() {
        return Err(ValidationError::EmptyTopic);
    }
    match mode {
        RunMode::Instructions if ctx.instructions.is_empty() => Ok(()),
        RunMode::Instructions => ctx.instructions.validate(),
        RunMode::Iterations {
            count, follow_up, ..
        } if *count > 0 && follow_up.trim().is_empty() => {
            Err(ValidationError::BlankInstruction { index: 1 })
        }
        RunMode::Iterations { .. } => Ok(()),
    }
}

fn instruction_for(ctx: &RunContext, mode: &RunMode, step: usize, topic: &str) -> String {
    match mode {
        RunMode::Instructions => ctx.instructions.get(step).unwrap_or_default().to_string(),
        RunMode::Iterations { .. } if step == 0 => topic.to_string(),
        RunMode::Iterations {
            follow_up, carry, ..
        } => match (carry, ctx.history.last_agent_output()) {
            (FollowUpContext::Inline, Some(previous)) => {
                format!("{}\n\nPrevious outcome:\n{}", follow_up, previous)
            }
            _ => follow_up.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentReply, FOLLOW_UP_INSTRUCTION};
    use crate::llm::LlmError;
    use crate::pipeline::events::NoopObserver;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers every instruction with a numbered output and records what it saw.
    #[derive(Default)]
    struct CountingInvoker {
        seen: Mutex<Vec<(usize, String)>>,
        fail_at: Option<usize>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl CountingInvoker {
        fn failing_at(step: usize) -> Self {
            Self {
                fail_at: Some(step),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn instructions(&self) -> Vec<String> {
            self.seen.lock().unwrap().iter().map(|(_, i)| i.clone()).collect()
        }

        fn history_lens(&self) -> Vec<usize> {
            self.seen.lock().unwrap().iter().map(|(l, _)| *l).collect()
        }
    }

    #[async_trait]
    impl AgentInvoker for CountingInvoker {
        async fn invoke(
            &self,
            history: &History,
            instruction: &str,
        ) -> Result<AgentReply, AgentError> {
            let n = {
                let mut seen = self.seen.lock().unwrap();
                seen.push((history.len(), instruction.to_string()));
                seen.len() - 1
            };
            if let Some((after, token)) = &self.cancel_after {
                if n + 1 == *after {
                    token.cancel();
                }
            }
            if self.fail_at == Some(n) {
                return Err(AgentError::Llm(LlmError::Network("unreachable".into())));
            }
            Ok(AgentReply {
                output: format!("output {}", n),
                raw: serde_json::Value::Null,
            })
        }
    }

    /// Records observer callbacks in order.
    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl StepObserver for RecordingObserver {
        fn on_step_started(&self, step: usize, instruction: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {} {}", step, instruction));
        }

        fn on_step_completed(&self, record: &StepRecord, _raw: &serde_json::Value) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done {} {}", record.step, record.output));
        }

        fn on_step_failed(&self, step: usize, _error: &str) {
            self.events.lock().unwrap().push(format!("failed {}", step));
        }
    }

    fn context(items: &[&str]) -> RunContext {
        RunContext::new(InstructionList::seeded(
            items.iter().map(|s| s.to_string()).collect(),
        ))
    }

    fn iterations(count: u32, carry: FollowUpContext) -> RunMode {
        RunMode::Iterations {
            count,
            follow_up: FOLLOW_UP_INSTRUCTION.to_string(),
            carry,
        }
    }

    #[tokio::test]
    async fn topic_scenario_records_one_output_per_instruction() {
        let invoker = CountingInvoker::default();
        let runner = PipelineRunner::new(&invoker, &NoopObserver);
        let mut ctx = context(&["Research {topic}", "Summarize findings"]);

        let outcome = runner
            .run(&mut ctx, "toothbrushes", &RunMode::Instructions)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Completed { steps: 2 });
        assert_eq!(
            ctx.instructions.get(0),
            Some("Research {topic} toothbrushes")
        );
        assert_eq!(ctx.state().outputs(), vec!["output 0", "output 1"]);
        assert_eq!(ctx.state().phase, RunPhase::Completed);

        let seeded = bootstrap_turns().len();
        assert_eq!(ctx.history().len(), seeded + 4);
        assert_eq!(
            invoker.instructions(),
            vec!["Research {topic} toothbrushes", "Summarize findings"]
        );
    }

    #[tokio::test]
    async fn history_grows_by_two_turns_per_step() {
        let invoker = CountingInvoker::default();
        let runner = PipelineRunner::new(&invoker, &NoopObserver).with_seed(HistorySeed::Empty);
        let mut ctx = context(&["a", "b", "c"]);

        runner
            .run(&mut ctx, "topic", &RunMode::Instructions)
            .await
            .unwrap();

        // The instruction is appended before each call.
        assert_eq!(invoker.history_lens(), vec![1, 3, 5]);
        let turns = ctx.history().turns();
        assert_eq!(turns.len(), 6);
        assert_eq!(turns[0], Turn::Human("a topic".into()));
        assert_eq!(turns[1], Turn::Agent("output 0".into()));
        assert_eq!(turns[5], Turn::Agent("output 2".into()));
    }

    #[tokio::test]
    async fn history_prefix_is_never_rewritten() {
        let invoker = CountingInvoker::default();
        let observer = RecordingObserver::default();
        let runner = PipelineRunner::new(&invoker, &observer);
        let mut ctx = context(&["a", "b"]);

        runner
            .run(&mut ctx, "topic", &RunMode::Instructions)
            .await
            .unwrap();

        let expected_prefix = bootstrap_turns();
        assert_eq!(
            &ctx.history().turns()[..expected_prefix.len()],
            expected_prefix.as_slice()
        );
    }

    #[tokio::test]
    async fn always_failing_invoker_records_nothing() {
        let invoker = CountingInvoker::failing_at(0);
        let observer = RecordingObserver::default();
        let runner = PipelineRunner::new(&invoker, &observer);
        let mut ctx = context(&["Research", "Summarize"]);

        let err = runner
            .run(&mut ctx, "toothbrushes", &RunMode::Instructions)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Agent { step: 0, .. }));
        assert!(ctx.state().records.is_empty());
        assert_eq!(ctx.state().phase, RunPhase::Failed { step: 0 });
        assert!(ctx.state().error.as_deref().unwrap().contains("unreachable"));
        assert_eq!(
            ctx.instructions.as_slice(),
            &["Research toothbrushes".to_string(), "Summarize".to_string()]
        );
        assert_eq!(invoker.calls(), 1);
        assert_eq!(
            *observer.events.lock().unwrap(),
            vec!["start 0 Research toothbrushes", "failed 0"]
        );
    }

    #[tokio::test]
    async fn failure_mid_run_keeps_earlier_outputs() {
        let invoker = CountingInvoker::failing_at(1);
        let runner = PipelineRunner::new(&invoker, &NoopObserver).with_seed(HistorySeed::Empty);
        let mut ctx = context(&["a", "b", "c"]);

        let err = runner
            .run(&mut ctx, "t", &RunMode::Instructions)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Agent { step: 1, .. }));
        assert_eq!(ctx.state().outputs(), vec!["output 0"]);
        assert_eq!(ctx.state().phase, RunPhase::Failed { step: 1 });
        // The failed instruction stays in the history; no agent turn follows it.
        assert_eq!(ctx.history().last(), Some(&Turn::Human("b".into())));
        assert_eq!(invoker.calls(), 2);
    }

    #[tokio::test]
    async fn iteration_mode_makes_count_plus_one_calls() {
        let invoker = CountingInvoker::default();
        let runner = PipelineRunner::new(&invoker, &NoopObserver);
        let mut ctx = context(&["untouched"]);

        let outcome = runner
            .run(&mut ctx, "toothbrushes", &iterations(3, FollowUpContext::History))
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Completed { steps: 4 });
        assert_eq!(invoker.calls(), 4);
        let seen = invoker.instructions();
        assert_eq!(seen[0], "toothbrushes");
        assert!(seen[1..].iter().all(|i| i == FOLLOW_UP_INSTRUCTION));
        assert_eq!(ctx.instructions.get(0), Some("untouched"));
    }

    #[tokio::test]
    async fn iteration_run_leaves_substituted_list_alone() {
        let invoker = CountingInvoker::default();
        let runner = PipelineRunner::new(&invoker, &NoopObserver);
        let mut ctx = context(&["Research"]);

        runner
            .run(&mut ctx, "toothbrushes", &RunMode::Instructions)
            .await
            .unwrap();
        let before = ctx.instructions.as_slice().to_vec();
        assert_eq!(before, vec!["Research toothbrushes".to_string()]);

        runner
            .run(&mut ctx, "razors", &iterations(1, FollowUpContext::History))
            .await
            .unwrap();
        assert_eq!(ctx.instructions.as_slice(), before.as_slice());
        assert!(ctx.instructions.topic_substituted());

        // The next instruction run still replaces the earlier topic.
        runner
            .run(&mut ctx, "combs", &RunMode::Instructions)
            .await
            .unwrap();
        assert_eq!(ctx.instructions.get(0), Some("Research combs"));
    }

    #[tokio::test]
    async fn iteration_mode_with_zero_count_only_sends_topic() {
        let invoker = CountingInvoker::default();
        let runner = PipelineRunner::new(&invoker, &NoopObserver);
        let mut ctx = RunContext::default();

        runner
            .run(&mut ctx, "toothbrushes", &iterations(0, FollowUpContext::History))
            .await
            .unwrap();
        assert_eq!(invoker.calls(), 1);
    }

    #[tokio::test]
    async fn inline_follow_up_carries_previous_output() {
        let invoker = CountingInvoker::default();
        let runner = PipelineRunner::new(&invoker, &NoopObserver);
        let mut ctx = RunContext::default();

        runner
            .run(&mut ctx, "toothbrushes", &iterations(2, FollowUpContext::Inline))
            .await
            .unwrap();

        let seen = invoker.instructions();
        assert!(seen[1].ends_with("Previous outcome:\noutput 0"));
        assert!(seen[2].ends_with("Previous outcome:\noutput 1"));
    }

    #[tokio::test]
    async fn empty_list_is_a_noop_success() {
        let invoker = CountingInvoker::default();
        let runner = PipelineRunner::new(&invoker, &NoopObserver);
        let mut ctx = context(&[]);

        let outcome = runner
            .run(&mut ctx, "t", &RunMode::Instructions)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed { steps: 0 });
        assert_eq!(invoker.calls(), 0);
        assert_eq!(ctx.state().phase, RunPhase::Completed);
    }

    #[tokio::test]
    async fn blank_instruction_is_rejected_before_any_step() {
        let invoker = CountingInvoker::default();
        let runner = PipelineRunner::new(&invoker, &NoopObserver);
        let mut ctx = context(&["a"]);
        ctx.instructions.append("");

        let err = runner
            .run(&mut ctx, "t", &RunMode::Instructions)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::Validation(ValidationError::BlankInstruction { index: 1 })
        ));
        assert_eq!(invoker.calls(), 0);
        assert_eq!(ctx.instructions.get(0), Some("a"));
        assert_eq!(ctx.state().phase, RunPhase::Idle);
    }

    #[tokio::test]
    async fn empty_topic_is_rejected() {
        let invoker = CountingInvoker::default();
        let runner = PipelineRunner::new(&invoker, &NoopObserver);
        let mut ctx = context(&["a"]);

        let err = runner
            .run(&mut ctx, "   ", &RunMode::Instructions)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::Validation(ValidationError::EmptyTopic)
        ));
    }

    #[tokio::test]
    async fn rerun_replaces_topic_and_resets_state() {
        let invoker = CountingInvoker::default();
        let runner = PipelineRunner::new(&invoker, &NoopObserver);
        let mut ctx = context(&["Research", "Summarize"]);

        runner
            .run(&mut ctx, "toothbrushes", &RunMode::Instructions)
            .await
            .unwrap();
        runner
            .run(&mut ctx, "razors", &RunMode::Instructions)
            .await
            .unwrap();

        assert_eq!(ctx.instructions.get(0), Some("Research razors"));
        assert_eq!(ctx.state().records.len(), 2);
        assert_eq!(ctx.state().topic.as_deref(), Some("razors"));
        assert_eq!(ctx.history().len(), bootstrap_turns().len() + 4);
    }

    #[tokio::test]
    async fn instruction_seed_uses_list_as_system_prefix() {
        let invoker = CountingInvoker::default();
        let runner =
            PipelineRunner::new(&invoker, &NoopObserver).with_seed(HistorySeed::Instructions);
        let mut ctx = context(&["a", "b"]);

        runner
            .run(&mut ctx, "t", &RunMode::Instructions)
            .await
            .unwrap();

        let turns = ctx.history().turns();
        assert_eq!(turns[0], Turn::System("a".into()));
        assert_eq!(turns[1], Turn::System("b".into()));
        assert_eq!(turns[2], Turn::Human("a t".into()));
    }

    #[tokio::test]
    async fn cancellation_stops_between_steps() {
        let token = CancellationToken::new();
        let invoker = CountingInvoker {
            cancel_after: Some((2, token.clone())),
            ..CountingInvoker::default()
        };
        let runner = PipelineRunner::new(&invoker, &NoopObserver).with_cancellation(token);
        let mut ctx = context(&["a", "b", "c", "d"]);

        let outcome = runner
            .run(&mut ctx, "t", &RunMode::Instructions)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Cancelled { at_step: 2 });
        assert_eq!(invoker.calls(), 2);
        assert_eq!(ctx.state().records.len(), 2);
        assert_eq!(ctx.state().phase, RunPhase::Cancelled { step: 2 });
    }

    #[tokio::test]
    async fn observer_sees_steps_in_order() {
        let invoker = CountingInvoker::default();
        let observer = RecordingObserver::default();
        let runner = PipelineRunner::new(&invoker, &observer);
        let mut ctx = context(&["a", "b"]);

        runner
            .run(&mut ctx, "t", &RunMode::Instructions)
            .await
            .unwrap();

        assert_eq!(
            *observer.events.lock().unwrap(),
            vec!["start 0 a t", "done 0 output 0", "start 1 b", "done 1 output 1"]
        );
    }
}
