//! In-memory session registry.
//!
//! Each session owns its own [`RunContext`] (instructions, history, run state),
//! an event channel for SSE subscribers and a readable snapshot that stays
//! current while a run holds the context lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::pipeline::{
    InstructionList, PipelineEvent, RunContext, RunPhase, RunState, StepObserver, StepRecord,
};

const EVENT_CAPACITY: usize = 256;

/// What clients see of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub instructions: Vec<String>,
    pub run: RunState,
    pub history_len: usize,
}

/// One user session.
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    context: Arc<Mutex<RunContext>>,
    snapshot: StdRwLock<SessionSnapshot>,
    events_tx: broadcast::Sender<PipelineEvent>,
    cancel: StdRwLock<Option<CancellationToken>>,
}

impl Session {
    fn new(instructions: Vec<String>) -> Self {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let context = RunContext::new(InstructionList::seeded(instructions));
        let snapshot = SessionSnapshot {
            id,
            created_at,
            instructions: context.instructions.as_slice().to_vec(),
            run: context.state().clone(),
            history_len: 0,
        };
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id,
            created_at,
            context: Arc::new(Mutex::new(context)),
            snapshot: StdRwLock::new(snapshot),
            events_tx,
            cancel: StdRwLock::new(None),
        }
    }

    /// Lock the context for an edit. Fails while a run owns it.
    pub fn try_context(&self) -> Option<tokio::sync::MutexGuard<'_, RunContext>> {
        self.context.try_lock().ok()
    }

    /// Lock the context for a run; the guard can move into a spawned task.
    pub fn try_context_owned(&self) -> Option<OwnedMutexGuard<RunContext>> {
        Arc::clone(&self.context).try_lock_owned().ok()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        match self.snapshot.read() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Mirror the authoritative context into the snapshot.
    pub fn refresh(&self, ctx: &RunContext) {
        self.update(|s| {
            s.instructions = ctx.instructions.as_slice().to_vec();
            s.run = ctx.state().clone();
            s.history_len = ctx.history().len();
        });
    }

    fn update(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        match self.snapshot.write() {
            Ok(mut s) => f(&mut *s),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }

    /// Record that a run is starting, before the spawned task gets going.
    pub fn mark_started(&self, topic: &str, token: CancellationToken) {
        if let Ok(mut cancel) = self.cancel.write() {
            *cancel = Some(token);
        }
        self.update(|s| {
            s.run = RunState {
                phase: RunPhase::Running { step: 0 },
                topic: Some(topic.to_string()),
                ..RunState::default()
            };
        });
    }

    pub fn finish(&self, ctx: &RunContext) {
        if let Ok(mut cancel) = self.cancel.write() {
            *cancel = None;
        }
        self.refresh(ctx);
    }

    /// Request cancellation of the active run. Returns false when idle.
    pub fn cancel(&self) -> bool {
        let guard = match self.cancel.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.snapshot().run.phase.is_running()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events_tx.subscribe()
    }

    pub fn publish(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }
}

/// Publishes runner progress to a session's subscribers and snapshot.
pub struct SessionObserver {
    session: Arc<Session>,
}

impl SessionObserver {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

impl StepObserver for SessionObserver {
    fn on_run_started(&self, ctx: &RunContext) {
        self.session.update(|s| {
            s.instructions = ctx.instructions.as_slice().to_vec();
            s.history_len = ctx.history().len();
        });
    }

    fn on_step_started(&self, step: usize, instruction: &str) {
        self.session.update(|s| {
            s.run.phase = RunPhase::Running { step };
            if step == 0 {
                s.run.records.clear();
            }
            // The instruction is appended as a human turn right after this.
            s.history_len += 1;
        });
        self.session
            .publish(PipelineEvent::step_started(step, instruction));
    }

    fn on_step_completed(&self, record: &StepRecord, raw: &serde_json::Value) {
        self.session.update(|s| {
            s.run.records.push(record.clone());
            s.history_len += 1;
        });
        self.session.publish(PipelineEvent::StepCompleted {
            step: record.step,
            output: record.output.clone(),
            raw: raw.clone(),
        });
    }

    fn on_step_failed(&self, step: usize, error: &str) {
        self.session.update(|s| {
            s.run.phase = RunPhase::Failed { step };
            s.run.error = Some(error.to_string());
        });
        self.session.publish(PipelineEvent::StepFailed {
            step,
            error: error.to_string(),
        });
    }
}

/// All live sessions of this process.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    seed_instructions: Vec<String>,
}

impl SessionRegistry {
    pub fn new(seed_instructions: Vec<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            seed_instructions,
        }
    }

    pub async fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(self.seed_instructions.clone()));
        self.sessions
            .write()
            .await
            .insert(session.id, Arc::clone(&session));
        tracing::info!(session_id = %session.id, "Session created");
        session
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Remove a session, cancelling any active run.
    pub async fn remove(&self, id: Uuid) -> bool {
        match self.sessions.write().await.remove(&id) {
            Some(session) => {
                session.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
