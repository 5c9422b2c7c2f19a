//! Session control handlers: instruction edits, runs, cancellation and the
//! per-session SSE event stream.
//!
//! A run owns its session's context lock for its whole duration, so edits and a
//! second run are rejected with 409 until it finishes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    Json,
};
use futures::stream::Stream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{DEFAULT_TOPIC, FOLLOW_UP_INSTRUCTION};
use crate::config::Config;
use crate::pipeline::{
    validate_request, PipelineEvent, PipelineRunner, RunMode, RunOutcome, RunPhase,
    ValidationError,
};

use super::sessions::{Session, SessionObserver, SessionSnapshot};
use super::types::{
    CancelResponse, HealthResponse, InstructionRequest, InstructionsResponse, RunModeKind,
    StartRunRequest, StartRunResponse,
};
use super::AppState;

fn not_found(id: Uuid) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("Session {} not found", id))
}

/// Error returned while a run holds the session.
fn run_in_progress() -> (StatusCode, String) {
    (
        StatusCode::CONFLICT,
        "a run is in progress for this session".to_string(),
    )
}

fn bad_request(err: ValidationError) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

async fn session_for(state: &AppState, id: Uuid) -> Result<Arc<Session>, (StatusCode, String)> {
    state.sessions.get(id).await.ok_or_else(|| not_found(id))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.sessions.len().await,
    })
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SessionSnapshot>) {
    let session = state.sessions.create().await;
    (StatusCode::CREATED, Json(session.snapshot()))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, (StatusCode, String)> {
    let session = session_for(&state, id).await?;
    Ok(Json(session.snapshot()))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    if state.sessions.remove(id).await {
        tracing::info!(session_id = %id, "Session deleted");
        Ok(Json(serde_json::json!({ "ok": true, "deleted": id })))
    } else {
        Err(not_found(id))
    }
}

pub async fn append_instruction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<InstructionRequest>,
) -> Result<Json<InstructionsResponse>, (StatusCode, String)> {
    let session = session_for(&state, id).await?;
    let mut ctx = session.try_context().ok_or_else(run_in_progress)?;
    ctx.instructions.append(req.text);
    session.refresh(&ctx);
    tracing::debug!(session_id = %id, len = ctx.instructions.len(), "Instruction appended");
    Ok(Json(InstructionsResponse {
        items: ctx.instructions.as_slice().to_vec(),
        removed: None,
    }))
}

pub async fn edit_instruction(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(Uuid, usize)>,
    Json(req): Json<InstructionRequest>,
) -> Result<Json<InstructionsResponse>, (StatusCode, String)> {
    let session = session_for(&state, id).await?;
    let mut ctx = session.try_context().ok_or_else(run_in_progress)?;
    ctx.instructions.edit(index, req.text).map_err(bad_request)?;
    session.refresh(&ctx);
    tracing::debug!(session_id = %id, index, "Instruction edited");
    Ok(Json(InstructionsResponse {
        items: ctx.instructions.as_slice().to_vec(),
        removed: None,
    }))
}

pub async fn remove_last_instruction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<InstructionsResponse>, (StatusCode, String)> {
    let session = session_for(&state, id).await?;
    let mut ctx = session.try_context().ok_or_else(run_in_progress)?;
    let removed = ctx.instructions.remove_last();
    session.refresh(&ctx);
    Ok(Json(InstructionsResponse {
        items: ctx.instructions.as_slice().to_vec(),
        removed,
    }))
}

fn run_mode(config: &Config, req: &StartRunRequest) -> RunMode {
    match req.mode {
        RunModeKind::Instructions => RunMode::Instructions,
        RunModeKind::Iterations => RunMode::Iterations {
            count: req.iterations.unwrap_or(config.default_iterations),
            follow_up: req
                .follow_up
                .clone()
                .unwrap_or_else(|| FOLLOW_UP_INSTRUCTION.to_string()),
            carry: req.carry,
        },
    }
}

/// Start a run in the background. Progress is reported over the stream.
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), (StatusCode, String)> {
    let session = session_for(&state, id).await?;
    let topic = req
        .topic
        .clone()
        .unwrap_or_else(|| DEFAULT_TOPIC.to_string());
    let mode = run_mode(&state.config, &req);
    let seed = req.seed.unwrap_or(state.seed);

    let mut ctx = session.try_context_owned().ok_or_else(run_in_progress)?;
    validate_request(&ctx, &topic, &mode).map_err(bad_request)?;

    let steps = match &mode {
        RunMode::Instructions => ctx.instructions.len(),
        RunMode::Iterations { count, .. } => 1 + *count as usize,
    };
    let topic = topic.trim().to_string();
    let token = CancellationToken::new();
    session.mark_started(&topic, token.clone());
    session.publish(PipelineEvent::Status {
        phase: RunPhase::Running { step: 0 },
        steps_completed: 0,
    });
    tracing::info!(session_id = %id, topic = %topic, steps, ?seed, "Run accepted");

    let invoker = Arc::clone(&state.invoker);
    let task_session = Arc::clone(&session);
    let task_topic = topic.clone();
    tokio::spawn(async move {
        let observer = SessionObserver::new(Arc::clone(&task_session));
        let runner = PipelineRunner::new(invoker.as_ref(), &observer)
            .with_seed(seed)
            .with_cancellation(token);
        let result = runner.run(&mut ctx, &task_topic, &mode).await;

        task_session.finish(&ctx);
        drop(ctx);

        let finished = match result {
            Ok(RunOutcome::Completed { steps }) => PipelineEvent::RunFinished {
                success: true,
                message: format!("completed {} steps", steps),
            },
            Ok(RunOutcome::Cancelled { at_step }) => PipelineEvent::RunFinished {
                success: false,
                message: format!("cancelled before step {}", at_step),
            },
            Err(e) => PipelineEvent::RunFinished {
                success: false,
                message: e.to_string(),
            },
        };
        tracing::info!(session_id = %task_session.id, event = ?finished, "Run finished");
        task_session.publish(finished);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            session_id: id,
            topic,
            steps,
        }),
    ))
}

pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, (StatusCode, String)> {
    let session = session_for(&state, id).await?;
    let cancelled = session.cancel();
    if cancelled {
        tracing::info!(session_id = %id, "Cancellation requested");
    }
    Ok(Json(CancelResponse {
        cancelled,
        phase: session.snapshot().run.phase,
    }))
}

/// Stream session events via SSE.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let session = session_for(&state, id).await?;
    let mut rx = session.subscribe();
    let stream_id = Uuid::new_v4();
    tracing::info!(stream_id = %stream_id, session_id = %id, "Session SSE stream opened");

    // Emit an initial status snapshot immediately.
    let initial = session.snapshot();

    struct StreamDropGuard {
        stream_id: Uuid,
        session_id: Uuid,
    }

    impl Drop for StreamDropGuard {
        fn drop(&mut self) {
            tracing::info!(
                stream_id = %self.stream_id,
                session_id = %self.session_id,
                "Session SSE stream closed"
            );
        }
    }

    let drop_guard = StreamDropGuard {
        stream_id,
        session_id: id,
    };

    let stream = async_stream::stream! {
        let _guard = drop_guard;
        let status = PipelineEvent::Status {
            phase: initial.run.phase,
            steps_completed: initial.run.records.len(),
        };
        match Event::default().event(status.event_name()).json_data(&status) {
            Ok(init_ev) => yield Ok(init_ev),
            Err(e) => {
                tracing::error!("Failed to serialize initial SSE status event: {e}");
            }
        }

        // Keepalive during long model calls
        let mut keepalive_interval = tokio::time::interval(std::time::Duration::from_secs(15));
        keepalive_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(ev) => {
                            tracing::debug!(
                                stream_id = %stream_id,
                                event = %ev.event_name(),
                                "Session SSE event"
                            );
                            match Event::default().event(ev.event_name()).json_data(&ev) {
                                Ok(sse) => yield Ok(sse),
                                Err(e) => {
                                    tracing::error!(
                                        stream_id = %stream_id,
                                        event = %ev.event_name(),
                                        error = %e,
                                        "Failed to serialize SSE event; dropping"
                                    );
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                stream_id = %stream_id,
                                skipped,
                                "Session SSE stream lagged; events dropped"
                            );
                            let sse = Event::default()
                                .event("error")
                                .data("event stream lagged; some events were dropped");
                            yield Ok(sse);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = keepalive_interval.tick() => {
                    yield Ok(Event::default().comment("keepalive"));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    ))
}
