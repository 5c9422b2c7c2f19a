//! HTTP API for the innovation pipeline.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Liveness and version
//! - `POST /api/sessions` - Create a session seeded with the default instructions
//! - `GET /api/sessions/:id` - Session snapshot
//! - `DELETE /api/sessions/:id` - Drop a session, cancelling its run
//! - `POST /api/sessions/:id/instructions` - Append an instruction
//! - `PUT /api/sessions/:id/instructions/:index` - Edit an instruction
//! - `DELETE /api/sessions/:id/instructions/last` - Remove the last instruction
//! - `POST /api/sessions/:id/runs` - Start a run
//! - `POST /api/sessions/:id/cancel` - Cancel the active run between steps
//! - `GET /api/sessions/:id/stream` - Stream run events via SSE

mod control;
mod sessions;
pub mod types;

pub use sessions::{Session, SessionObserver, SessionRegistry, SessionSnapshot};

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::{default_instructions, Agent, AgentInvoker};
use crate::config::Config;
use crate::pipeline::HistorySeed;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub invoker: Arc<dyn AgentInvoker>,
    pub sessions: SessionRegistry,
    /// History seed for runs that do not pick one.
    pub seed: HistorySeed,
}

impl AppState {
    pub fn new(config: Config, invoker: Arc<dyn AgentInvoker>) -> Self {
        let seed_instructions = config
            .instructions
            .clone()
            .unwrap_or_else(default_instructions);
        Self {
            config,
            invoker,
            sessions: SessionRegistry::new(seed_instructions),
            seed: HistorySeed::default(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(control::health))
        .route("/api/sessions", post(control::create_session))
        .route(
            "/api/sessions/:id",
            get(control::get_session).delete(control::delete_session),
        )
        .route(
            "/api/sessions/:id/instructions",
            post(control::append_instruction),
        )
        .route(
            "/api/sessions/:id/instructions/last",
            delete(control::remove_last_instruction),
        )
        .route(
            "/api/sessions/:id/instructions/:index",
            put(control::edit_instruction),
        )
        .route("/api/sessions/:id/runs", post(control::start_run))
        .route("/api/sessions/:id/cancel", post(control::cancel_run))
        .route("/api/sessions/:id/stream", get(control::stream))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the agent from `config` and serve until the process is stopped.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let agent = Agent::from_config(&config);
    tracing::info!(
        model = %config.default_model,
        tools = agent.tools().list_tools().len(),
        "Agent ready"
    );
    if config.tracing.is_configured() {
        tracing::info!(
            endpoint = ?config.tracing.endpoint,
            "External tracing sink configured; credentials passed through untouched"
        );
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, Arc::new(agent)));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
