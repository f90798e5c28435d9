// Agent chat HTTP route
// Decision: The polling loop runs inside the request; a client disconnect drops the handler
// future and with it the pending sleep, so no run keeps polling for a gone client
// Decision: With AGENT_FOLLOW_UP enabled, runs that outlive the request budget are handed to a
// background task that publishes the final reply on the `agent_reply` topic

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use dormdesk_core::{ActionAgent, AgentInput, AgentReply, EventBus};
use tokio_util::sync::CancellationToken;

use super::common::{api_error, ApiError, ErrorResponse};
use crate::auth::Conversation;
use crate::config::AgentConfig;

// ============================================
// App State and Routes
// ============================================

/// App state for agent routes
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<ActionAgent>,
    pub bus: Arc<EventBus>,
    pub config: AgentConfig,
    /// Cancelled on server shutdown; parents every poll
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        agent: Arc<ActionAgent>,
        bus: Arc<EventBus>,
        config: AgentConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            agent,
            bus,
            config,
            shutdown,
        }
    }
}

/// Create agent routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/agent", post(handle_message))
        .with_state(state)
}

// ============================================
// HTTP Handlers
// ============================================

/// POST /v1/agent - Send a chat message or a postback action
#[utoipa::path(
    post,
    path = "/v1/agent",
    request_body = AgentInput,
    params(
        ("sid" = Option<String>, Query, description = "Session id (falls back to x-session-id header, then sid cookie)")
    ),
    responses(
        (status = 200, description = "Agent reply", body = AgentReply),
        (status = 400, description = "Neither message nor action supplied", body = ErrorResponse),
        (status = 401, description = "No session id supplied", body = ErrorResponse),
        (status = 502, description = "Automation backend error", body = ErrorResponse)
    ),
    tag = "agent"
)]
pub async fn handle_message(
    State(state): State<AppState>,
    Conversation(ctx): Conversation,
    Json(input): Json<AgentInput>,
) -> Result<Json<AgentReply>, ApiError> {
    let cancel = state.shutdown.child_token();
    let turn = state
        .agent
        .handle_with_cancel(input, &ctx, &cancel)
        .await
        .map_err(api_error)?;

    if let Some(run) = turn.pending {
        if state.config.follow_up {
            tracing::info!(run = %run, session_id = %ctx.session_id, "Handing action to follow-up");
            let agent = state.agent.clone();
            let bus = state.bus.clone();
            let policy = state.config.follow_up_poll;
            let cancel = state.shutdown.child_token();
            tokio::spawn(async move {
                if let Err(e) = agent.follow_up(run, ctx, bus, policy, cancel).await {
                    tracing::warn!(error = %e, "Follow-up failed");
                }
            });
        }
    }

    Ok(Json(turn.reply))
}
