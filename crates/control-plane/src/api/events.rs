// Event streaming HTTP routes (SSE) and remote publishing
// Events are latest-value-per-topic notifications, NOT a history log
//
// Frames are written verbatim (`event: <topic>\ndata: <json>\n\n`) rather than
// through axum's Sse wrapper so every transport emits identical bytes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, Query, State},
    http::{header, request::Parts, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use dormdesk_core::{ChannelKey, DashboardEvent, EventBus, EventStream, PublishReport, StoredEvent};
use futures::StreamExt;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use super::common::{api_error, ApiError, ErrorResponse, ListResponse};
use crate::auth::{verify_publish_secret, IdentityError, SessionIdentity, TenantIdentity, PUBLISH_SECRET_HEADER};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Upper bound for `?limit=` on the JSON listing (raised to the replay limit if that is larger)
pub const MAX_LIST_LIMIT: usize = 100;

/// Query parameters for the replay listing
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct ReplayQuery {
    /// Maximum rows to return (defaults to the SSE replay limit, capped at
    /// 100 or the replay limit, whichever is larger)
    pub limit: Option<usize>,
}

/// Request to publish an event from another service
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PublishEventRequest {
    /// Tenant scope; omit for session-only events
    #[serde(default)]
    pub tenant_id: String,
    /// Session scope (required)
    #[serde(default)]
    pub session_id: String,
    /// Event name, e.g. `payment_done`
    #[schema(example = "payment_done")]
    pub topic: String,
    /// Opaque payload delivered to the browser
    #[serde(default)]
    pub payload: serde_json::Value,
}

// ============================================
// App State and Routes
// ============================================

/// App state for events routes
#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<EventBus>,
    /// Shared secret for remote publishing; `None` disables it
    pub publish_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(bus: Arc<EventBus>, publish_secret: Option<String>) -> Self {
        Self {
            bus,
            publish_secret: publish_secret.map(Arc::from),
        }
    }
}

/// Caller presented the configured publish secret.
/// Runs before the body is read, so unauthenticated callers never see body validation errors.
pub struct PublishAuthorized;

#[axum::async_trait]
impl FromRequestParts<AppState> for PublishAuthorized {
    type Rejection = IdentityError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(PUBLISH_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        verify_publish_secret(state.publish_secret.as_deref(), provided)?;
        Ok(PublishAuthorized)
    }
}

/// Rows to return for a requested listing limit
fn list_limit(requested: Option<usize>, replay_limit: usize) -> usize {
    requested
        .unwrap_or(replay_limit)
        .min(replay_limit.max(MAX_LIST_LIMIT))
}

/// Create event routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/sse", get(stream_session))
        .route("/v1/sse/tenant", get(stream_tenant))
        .route("/v1/events", get(list_events).post(publish_event))
        .with_state(state)
}

fn sse_response(stream: EventStream) -> Response {
    let body = Body::from_stream(stream.map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        body,
    )
        .into_response()
}

// ============================================
// HTTP Handlers
// ============================================

/// GET /v1/sse - Stream events for the caller's session
#[utoipa::path(
    get,
    path = "/v1/sse",
    params(
        ("sid" = Option<String>, Query, description = "Session id (falls back to x-session-id header, then sid cookie)")
    ),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 401, description = "No session id supplied", body = ErrorResponse)
    ),
    tag = "events"
)]
pub async fn stream_session(
    State(state): State<AppState>,
    SessionIdentity(session_id): SessionIdentity,
) -> Response {
    tracing::info!(session_id = %session_id, "Starting session event stream");
    let stream = state.bus.subscribe(ChannelKey::session(session_id)).await;
    sse_response(stream)
}

/// GET /v1/sse/tenant - Stream events for the caller's tenant
#[utoipa::path(
    get,
    path = "/v1/sse/tenant",
    params(
        ("tenant" = Option<String>, Query, description = "Tenant id (falls back to x-tenant-id header, then tenant_id cookie)")
    ),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 401, description = "No tenant id supplied", body = ErrorResponse)
    ),
    tag = "events"
)]
pub async fn stream_tenant(
    State(state): State<AppState>,
    TenantIdentity(tenant_id): TenantIdentity,
) -> Response {
    tracing::info!(tenant_id = %tenant_id, "Starting tenant event stream");
    let stream = state.bus.subscribe(ChannelKey::tenant(tenant_id)).await;
    sse_response(stream)
}

/// GET /v1/events - Stored events for the caller's session (JSON), newest first
#[utoipa::path(
    get,
    path = "/v1/events",
    params(
        ("sid" = Option<String>, Query, description = "Session id"),
        ReplayQuery
    ),
    responses(
        (status = 200, description = "Stored events", body = ListResponse<StoredEvent>),
        (status = 401, description = "No session id supplied", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "events"
)]
pub async fn list_events(
    State(state): State<AppState>,
    SessionIdentity(session_id): SessionIdentity,
    Query(query): Query<ReplayQuery>,
) -> Result<Json<ListResponse<StoredEvent>>, ApiError> {
    let limit = list_limit(query.limit, state.bus.config().replay_limit);
    let events = state
        .bus
        .store()
        .replay_session(&session_id, limit)
        .await
        .map_err(api_error)?;

    Ok(Json(ListResponse::new(events)))
}

/// POST /v1/events - Publish an event (shared-secret protected)
#[utoipa::path(
    post,
    path = "/v1/events",
    request_body = PublishEventRequest,
    params(
        ("x-publish-secret" = String, Header, description = "Shared publish secret")
    ),
    responses(
        (status = 202, description = "Event accepted", body = PublishReport),
        (status = 400, description = "Invalid event", body = ErrorResponse),
        (status = 401, description = "Missing or wrong secret", body = ErrorResponse),
        (status = 403, description = "Remote publishing disabled", body = ErrorResponse)
    ),
    tag = "events"
)]
pub async fn publish_event(
    State(state): State<AppState>,
    _authorized: PublishAuthorized,
    Json(req): Json<PublishEventRequest>,
) -> Result<(StatusCode, Json<PublishReport>), ApiError> {
    let event = DashboardEvent::new(req.tenant_id, req.session_id, req.topic, req.payload);
    let report = state.bus.publish(event).await.map_err(api_error)?;

    tracing::info!(
        delivered = report.delivered(),
        persisted = report.persisted.is_success(),
        "Published remote event"
    );
    Ok((StatusCode::ACCEPTED, Json(report)))
}
