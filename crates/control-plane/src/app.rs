// Router assembly
// Decision: Health and Swagger UI stay unprefixed; API routes honour API_PREFIX

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::{extract::State, routing::get, Json, Router};
use dormdesk_core::EventBus;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::openapi::ApiDoc;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    storage: &'static str,
    subscribed_channels: usize,
}

/// State for health endpoint
#[derive(Clone)]
struct HealthState {
    bus: Arc<EventBus>,
    dev_mode: bool,
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage: if state.dev_mode { "memory" } else { "postgres" },
        subscribed_channels: state.bus.registry().channel_count(),
    })
}

/// Everything the router needs
pub struct AppParts {
    pub events: api::events::AppState,
    pub agent: api::agent::AppState,
    pub dev_mode: bool,
    pub api_prefix: String,
    pub cors_origins: Vec<String>,
}

/// Build the complete application router
pub fn build_app(parts: AppParts) -> Router {
    let health_state = HealthState {
        bus: parts.events.bus.clone(),
        dev_mode: parts.dev_mode,
    };

    let api_routes = Router::new()
        .merge(api::events::routes(parts.events))
        .merge(api::agent::routes(parts.agent));

    // Build main router with health (not prefixed) and prefixed API routes
    let app = Router::new()
        .route("/health", get(health).with_state(health_state))
        .merge(build_router_with_prefix(api_routes, &parts.api_prefix))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    let cors_origins: Vec<HeaderValue> = parts
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    // Add CORS layer only if origins are configured
    let app = if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
        app
    } else {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::ORIGIN,
                    header::CACHE_CONTROL,
                    header::HeaderName::from_static("x-session-id"),
                    header::HeaderName::from_static("x-tenant-id"),
                ])
                .allow_credentials(true),
        )
    };

    app.layer(TraceLayer::new_for_http())
}

/// Graceful-shutdown future for `axum::serve`: resolves once `shutdown` fires,
/// after ending every open event stream so their connections can close
pub async fn drain_on(shutdown: CancellationToken, bus: Arc<EventBus>) {
    shutdown.cancelled().await;
    tracing::info!("Shutdown requested, draining connections");
    bus.shutdown();
}

/// Build router with optional API prefix (extracted for testing)
pub fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}
