// OpenAPI specification generation
//
// This module defines the OpenAPI spec for the Dormdesk API.
// It can be used by both the main API server (for Swagger UI)
// and the export-openapi binary (for static spec generation).

use crate::api;
use crate::api::{ErrorResponse, ListResponse};
use dormdesk_core::{
    ActionKind, ActionRun, AgentInput, AgentReply, DashboardEvent, Fanout, PublishReport,
    StepOutcome, StoredEvent, SuggestedAction, SuggestionType,
};
use utoipa::OpenApi;

/// OpenAPI documentation for the Dormdesk API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::events::stream_session,
        api::events::stream_tenant,
        api::events::list_events,
        api::events::publish_event,
        api::agent::handle_message,
    ),
    components(
        schemas(
            DashboardEvent, StoredEvent,
            ListResponse<StoredEvent>,
            api::events::PublishEventRequest,
            PublishReport, Fanout, StepOutcome,
            AgentInput, AgentReply, SuggestedAction, SuggestionType,
            ActionRun, ActionKind,
            ErrorResponse,
        )
    ),
    tags(
        (name = "events", description = "Event streaming (SSE), replay and publishing"),
        (name = "agent", description = "Chat and action agent")
    ),
    info(
        title = "Dormdesk API",
        version = "0.1.0",
        description = "Real-time event bus and action agent for the dorm staff dashboard",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> serde_json::Result<String> {
        Self::openapi().to_pretty_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_lists_routes() {
        let spec: serde_json::Value = serde_json::from_str(&ApiDoc::to_json().unwrap()).unwrap();
        let paths = spec["paths"].as_object().unwrap();
        for path in ["/v1/sse", "/v1/sse/tenant", "/v1/events", "/v1/agent"] {
            assert!(paths.contains_key(path), "missing {}", path);
        }
        assert!(paths["/v1/events"].get("get").is_some());
        assert!(paths["/v1/events"].get("post").is_some());
    }
}
