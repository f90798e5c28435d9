// Event Protocol
//
// This module defines the unit of delivery for the dashboard event bus and
// the Server-Sent-Events wire framing. An event is scoped by tenant and
// session and named by a topic; the topic doubles as the SSE event name and
// as the upsert key in the durable store.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::{DashboardError, Result};

// ============================================================================
// Topic Constants
// ============================================================================

/// Connection acknowledgement, first frame of every stream
pub const OPEN: &str = "open";
/// Liveness frame
pub const PING: &str = "ping";

// Business topics emitted by this crate
pub const AGENT_REPLY: &str = "agent_reply";

// Business topics commonly published by external handlers
pub const RESERVE_SUMMARY: &str = "reserve_summary";
pub const PAYMENT_DONE: &str = "payment_done";

// ============================================================================
// Events
// ============================================================================

/// A dashboard event as handed to the publish pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct DashboardEvent {
    /// Tenant (dormitory operator) scope; may be empty for session-only events
    pub tenant_id: String,
    /// Login session scope, required
    pub session_id: String,
    /// Event kind, e.g. `reserve_summary`
    pub topic: String,
    /// Opaque payload
    pub payload: serde_json::Value,
    /// Publish time, used for replay ordering and upsert freshness
    pub created_at: DateTime<Utc>,
}

impl DashboardEvent {
    pub fn new(
        tenant_id: impl Into<String>,
        session_id: impl Into<String>,
        topic: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            topic: topic.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Check the identifiers required before any side effect happens
    pub fn validate(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            return Err(DashboardError::invalid_event("session_id is required"));
        }
        validate_topic(&self.topic)
    }

    /// SSE frame for this event
    pub fn frame(&self) -> String {
        format_frame(&self.topic, &self.payload)
    }

    pub fn notice(&self, origin: Uuid) -> EventNotice {
        EventNotice {
            origin,
            tenant_id: self.tenant_id.clone(),
            session_id: self.session_id.clone(),
            topic: self.topic.clone(),
            created_at: self.created_at,
        }
    }
}

/// A row of the durable store (latest value per topic)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct StoredEvent {
    pub tenant_id: String,
    pub session_id: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    pub fn frame(&self) -> String {
        format_frame(&self.topic, &self.payload)
    }
}

impl From<DashboardEvent> for StoredEvent {
    fn from(event: DashboardEvent) -> Self {
        Self {
            tenant_id: event.tenant_id,
            session_id: event.session_id,
            topic: event.topic,
            payload: event.payload,
            created_at: event.created_at,
        }
    }
}

impl From<StoredEvent> for DashboardEvent {
    fn from(row: StoredEvent) -> Self {
        Self {
            tenant_id: row.tenant_id,
            session_id: row.session_id,
            topic: row.topic,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

/// Cross-instance signal. The payload is deliberately not carried; receivers
/// re-fetch it from the durable store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventNotice {
    /// Instance that published the event
    pub origin: Uuid,
    pub tenant_id: String,
    pub session_id: String,
    pub topic: String,
    /// Publish time of the announced event
    pub created_at: DateTime<Utc>,
}

impl EventNotice {
    /// Whether `row` is the write this notice announces. A row with another
    /// timestamp belongs to a different publish, which sends its own notice.
    /// Compared at microseconds, the precision of the Postgres store.
    pub fn announces(&self, row: &StoredEvent) -> bool {
        row.created_at.trunc_subsecs(6) == self.created_at.trunc_subsecs(6)
    }
}

// ============================================================================
// Channels
// ============================================================================

/// Broadcast scope a live handle is registered under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Session(String),
    Tenant(String),
}

impl ChannelKey {
    pub fn session(id: impl Into<String>) -> Self {
        ChannelKey::Session(id.into())
    }

    pub fn tenant(id: impl Into<String>) -> Self {
        ChannelKey::Tenant(id.into())
    }

    pub fn id(&self) -> &str {
        match self {
            ChannelKey::Session(id) | ChannelKey::Tenant(id) => id,
        }
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKey::Session(id) => write!(f, "session:{}", id),
            ChannelKey::Tenant(id) => write!(f, "tenant:{}", id),
        }
    }
}

// ============================================================================
// SSE Framing
// ============================================================================

/// Topics end up verbatim in the `event:` line, so line breaks are refused.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.trim().is_empty() {
        return Err(DashboardError::invalid_event("topic is required"));
    }
    if topic.contains(['\n', '\r']) {
        return Err(DashboardError::invalid_event(
            "topic must not contain line breaks",
        ));
    }
    Ok(())
}

/// Format a named SSE frame: `event: <topic>\ndata: <json>\n\n`
///
/// serde_json escapes control characters, so the data line never spans
/// more than one line.
pub fn format_frame(topic: &str, payload: &serde_json::Value) -> String {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string());
    format!("event: {}\ndata: {}\n\n", topic, data)
}

/// `event: open` acknowledgement frame
pub fn open_frame() -> String {
    format_frame(OPEN, &serde_json::json!({ "ok": true }))
}

/// `event: ping` liveness frame
pub fn ping_frame() -> String {
    format_frame(PING, &serde_json::json!({}))
}
