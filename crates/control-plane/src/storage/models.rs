// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use dormdesk_core::{DashboardEvent, StoredEvent};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub tenant_id: String,
    pub session_id: String,
    pub topic: String,
    pub payload: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        StoredEvent {
            tenant_id: row.tenant_id,
            session_id: row.session_id,
            topic: row.topic,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpsertEventRow {
    pub tenant_id: String,
    pub session_id: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<&DashboardEvent> for UpsertEventRow {
    fn from(event: &DashboardEvent) -> Self {
        Self {
            tenant_id: event.tenant_id.clone(),
            session_id: event.session_id.clone(),
            topic: event.topic.clone(),
            payload: event.payload.clone(),
            created_at: event.created_at,
        }
    }
}
