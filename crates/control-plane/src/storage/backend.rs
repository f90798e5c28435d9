// Storage backend abstraction
// Decision: Use enum dispatch for simplicity over trait objects
//
// This module provides a unified StorageBackend enum that can work with
// either PostgreSQL (production) or in-memory (dev mode) storage, and
// exposes it to the event bus as an EventStore.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dormdesk_core::{DashboardError, DashboardEvent, EventStore, InMemoryEventStore, StoredEvent};
use sqlx::PgPool;

use super::models::UpsertEventRow;
use super::repositories::Database;

/// Storage backend that can be either PostgreSQL or in-memory
#[derive(Clone)]
pub enum StorageBackend {
    /// PostgreSQL database (production)
    Postgres(Database),
    /// In-memory store (dev mode)
    InMemory(Arc<InMemoryEventStore>),
}

impl StorageBackend {
    /// Create a PostgreSQL storage backend from a database URL and migrate it
    pub async fn postgres(database_url: &str) -> Result<Self> {
        let db = Database::from_url(database_url).await?;
        db.migrate().await?;
        Ok(Self::Postgres(db))
    }

    /// Create an in-memory storage backend
    pub fn in_memory() -> Self {
        Self::InMemory(Arc::new(InMemoryEventStore::new()))
    }

    /// Check if this is dev mode (in-memory)
    pub fn is_dev_mode(&self) -> bool {
        matches!(self, Self::InMemory(_))
    }

    /// Get the PostgreSQL pool if using PostgreSQL backend
    /// Returns None for in-memory backend
    pub fn pool(&self) -> Option<&PgPool> {
        match self {
            Self::Postgres(db) => Some(db.pool()),
            Self::InMemory(_) => None,
        }
    }
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn store_error(e: anyhow::Error) -> DashboardError {
    DashboardError::store(format!("{:#}", e))
}

#[async_trait]
impl EventStore for StorageBackend {
    async fn upsert(&self, event: &DashboardEvent) -> dormdesk_core::Result<()> {
        match self {
            Self::Postgres(db) => {
                let written = db
                    .upsert_event(UpsertEventRow::from(event))
                    .await
                    .map_err(store_error)?;
                if !written {
                    tracing::debug!(topic = %event.topic, session_id = %event.session_id, "Ignoring stale upsert");
                }
                Ok(())
            }
            Self::InMemory(store) => store.upsert(event).await,
        }
    }

    async fn replay_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> dormdesk_core::Result<Vec<StoredEvent>> {
        match self {
            Self::Postgres(db) => Ok(db
                .list_session_events(session_id, clamp_limit(limit))
                .await
                .map_err(store_error)?
                .into_iter()
                .map(StoredEvent::from)
                .collect()),
            Self::InMemory(store) => store.replay_session(session_id, limit).await,
        }
    }

    async fn replay_tenant(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> dormdesk_core::Result<Vec<StoredEvent>> {
        match self {
            Self::Postgres(db) => Ok(db
                .list_tenant_events(tenant_id, clamp_limit(limit))
                .await
                .map_err(store_error)?
                .into_iter()
                .map(StoredEvent::from)
                .collect()),
            Self::InMemory(store) => store.replay_tenant(tenant_id, limit).await,
        }
    }

    async fn latest(
        &self,
        tenant_id: &str,
        session_id: &str,
        topic: &str,
    ) -> dormdesk_core::Result<Option<StoredEvent>> {
        match self {
            Self::Postgres(db) => Ok(db
                .get_event(tenant_id, session_id, topic)
                .await
                .map_err(store_error)?
                .map(StoredEvent::from)),
            Self::InMemory(store) => store.latest(tenant_id, session_id, topic).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_backend_is_an_event_store() {
        let backend = StorageBackend::in_memory();
        assert!(backend.is_dev_mode());
        assert!(backend.pool().is_none());

        let event = DashboardEvent::new("t1", "s1", "reserve_summary", json!({"count": 3}));
        backend.upsert(&event).await.unwrap();

        let rows = backend.replay_session("s1", 20).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload, json!({"count": 3}));
        assert!(backend
            .latest("t1", "s1", "reserve_summary")
            .await
            .unwrap()
            .is_some());
        assert_eq!(backend.replay_tenant("t1", 20).await.unwrap().len(), 1);
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(20), 20);
        assert_eq!(clamp_limit(usize::MAX), i64::MAX);
    }
}
