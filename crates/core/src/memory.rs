// In-memory implementations for dev mode and testing
// Decision: Use parking_lot for thread-safe access
//
// InMemoryEventStore mirrors the Postgres upsert semantics (one row per
// tenant/session/topic, last write wins by timestamp) so the control plane
// can run without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::events::{DashboardEvent, EventNotice, StoredEvent};
use crate::traits::{EventNotifier, EventStore};

type EventKey = (String, String, String);

#[derive(Debug, Clone)]
struct Slot {
    row: StoredEvent,
    // Tie-breaker for rows written within the same clock tick
    revision: u64,
}

/// In-memory latest-value-per-topic store
#[derive(Default)]
pub struct InMemoryEventStore {
    rows: RwLock<HashMap<EventKey, Slot>>,
    revision: Mutex<u64>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn next_revision(&self) -> u64 {
        let mut revision = self.revision.lock();
        *revision += 1;
        *revision
    }

    fn newest_first<F>(&self, filter: F, limit: usize) -> Vec<StoredEvent>
    where
        F: Fn(&StoredEvent) -> bool,
    {
        let rows = self.rows.read();
        let mut slots: Vec<&Slot> = rows.values().filter(|s| filter(&s.row)).collect();
        slots.sort_by(|a, b| {
            b.row
                .created_at
                .cmp(&a.row.created_at)
                .then(b.revision.cmp(&a.revision))
        });
        slots.into_iter().take(limit).map(|s| s.row.clone()).collect()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn upsert(&self, event: &DashboardEvent) -> Result<()> {
        let key = (
            event.tenant_id.clone(),
            event.session_id.clone(),
            event.topic.clone(),
        );
        let revision = self.next_revision();
        let mut rows = self.rows.write();

        if let Some(existing) = rows.get(&key) {
            if existing.row.created_at > event.created_at {
                tracing::debug!(topic = %event.topic, "Ignoring stale upsert");
                return Ok(());
            }
        }
        rows.insert(
            key,
            Slot {
                row: StoredEvent::from(event.clone()),
                revision,
            },
        );
        Ok(())
    }

    async fn replay_session(&self, session_id: &str, limit: usize) -> Result<Vec<StoredEvent>> {
        Ok(self.newest_first(|row| row.session_id == session_id, limit))
    }

    async fn replay_tenant(&self, tenant_id: &str, limit: usize) -> Result<Vec<StoredEvent>> {
        Ok(self.newest_first(|row| row.tenant_id == tenant_id, limit))
    }

    async fn latest(
        &self,
        tenant_id: &str,
        session_id: &str,
        topic: &str,
    ) -> Result<Option<StoredEvent>> {
        let key = (
            tenant_id.to_string(),
            session_id.to_string(),
            topic.to_string(),
        );
        Ok(self.rows.read().get(&key).map(|s| s.row.clone()))
    }
}

/// Notifier that keeps every notice, for assertions
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<EventNotice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<EventNotice> {
        self.notices.lock().clone()
    }
}

#[async_trait]
impl EventNotifier for RecordingNotifier {
    async fn notify(&self, notice: &EventNotice) -> Result<()> {
        self.notices.lock().push(notice.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_key() {
        let store = InMemoryEventStore::new();
        let first = DashboardEvent::new("t1", "s1", "reserve_summary", json!({"count": 1}));
        let mut second = DashboardEvent::new("t1", "s1", "reserve_summary", json!({"count": 2}));
        second.created_at = first.created_at + Duration::milliseconds(5);

        store.upsert(&first).await.unwrap();
        store.upsert(&second).await.unwrap();

        assert_eq!(store.len(), 1);
        let row = store
            .latest("t1", "s1", "reserve_summary")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.payload, json!({"count": 2}));
        assert_eq!(row.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_stale_upsert_is_ignored() {
        let store = InMemoryEventStore::new();
        let newer = DashboardEvent::new("t1", "s1", "payment_done", json!({"v": "new"}));
        let mut older = DashboardEvent::new("t1", "s1", "payment_done", json!({"v": "old"}));
        older.created_at = newer.created_at - Duration::seconds(1);

        store.upsert(&newer).await.unwrap();
        store.upsert(&older).await.unwrap();

        let row = store.latest("t1", "s1", "payment_done").await.unwrap().unwrap();
        assert_eq!(row.payload, json!({"v": "new"}));
    }

    #[tokio::test]
    async fn test_replay_newest_first_with_limit() {
        let store = InMemoryEventStore::new();
        let base = Utc::now();
        for (i, topic) in ["a", "b", "c"].iter().enumerate() {
            let mut event = DashboardEvent::new("t1", "s1", *topic, json!({ "i": i }));
            event.created_at = base + Duration::milliseconds(i as i64);
            store.upsert(&event).await.unwrap();
        }
        let mut other = DashboardEvent::new("t1", "s2", "z", json!({}));
        other.created_at = base + Duration::seconds(10);
        store.upsert(&other).await.unwrap();

        let topics: Vec<_> = store
            .replay_session("s1", 20)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.topic)
            .collect();
        assert_eq!(topics, vec!["c", "b", "a"]);

        let limited = store.replay_session("s1", 2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].topic, "c");

        let tenant = store.replay_tenant("t1", 20).await.unwrap();
        assert_eq!(tenant.len(), 4);
        assert_eq!(tenant[0].topic, "z");
    }

    #[tokio::test]
    async fn test_same_tick_writes_ordered_by_revision() {
        let store = InMemoryEventStore::new();
        let at = Utc::now();
        for topic in ["first", "second"] {
            let mut event = DashboardEvent::new("t1", "s1", topic, json!({}));
            event.created_at = at;
            store.upsert(&event).await.unwrap();
        }
        let rows = store.replay_session("s1", 20).await.unwrap();
        assert_eq!(rows[0].topic, "second");
        assert_eq!(rows[1].topic, "first");
    }
}
