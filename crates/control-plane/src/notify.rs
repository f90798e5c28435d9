// Cross-instance event notices over Postgres LISTEN/NOTIFY
// Decision: Notices carry only keys; receivers re-read the payload from dashboard_events
//
// Every instance publishes a notice after persisting an event and listens on
// the same channel. The bus ignores its own notices and delivers foreign
// ones to its local handles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dormdesk_core::{DashboardError, EventBus, EventNotice, EventNotifier};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Postgres notification channel
pub const NOTIFY_CHANNEL: &str = "dashboard_events";

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Sends notices with `pg_notify`
#[derive(Clone)]
pub struct PgNotifier {
    pool: PgPool,
}

impl PgNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventNotifier for PgNotifier {
    async fn notify(&self, notice: &EventNotice) -> dormdesk_core::Result<()> {
        let body = serde_json::to_string(notice)
            .map_err(|e| DashboardError::notify(format!("Failed to serialize notice: {}", e)))?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(|e| DashboardError::notify(e.to_string()))?;
        Ok(())
    }
}

/// Decode a notification body; malformed bodies are skipped
pub fn parse_notice(body: &str) -> Option<EventNotice> {
    match serde_json::from_str(body) {
        Ok(notice) => Some(notice),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed event notice");
            None
        }
    }
}

/// Listen for notices until `shutdown` fires, reconnecting on errors
pub fn spawn_listener(pool: PgPool, bus: Arc<EventBus>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listen(&pool, &bus, &shutdown).await {
                Ok(()) => {
                    tracing::info!("Event notice listener stopped");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Event notice listener failed, reconnecting");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    })
}

async fn listen(pool: &PgPool, bus: &EventBus, shutdown: &CancellationToken) -> anyhow::Result<()> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(NOTIFY_CHANNEL).await?;
    tracing::info!(channel = NOTIFY_CHANNEL, instance_id = %bus.instance_id(), "Listening for event notices");

    loop {
        let notification = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            notification = listener.recv() => notification?,
        };

        let Some(notice) = parse_notice(notification.payload()) else {
            continue;
        };

        match bus.handle_notice(&notice).await {
            Ok(Some((session, tenant))) => {
                tracing::debug!(
                    topic = %notice.topic,
                    session_id = %notice.session_id,
                    delivered = session.delivered + tenant.delivered,
                    "Delivered event from another instance"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(topic = %notice.topic, error = %e, "Failed to deliver foreign event");
            }
        }
    }
}
