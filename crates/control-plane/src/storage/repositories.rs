// Repository layer for database operations
// Decision: Stale upserts are filtered in SQL (WHERE on the conflict update) so concurrent
// publishes resolve last-write-wins by created_at inside one statement

use anyhow::{Context, Result};
use sqlx::PgPool;

use super::models::*;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations from `migrations/`
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    // ============================================
    // Dashboard events (latest value per topic)
    // ============================================

    /// Insert or overwrite the row for (tenant, session, topic).
    /// Returns false when the stored row is newer and was kept.
    pub async fn upsert_event(&self, input: UpsertEventRow) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO dashboard_events (tenant_id, session_id, topic, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, session_id, topic) DO UPDATE
            SET payload = EXCLUDED.payload,
                created_at = EXCLUDED.created_at
            WHERE dashboard_events.created_at <= EXCLUDED.created_at
            "#,
        )
        .bind(&input.tenant_id)
        .bind(&input.session_id)
        .bind(&input.topic)
        .bind(&input.payload)
        .bind(input.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_session_events(&self, session_id: &str, limit: i64) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT tenant_id, session_id, topic, payload, created_at
            FROM dashboard_events
            WHERE session_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn list_tenant_events(&self, tenant_id: &str, limit: i64) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT tenant_id, session_id, topic, payload, created_at
            FROM dashboard_events
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn get_event(
        &self,
        tenant_id: &str,
        session_id: &str,
        topic: &str,
    ) -> Result<Option<EventRow>> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT tenant_id, session_id, topic, payload, created_at
            FROM dashboard_events
            WHERE tenant_id = $1 AND session_id = $2 AND topic = $3
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(topic)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
