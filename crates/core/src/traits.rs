// Core traits for pluggable backends
//
// These traits allow the event bus and the agent loop to be used with
// different backends:
// - In-memory implementations for dev mode and testing
// - Postgres implementations for production
// - HTTP implementations for the automation backend

use async_trait::async_trait;

use crate::actions::{ActionRequest, ActionRun, RunStatus};
use crate::error::Result;
use crate::events::{DashboardEvent, EventNotice, StoredEvent};

// ============================================================================
// EventStore - Latest-value-per-topic cache used for replay
// ============================================================================

/// Durable store holding the latest payload per (tenant, session, topic)
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert the event, or overwrite the stored row for the same key.
    /// Rows newer than the event are kept.
    async fn upsert(&self, event: &DashboardEvent) -> Result<()>;

    /// Most recently updated rows of a session, newest first
    async fn replay_session(&self, session_id: &str, limit: usize) -> Result<Vec<StoredEvent>>;

    /// Most recently updated rows of a tenant, newest first
    async fn replay_tenant(&self, tenant_id: &str, limit: usize) -> Result<Vec<StoredEvent>>;

    /// Current row for one key
    async fn latest(
        &self,
        tenant_id: &str,
        session_id: &str,
        topic: &str,
    ) -> Result<Option<StoredEvent>>;
}

// ============================================================================
// EventNotifier - Cross-instance signal
// ============================================================================

/// Signals other server instances that an event was published
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn notify(&self, notice: &EventNotice) -> Result<()>;
}

/// Notifier for single-instance deployments
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl EventNotifier for NoopNotifier {
    async fn notify(&self, _notice: &EventNotice) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// AutomationBackend - External workflow-automation service
// ============================================================================

/// Business actions (bookings, payments, check-ins, invoicing) are executed
/// by an external automation service; this is its contract.
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    /// Start an action, returning the run to poll
    async fn dispatch(&self, request: &ActionRequest) -> Result<ActionRun>;

    /// Look up the state of a run. Must be idempotent.
    async fn status(&self, run: &ActionRun) -> Result<RunStatus>;
}

// ============================================================================
// IntentClassifier - Free text to intent tag
// ============================================================================

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<String>;
}
