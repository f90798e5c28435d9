// Storage layer for the dashboard control-plane
// Decision: Support both PostgreSQL (production) and in-memory (dev mode)
//
// This module provides the durable event store behind the event bus:
// - Database: sqlx repository for the dashboard_events table
// - StorageBackend: Postgres or in-memory, implements EventStore

pub mod backend;
pub mod models;
pub mod repositories;

pub use backend::StorageBackend;
pub use models::*;
pub use repositories::*;
