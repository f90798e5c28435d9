// Dormdesk Control Plane Library
// Decision: Shared library for binaries (API server, OpenAPI export)

// API routes and types (shared for OpenAPI generation)
pub mod api;

// Router assembly
pub mod app;

// Channel identity and publish secret
pub mod auth;

// Automation backend client
pub mod automation;

// Environment configuration
pub mod config;

// Cross-instance notices (LISTEN/NOTIFY)
pub mod notify;

// Storage layer
pub mod storage;

// OpenAPI spec generation
pub mod openapi;

pub use app::{build_app, AppParts};
pub use config::AppConfig;
