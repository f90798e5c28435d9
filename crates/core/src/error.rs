// Error types for the dashboard core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, DashboardError>;

/// Errors that can occur in the event bus and the agent loop
#[derive(Debug, Error)]
pub enum DashboardError {
    /// Event rejected before any side effect
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Durable event store error
    #[error("Event store error: {0}")]
    Store(String),

    /// Cross-instance notification error
    #[error("Notification error: {0}")]
    Notify(String),

    /// Automation backend refused or failed to dispatch an action
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Status lookup for a dispatched action failed
    #[error("Status lookup error: {0}")]
    StatusLookup(String),

    /// Intent classification failed
    #[error("Classification error: {0}")]
    Classify(String),

    /// Agent input carried neither an action nor a message
    #[error("Input requires either a message or an action")]
    MissingInput,

    /// Action run was cancelled before reaching a terminal state
    #[error("Action run cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DashboardError {
    /// Create an invalid event error
    pub fn invalid_event(msg: impl Into<String>) -> Self {
        DashboardError::InvalidEvent(msg.into())
    }

    /// Create an event store error
    pub fn store(msg: impl Into<String>) -> Self {
        DashboardError::Store(msg.into())
    }

    /// Create a notification error
    pub fn notify(msg: impl Into<String>) -> Self {
        DashboardError::Notify(msg.into())
    }

    /// Create a dispatch error
    pub fn dispatch(msg: impl Into<String>) -> Self {
        DashboardError::Dispatch(msg.into())
    }

    /// Create a status lookup error
    pub fn status_lookup(msg: impl Into<String>) -> Self {
        DashboardError::StatusLookup(msg.into())
    }

    /// Create a classification error
    pub fn classify(msg: impl Into<String>) -> Self {
        DashboardError::Classify(msg.into())
    }

    /// Whether the error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DashboardError::InvalidEvent(_) | DashboardError::MissingInput
        )
    }
}
