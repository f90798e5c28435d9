// Common DTOs for public API
//
// These types are shared across multiple API endpoints.

use axum::http::StatusCode;
use axum::Json;
use dormdesk_core::DashboardError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standard error response for API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message describing what went wrong.
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Convert to axum response tuple
    pub fn into_response(self, status: StatusCode) -> (StatusCode, Json<Self>) {
        (status, Json(self))
    }
}

/// Handler error: status code plus JSON body
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a core error to an HTTP error response, logging server-side failures
pub fn api_error(e: DashboardError) -> ApiError {
    let status = match &e {
        DashboardError::InvalidEvent(_) | DashboardError::MissingInput => StatusCode::BAD_REQUEST,
        DashboardError::Dispatch(_)
        | DashboardError::StatusLookup(_)
        | DashboardError::Classify(_) => StatusCode::BAD_GATEWAY,
        DashboardError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        DashboardError::Store(_) | DashboardError::Notify(_) | DashboardError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    if status.is_server_error() {
        tracing::error!(status = %status, error = %e, "Request failed");
    } else {
        tracing::debug!(status = %status, error = %e, "Request rejected");
    }
    ErrorResponse::new(e.to_string()).into_response(status)
}

/// Response wrapper for list endpoints.
/// All list endpoints return responses wrapped in a `data` field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListResponse<T> {
    /// Array of items returned by the list operation.
    pub data: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data }
    }
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(api_error(DashboardError::MissingInput).0, StatusCode::BAD_REQUEST);
        assert_eq!(
            api_error(DashboardError::invalid_event("session_id is required")).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            api_error(DashboardError::dispatch("502 from upstream")).0,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            api_error(DashboardError::store("down")).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
