// Channel identity extractors
// Decision: Resolve ids in priority order: query parameter, then header, then cookie
// Decision: A missing session id is rejected with 401 before any stream is opened

use std::collections::HashMap;

use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::CookieJar;
use dormdesk_core::ConversationContext;
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const SESSION_QUERY: &str = "sid";
pub const SESSION_HEADER: &str = "x-session-id";
pub const SESSION_COOKIE: &str = "sid";

pub const TENANT_QUERY: &str = "tenant";
pub const TENANT_HEADER: &str = "x-tenant-id";
pub const TENANT_COOKIE: &str = "tenant_id";

pub const PUBLISH_SECRET_HEADER: &str = "x-publish-secret";

/// Identity rejection
#[derive(Debug, Clone, Serialize)]
pub struct IdentityError {
    pub error: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl IdentityError {
    pub fn unauthorized(message: &str) -> Self {
        Self {
            error: message.to_string(),
            status: StatusCode::UNAUTHORIZED,
        }
    }

    pub fn forbidden(message: &str) -> Self {
        Self {
            error: message.to_string(),
            status: StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Where to look for one identity value
struct Source {
    query: &'static str,
    header: &'static str,
    cookie: &'static str,
}

const SESSION: Source = Source {
    query: SESSION_QUERY,
    header: SESSION_HEADER,
    cookie: SESSION_COOKIE,
};

const TENANT: Source = Source {
    query: TENANT_QUERY,
    header: TENANT_HEADER,
    cookie: TENANT_COOKIE,
};

fn resolve(parts: &Parts, source: &Source) -> Option<String> {
    let non_empty = |v: &str| {
        let v = v.trim();
        (!v.is_empty()).then(|| v.to_string())
    };

    if let Ok(Query(params)) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri) {
        if let Some(value) = params.get(source.query).and_then(|v| non_empty(v)) {
            return Some(value);
        }
    }

    if let Some(value) = parts
        .headers
        .get(source.header)
        .and_then(|v| v.to_str().ok())
        .and_then(non_empty)
    {
        return Some(value);
    }

    let jar = CookieJar::from_headers(&parts.headers);
    jar.get(source.cookie).and_then(|c| non_empty(c.value()))
}

/// Session id of the caller; required
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for SessionIdentity
where
    S: Send + Sync,
{
    type Rejection = IdentityError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        resolve(parts, &SESSION)
            .map(SessionIdentity)
            .ok_or_else(|| IdentityError::unauthorized("Session id required"))
    }
}

/// Tenant id of the caller; required
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantIdentity(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for TenantIdentity
where
    S: Send + Sync,
{
    type Rejection = IdentityError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        resolve(parts, &TENANT)
            .map(TenantIdentity)
            .ok_or_else(|| IdentityError::unauthorized("Tenant id required"))
    }
}

/// Session (required) plus tenant (optional, empty when absent)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation(pub ConversationContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Conversation
where
    S: Send + Sync,
{
    type Rejection = IdentityError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session_id = resolve(parts, &SESSION)
            .ok_or_else(|| IdentityError::unauthorized("Session id required"))?;
        let tenant_id = resolve(parts, &TENANT).unwrap_or_default();
        Ok(Conversation(ConversationContext::new(tenant_id, session_id)))
    }
}

/// Check the publish secret. With no secret configured the endpoint is closed.
pub fn verify_publish_secret(
    expected: Option<&str>,
    provided: Option<&str>,
) -> Result<(), IdentityError> {
    let expected = expected.ok_or_else(|| IdentityError::forbidden("Remote publishing is disabled"))?;
    let provided = provided.ok_or_else(|| IdentityError::unauthorized("Publish secret required"))?;

    // Compare digests so the comparison time does not depend on the secret prefix
    if Sha256::digest(expected.as_bytes()) == Sha256::digest(provided.as_bytes()) {
        Ok(())
    } else {
        Err(IdentityError::unauthorized("Invalid publish secret"))
    }
}
