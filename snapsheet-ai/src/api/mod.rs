//! HTTP API handlers for snapsheet-ai
//!
//! Identity arrives in the optional `x-user-id` header; requests without it
//! work on in-memory sessions only.

pub mod health;
pub mod projects;
pub mod sessions;
pub mod sse;

pub use health::health_routes;
pub use projects::project_routes;
pub use sessions::session_routes;

use crate::models::Identity;
use crate::ApiError;
use axum::http::HeaderMap;

/// Header carrying the caller's user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity, if the request carries one
pub fn identity_from(headers: &HeaderMap) -> Option<Identity> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|user_id| Identity::new(user_id))
}

/// Caller identity, or 400 when absent
pub fn require_identity(headers: &HeaderMap) -> Result<Identity, ApiError> {
    identity_from(headers)
        .ok_or_else(|| ApiError::BadRequest(format!("{} header is required", USER_ID_HEADER)))
}
