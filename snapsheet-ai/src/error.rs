//! Error types for snapsheet-ai HTTP handlers

use crate::services::{ExtractionError, GatewayError};
use crate::workflow::PipelineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Session operation failed
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Project store failed
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// snapsheet-common error
    #[error("Common error: {0}")]
    Common(#[from] snapsheet_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Pipeline(PipelineError::NotFound(msg))
            | ApiError::Gateway(GatewayError::NotFound(msg))
            | ApiError::Pipeline(PipelineError::Persistence(GatewayError::NotFound(msg))) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Pipeline(PipelineError::Extraction(ExtractionError::InvalidInput(msg))) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Pipeline(PipelineError::Extraction(ref err)) => {
                (StatusCode::BAD_GATEWAY, "EXTRACTION_ERROR", err.to_string())
            }
            ApiError::Pipeline(PipelineError::Persistence(ref err)) | ApiError::Gateway(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PERSISTENCE_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
