//! HTTP error responses for the resource API.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use reconcile_worker::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Body of every error response.
///
/// ```json
/// { "code": 1004, "error": "NOT_FOUND", "message": "Email default/welcome not found" }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Integer code for logging and monitoring
    pub code: i32,
    /// Machine-readable identifier
    pub error: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("JSON extraction error: {0}")]
    JsonExtractorRejection(#[from] JsonRejection),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service Unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, i32, &'static str) {
        match self {
            ApiError::JsonExtractorRejection(e) => (e.status(), 1003, "JSON_EXTRACTION"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, 1001, "VALIDATION_ERROR"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, 1004, "NOT_FOUND"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, 1008, "CONFLICT"),
            ApiError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, 1011, "SERVICE_UNAVAILABLE")
            }
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::JsonExtractorRejection(e) => e.body_text(),
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::ServiceUnavailable(msg) => msg.clone(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::AlreadyExists { .. } | StoreError::Conflict { .. } => {
                ApiError::Conflict(err.to_string())
            }
            StoreError::Unavailable(_) => ApiError::ServiceUnavailable(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, error) = self.parts();
        let message = self.message();

        if status.is_server_error() {
            tracing::error!(error_code = code, "{}", message);
        } else {
            tracing::debug!(error_code = code, "{}", message);
        }

        let body = ErrorResponse {
            code,
            error: error.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
