//! API error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by HTTP handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 404 Not Found.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

impl ApiError {
    /// No attached reader has this name.
    #[must_use]
    pub fn reader_not_found(name: &str) -> Self {
        Self::NotFound {
            error_code: "reader_not_found".to_string(),
            message: format!("No reader named '{name}' is attached"),
        }
    }
}

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "reader_not_found",
    "message": "No reader named 'ACS ACR122U 00 00' is attached"
}))]
pub struct ErrorResponse {
    /// Machine-readable error code.
    #[schema(example = "reader_not_found")]
    pub error: String,

    /// Human-readable error message.
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::NotFound {
                error_code,
                message,
            } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: error_code,
                    message,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_not_found() {
        let err = ApiError::reader_not_found("ACR122U");
        assert_eq!(err.to_string(), "Not Found: No reader named 'ACR122U' is attached");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
