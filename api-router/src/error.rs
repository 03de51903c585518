use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(_) | AppError::OpenAI(_) | AppError::Storage(_) => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::InternalError(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::ValidationError(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::PayloadTooLarge(message) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::error::AppError;
    use std::fmt::Debug;

    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn test_app_error_to_api_error_conversion() {
        let not_found = AppError::NotFound("document missing.pdf not found".to_string());
        let api_error = ApiError::from(not_found);
        assert!(
            matches!(api_error, ApiError::NotFound(msg) if msg == "document missing.pdf not found")
        );

        let validation = AppError::Validation("question must not be empty".to_string());
        let api_error = ApiError::from(validation);
        assert!(
            matches!(api_error, ApiError::ValidationError(msg) if msg == "question must not be empty")
        );

        // Duplicate keys are an internal invariant violation, never a
        // client error.
        let duplicate = AppError::DuplicateKey("chunk id abc already present".to_string());
        let api_error = ApiError::from(duplicate);
        assert!(matches!(api_error, ApiError::InternalError(_)));

        let internal = AppError::Io(std::io::Error::other("io error"));
        let api_error = ApiError::from(internal);
        assert!(matches!(api_error, ApiError::InternalError(_)));
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::InternalError("server error".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(
            ApiError::NotFound("not found".to_string()),
            StatusCode::NOT_FOUND,
        );
        assert_status_code(
            ApiError::ValidationError("invalid input".to_string()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(
            ApiError::PayloadTooLarge("too big".to_string()),
            StatusCode::PAYLOAD_TOO_LARGE,
        );
    }

    #[test]
    fn test_internal_error_sanitization() {
        let sensitive_info = "db password incorrect";
        let api_error = ApiError::InternalError(sensitive_info.to_string());

        // The Display impl hides the payload.
        assert_eq!(api_error.to_string(), "Internal server error");
        assert_status_code(api_error, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
