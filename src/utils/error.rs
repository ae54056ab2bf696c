//! Error Handling Utilities
//!
//! Central error type and HTTP response mapping for the service.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Main application error type that can represent errors from any feature
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Validation errors for user input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication and authorization errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Malformed or unusable request data
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Account exists but its email address has not been verified yet
    #[error("Email verification required")]
    VerificationRequired { email: String },

    /// Account has been administratively disabled
    #[error("Account disabled")]
    AccountDisabled,

    /// Resource not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate resources)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limiting and attempt-ceiling errors
    #[error("Too many requests: {message}")]
    TooManyRequests {
        message: String,
        retry_after: Option<u64>,
    },

    /// External service errors
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Generic internal server errors
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Password hashing errors
    #[error("Password hashing error: {0}")]
    HashingError(#[from] bcrypt::BcryptError),
}

/// Standard error response structure for API endpoints
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            details: None,
        }
    }

    pub fn with_details(error: &str, message: &str, details: serde_json::Value) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            details: Some(details),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body, retry_after) = match self {
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("DATABASE_ERROR", "A database error occurred"),
                None,
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("VALIDATION_ERROR", &msg),
                None,
            ),
            AppError::Authentication(msg) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("AUTHENTICATION_ERROR", &msg),
                None,
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("BAD_REQUEST", &msg),
                None,
            ),
            AppError::VerificationRequired { email } => (
                StatusCode::FORBIDDEN,
                ErrorResponse::with_details(
                    "VERIFICATION_REQUIRED",
                    "Please verify your email address before logging in",
                    serde_json::json!({ "verification_required": true, "email": email }),
                ),
                None,
            ),
            AppError::AccountDisabled => (
                StatusCode::FORBIDDEN,
                ErrorResponse::new("ACCOUNT_DISABLED", "This account has been disabled"),
                None,
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new("NOT_FOUND", &msg),
                None,
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorResponse::new("CONFLICT", &msg),
                None,
            ),
            AppError::TooManyRequests {
                message,
                retry_after,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                match retry_after {
                    Some(secs) => ErrorResponse::with_details(
                        "RATE_LIMIT_EXCEEDED",
                        &message,
                        serde_json::json!({ "retry_after": secs }),
                    ),
                    None => ErrorResponse::new("RATE_LIMIT_EXCEEDED", &message),
                },
                retry_after,
            ),
            AppError::ExternalService(_) => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse::new("EXTERNAL_SERVICE_ERROR", "External service unavailable"),
                None,
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("INTERNAL_ERROR", "An internal server error occurred"),
                None,
            ),
            AppError::Configuration(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("CONFIGURATION_ERROR", "Server configuration error"),
                None,
            ),
            AppError::HashingError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("HASHING_ERROR", "Password hashing error"),
                None,
            ),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for operations that can return AppError
pub type AppResult<T> = Result<T, AppError>;

/// Helper trait for converting other error types to AppError
pub trait IntoAppError<T> {
    fn into_app_error(self, context: &str) -> AppResult<T>;
}

impl<T, E> IntoAppError<T> for Result<T, E>
where
    E: fmt::Display,
{
    fn into_app_error(self, context: &str) -> AppResult<T> {
        self.map_err(|e| AppError::Internal(format!("{}: {}", context, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_error_response_creation() {
        let error = ErrorResponse::new("TEST_ERROR", "Test message");
        assert_eq!(error.error, "TEST_ERROR");
        assert_eq!(error.message, "Test message");
        assert!(error.details.is_none());
    }

    #[test]
    fn test_error_response_with_details() {
        let details = serde_json::json!({"field": "email", "value": "invalid"});
        let error =
            ErrorResponse::with_details("VALIDATION_ERROR", "Invalid input", details.clone());
        assert_eq!(error.error, "VALIDATION_ERROR");
        assert_eq!(error.details, Some(details));
    }

    #[test]
    fn test_rate_limit_sets_retry_after_header() {
        let error = AppError::TooManyRequests {
            message: "Too many codes requested".to_string(),
            retry_after: Some(1800),
        };

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("1800")
        );
    }

    #[test]
    fn test_verification_required_is_forbidden() {
        let error = AppError::VerificationRequired {
            email: "user@example.com".to_string(),
        };

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_app_error_display() {
        let error = AppError::Validation("Invalid email".to_string());
        assert_eq!(error.to_string(), "Validation error: Invalid email");
    }
}
