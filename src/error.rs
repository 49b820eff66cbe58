use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::{Diagnostic, Result};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::validation::ValidationError;

/// Main error type for the application
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Environment error: {0}")]
    #[diagnostic(code(taskpilot::environment))]
    Environment(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(taskpilot::config))]
    Config(String),

    #[error("Session store error: {0}")]
    #[diagnostic(code(taskpilot::session))]
    Session(String),

    #[error("Identity provider error: {0}")]
    #[diagnostic(code(taskpilot::identity))]
    Identity(String),

    #[error(transparent)]
    #[diagnostic(code(taskpilot::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(taskpilot::serialization))]
    Serialization(String),

    #[error("Other error: {0}")]
    #[diagnostic(code(taskpilot::other))]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Type alias for Result with our Error type
pub type AppResult<T> = Result<T, Error>;

/// Helper to create environment errors
pub fn env_error(var: &str) -> Error {
    Error::Environment(format!("Missing environment variable: {}", var))
}

/// Helper to create configuration errors
#[allow(dead_code)]
pub fn config_error(message: &str) -> Error {
    Error::Config(message.to_string())
}

/// Helper to create session store errors
pub fn session_error(message: &str) -> Error {
    Error::Session(message.to_string())
}

/// Error type returned to HTTP callers
///
/// Maps the request-handling taxonomy onto status codes. Provider internals
/// never reach the response body; they are logged server-side instead.
#[derive(Debug)]
pub enum ApiError {
    /// No session, or the session carries no credential
    Unauthenticated,
    /// Token refresh failed; the caller must sign in again
    RefreshFailed,
    /// The inbound request failed validation
    Validation(ValidationError),
    /// The model provider reported a rate-limit condition
    RateLimited,
    /// The upstream response was structurally unexpected
    UpstreamInvalid,
    /// Any other failure; detail is logged, the caller sees a generic message
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Not authenticated" })),
            )
                .into_response(),
            ApiError::RefreshFailed => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Session expired, please sign in again" })),
            )
                .into_response(),
            ApiError::Validation(err) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response(),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "The assistant is receiving too many requests, please try again in a moment" })),
            )
                .into_response(),
            ApiError::UpstreamInvalid => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "Unexpected response from the calendar service" })),
            )
                .into_response(),
            ApiError::Internal(detail) => {
                error!("Internal error while handling request: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Something went wrong, please try again" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

/// Type alias for handler results
pub type ApiResult<T> = std::result::Result<T, ApiError>;
