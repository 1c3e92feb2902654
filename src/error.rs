//! # Error Handling
//!
//! This module defines custom error types and how they're converted to HTTP responses.
//! This is a great example of Rust's powerful error handling system.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **Purpose**: Forces you to handle both success and failure cases
//! - **T**: The success type (what you get when everything works)
//! - **E**: The error type (what you get when something goes wrong)
//! - **No exceptions**: Rust doesn't have try/catch, it uses Result instead
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of error
//! - **Data**: Each variant can hold additional information (String, numbers, etc.)
//! - **Pattern matching**: Use `match` to handle different error types
//!
//! ### Traits for Error Conversion
//! - **From trait**: Automatically converts between error types
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted as strings
//!
//! ## Failure surface:
//! Job execution failures never reach this type; the executor converts
//! them into a `failed` job row with an error_message. AppError only covers
//! what the HTTP boundary itself can reject.

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

use crate::jobs::retry::RetryError;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **InputMissing**: The referenced audio file does not exist, caught
///   before a job row is ever created (404 errors)
/// - **InvalidTransition**: A retry was requested from a state that does
///   not allow it (409 errors)
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::BadRequest("Invalid JSON".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (database failures, memory issues, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// The referenced audio payload does not exist
    InputMissing(String),

    /// The requested job state transition is not allowed
    InvalidTransition(String),
}

/// Implementation of the Display trait for AppError.
///
/// ## Purpose:
/// This trait defines how errors are formatted as human-readable strings.
/// It's used when you print an error or convert it to a string.
impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::InputMissing(msg) => write!(f, "Input missing: {}", msg),
            AppError::InvalidTransition(msg) => write!(f, "Invalid state transition: {}", msg),
        }
    }
}

/// Implementation of the ResponseError trait for AppError.
///
/// ## Purpose:
/// This trait converts our custom errors into HTTP responses that clients can understand.
/// It automatically handles the conversion when an error is returned from a handler.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500 (Internal Server Error)
/// - BadRequest/ValidationError → 400 (Bad Request)
/// - NotFound/InputMissing → 404 (Not Found)
/// - InvalidTransition → 409 (Conflict)
///
/// ## JSON Response Format:
/// All errors return JSON with a consistent structure:
/// ```json
/// {
///   "error": {
///     "type": "invalid_transition",
///     "message": "Only pending or failed jobs can be retried (job is completed)",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        // Map each error type to HTTP status code, error type, and message
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,  // 404
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "validation_error",
                msg.clone(),
            ),
            AppError::InputMissing(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,  // 404
                "input_missing",
                msg.clone(),
            ),
            AppError::InvalidTransition(msg) => (
                actix_web::http::StatusCode::CONFLICT,  // 409
                "invalid_transition",
                msg.clone(),
            ),
        };

        // Build the HTTP response with JSON body
        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": message,           // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()  // When the error occurred
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// ## Purpose:
/// The store and setup paths use anyhow internally. This conversion allows
/// handlers to use `?` on those results and get a 500 back automatically.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Automatic conversion from JSON parsing errors to AppError.
///
/// ## Why BadRequest:
/// JSON parsing errors are almost always due to the client sending malformed data,
/// so they should result in a 400 (Bad Request) response, not a 500 (Internal Server Error).
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Automatic conversion from configuration errors to AppError.
///
/// ## When this happens:
/// - config.toml file has invalid syntax
/// - Required environment variables are missing
/// - Configuration values fail validation
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Automatic conversion from retry refusals to AppError.
///
/// ## Status mapping:
/// An unknown job is a 404, a non-retryable state is a 409, and a store
/// failure is a 500. Each variant carries its own message through.
impl From<RetryError> for AppError {
    fn from(err: RetryError) -> Self {
        match &err {
            RetryError::NotFound(_) => AppError::NotFound(err.to_string()),
            RetryError::InvalidTransition(_) => AppError::InvalidTransition(err.to_string()),
            RetryError::Store(_) => AppError::Internal(err.to_string()),
        }
    }
}

/// Type alias for Results that use our custom error type.
///
/// ## Purpose:
/// This creates a shorthand for `Result<T, AppError>` so you can write
/// `AppResult<String>` instead of `Result<String, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
