//! Error types for ResuMatch services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - A retryable/fatal split consumed by the worker's failure classifier
//! - HTTP status code mapping
//! - Structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    InvalidParameter,
    ValidationError,
    PayloadTooLarge,

    // Resource errors (4xxx)
    NotFound,
    JobNotFound,

    // Conflict errors (5xxx)
    Conflict,
    RetriesExhausted,
    Cancelled,

    // External service errors (8xxx)
    EmbeddingUnavailable,
    ExternalServiceError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::InvalidParameter => 1001,
            ErrorCode::ValidationError => 1002,
            ErrorCode::PayloadTooLarge => 1003,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::JobNotFound => 4002,

            // Conflicts (5xxx)
            ErrorCode::Conflict => 5001,
            ErrorCode::RetriesExhausted => 5002,
            ErrorCode::Cancelled => 5003,

            // External (8xxx)
            ErrorCode::EmbeddingUnavailable => 8001,
            ErrorCode::ExternalServiceError => 8002,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Caller misuse, never retried
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Analysis job not found: {id}")]
    JobNotFound { id: String },

    // Conflict errors
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Retry budget exhausted after {attempts} attempts for fingerprint {fingerprint}")]
    RetriesExhausted { fingerprint: String, attempts: u32 },

    // Terminal but not a failure: result is absent, not an error payload
    #[error("Analysis cancelled")]
    Cancelled,

    // External service errors (transient)
    #[error("Embedding service unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    #[error("External service error from {service}: {message}")]
    ExternalService { service: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::JobNotFound { .. } => ErrorCode::JobNotFound,
            AppError::Conflict { .. } => ErrorCode::Conflict,
            AppError::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            AppError::Cancelled => ErrorCode::Cancelled,
            AppError::EmbeddingUnavailable { .. } => ErrorCode::EmbeddingUnavailable,
            AppError::ExternalService { .. } => ErrorCode::ExternalServiceError,
            AppError::HttpClient(_) => ErrorCode::ExternalServiceError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether this error is transient and eligible for backoff retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::EmbeddingUnavailable { .. }
                | AppError::ExternalService { .. }
                | AppError::HttpClient(_)
        )
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::InvalidParameter { .. } | AppError::Validation { .. } => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            AppError::NotFound { .. } | AppError::JobNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict { .. }
            | AppError::RetriesExhausted { .. }
            | AppError::Cancelled => StatusCode::CONFLICT,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 500 Internal Server Error
            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingUnavailable { .. }
            | AppError::ExternalService { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                request_id: None, // Filled by middleware when present
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}
