//! Error types for the recommendation services
//!
//! Provides a single error enum shared by every crate with:
//! - Distinct variants for each failure mode of a synchronization run
//! - HTTP status code mapping for the HTTP layer
//! - Structured error responses
//! - Retry classification for the batch driver

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,

    // Resource errors (4xxx)
    UserNotFound,
    DiplomaNotFound,
    FeedbackNotFound,

    // Conflict errors (5xxx)
    Conflict,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,
    TransactionError,

    // External service errors (8xxx)
    PredictorUnavailable,
    PredictorTimeout,
    InvalidPredictorPayload,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,

            ErrorCode::UserNotFound => 4002,
            ErrorCode::DiplomaNotFound => 4003,
            ErrorCode::FeedbackNotFound => 4004,

            ErrorCode::Conflict => 5001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::TransactionError => 7003,

            ErrorCode::PredictorUnavailable => 8002,
            ErrorCode::PredictorTimeout => 8003,
            ErrorCode::InvalidPredictorPayload => 8004,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    // Resource errors
    #[error("User not found: {email}")]
    UserNotFound { email: String },

    #[error("Diploma not found: {name}")]
    DiplomaNotFound { name: String },

    #[error("No feedback from {email} on diploma {diploma}")]
    FeedbackNotFound { email: String, diploma: String },

    // Conflict errors, recovered by the writer that hit them
    #[error("Duplicate resource: {message}")]
    Duplicate { message: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Transaction failed: {message}")]
    Transaction { message: String },

    // Predictor errors
    #[error("Predictor unavailable: {message}")]
    PredictorUnavailable { message: String },

    #[error("Predictor timeout after {timeout_ms}ms")]
    PredictorTimeout { timeout_ms: u64 },

    #[error("Invalid predictor payload: {message}")]
    InvalidPredictorPayload { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation failure on a named field
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::UserNotFound { .. } => ErrorCode::UserNotFound,
            AppError::DiplomaNotFound { .. } => ErrorCode::DiplomaNotFound,
            AppError::FeedbackNotFound { .. } => ErrorCode::FeedbackNotFound,
            AppError::Duplicate { .. } => ErrorCode::Conflict,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Transaction { .. } => ErrorCode::TransactionError,
            AppError::PredictorUnavailable { .. } => ErrorCode::PredictorUnavailable,
            AppError::PredictorTimeout { .. } => ErrorCode::PredictorTimeout,
            AppError::InvalidPredictorPayload { .. } => ErrorCode::InvalidPredictorPayload,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::MissingField { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::UserNotFound { .. }
            | AppError::DiplomaNotFound { .. }
            | AppError::FeedbackNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Duplicate { .. } => StatusCode::CONFLICT,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::Transaction { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::PredictorUnavailable { .. }
            | AppError::InvalidPredictorPayload { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::DatabaseConnection { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::PredictorTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether the predictor is the failing party (aborts a run, store untouched)
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            AppError::PredictorUnavailable { .. }
                | AppError::PredictorTimeout { .. }
                | AppError::InvalidPredictorPayload { .. }
        )
    }

    /// Whether repeating the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        self.is_upstream()
            || matches!(
                self,
                AppError::Database(_)
                    | AppError::DatabaseConnection { .. }
                    | AppError::Transaction { .. }
                    | AppError::Duplicate { .. }
            )
    }

    /// Whether the input itself is unusable, so retrying it cannot help
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. }
                | AppError::MissingField { .. }
                | AppError::InvalidPredictorPayload { .. }
        )
    }

    /// True when the storage layer rejected an insert on a natural-key constraint
    pub fn is_unique_violation(&self) -> bool {
        match self {
            AppError::Database(err) => is_unique_violation(err),
            AppError::Duplicate { .. } => true,
            _ => false,
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

/// Classify a raw database error as a uniqueness violation
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
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
    pub field: Option<String>,
    pub retryable: bool,
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

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            AppError::MissingField { field } => Some(field.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                field,
                retryable: self.is_retryable(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: errors.to_string(),
            field,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::DiplomaNotFound { name: "CS-BSc".into() };
        assert_eq!(err.code(), ErrorCode::DiplomaNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::validation("rating", "must be between 0 and 5");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_predictor_errors_are_retryable_upstream() {
        let timeout = AppError::PredictorTimeout { timeout_ms: 5000 };
        assert!(timeout.is_upstream());
        assert!(timeout.is_retryable());
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let payload = AppError::InvalidPredictorPayload { message: "not an array".into() };
        assert!(payload.is_upstream());
        assert_eq!(payload.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_storage_errors_are_retryable_but_not_upstream() {
        let err = AppError::Transaction { message: "commit failed".into() };
        assert!(err.is_retryable());
        assert!(!err.is_upstream());
        assert!(err.is_server_error());
    }

    #[test]
    fn test_invalid_input_excludes_storage_failures() {
        assert!(AppError::validation("duration", "must not be negative").is_invalid_input());
        assert!(AppError::MissingField { field: "Nom_Diplôme".into() }.is_invalid_input());
        assert!(!AppError::Transaction { message: "commit failed".into() }.is_invalid_input());
        assert!(!AppError::Database(DbErr::Custom("connection reset".into())).is_invalid_input());
        assert!(!AppError::Internal { message: "missing".into() }.is_invalid_input());
    }

    #[test]
    fn test_duplicate_counts_as_unique_violation() {
        let err = AppError::Duplicate { message: "career/Data Scientist".into() };
        assert!(err.is_unique_violation());
        assert_eq!(err.code().as_code(), 5001);
    }
}
