//! Error handling shared by both loopback services.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error response structure for consistent API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

/// Application error type covering the failure taxonomy of both services.
///
/// Upstream (Spotify, cover download) failures never surface here: the
/// enrichment paths degrade to empty data instead of erroring.
#[derive(Debug, Error)]
pub enum AppError {
    // Client input errors (400)
    #[error("Invalid request format")]
    JsonParsing(#[from] JsonRejection),

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field value: {field}")]
    InvalidFieldValue { field: String, message: String },

    #[error("Unsupported audio format: {extension}")]
    UnsupportedFormat { extension: String },

    // Resource errors (404)
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    // Filesystem errors (500); partial success is reported in-band instead
    // where the pipeline can continue
    #[error("Filesystem operation failed: {context}")]
    Filesystem {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // System errors (500)
    #[error("Internal server error")]
    Internal { message: Option<String> },
}

impl AppError {
    pub fn filesystem(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Filesystem {
            context: context.into(),
            source,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: Some(message.into()),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::JsonParsing(_)
            | AppError::MissingField { .. }
            | AppError::InvalidFieldValue { .. }
            | AppError::UnsupportedFormat { .. } => StatusCode::BAD_REQUEST,

            AppError::NotFound { .. } => StatusCode::NOT_FOUND,

            AppError::Filesystem { .. } | AppError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::JsonParsing(rejection) => rejection.body_text(),
            AppError::InvalidFieldValue { message, .. } => message.clone(),
            AppError::Internal { message } => message
                .clone()
                .unwrap_or_else(|| "Internal server error".to_string()),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request handler failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            message: self.message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
