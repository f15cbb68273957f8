// src/error.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

// ============================================================================
// Service Errors
// ============================================================================

/// Failure taxonomy shared by the gateway, the preprocessing coordinator and
/// the orchestrator. Nothing outside this set crosses a component boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// No response reached us.
    Transport,
    /// Non-success status, or the service reported a failure.
    Upstream,
    /// Success status but the expected fields are missing or invalid.
    Malformed,
    /// Reading a local file failed.
    LocalIo,
    /// Aborted through a cancellation token.
    Cancelled,
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::upstream(message)
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }

    pub fn local_io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LocalIo, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Summary shown to the user in an `error` message.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Transport => "No response received from the server. \
                Please check your internet connection and try again."
                .to_string(),
            ErrorKind::Upstream => match self.status {
                Some(status) => format!("Server error: {} - {}", status, self.message),
                None => format!("The service reported a failure: {}", self.message),
            },
            ErrorKind::Malformed => format!(
                "The service returned an unexpected response ({}). Please try again later.",
                self.message
            ),
            ErrorKind::LocalIo => format!("Error reading file: {}", self.message),
            ErrorKind::Cancelled => "The request was cancelled.".to_string(),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::upstream_status(status.as_u16(), err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        Self::local_io(err.to_string())
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

// ============================================================================
// HTTP Error Type
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::NotFound,
            format!("{} not found", resource.into()),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

// ============================================================================
// Error Codes
// ============================================================================

/// HTTP-facing error class. Displays as `SCREAMING_SNAKE_CASE`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Conflict,
    ValidationError,
    ImageProcessingError,
    ServiceUnavailable,
    ExternalServiceError,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::ValidationError | Self::ImageProcessingError => 422,
            Self::ServiceUnavailable => 503,
            Self::ExternalServiceError => 502,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.http_status() >= 500
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

// ============================================================================
// Error Response for HTTP
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: AppError,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: AppError) -> Self {
        Self {
            error,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

// ============================================================================
// Error Conversion Implementations
// ============================================================================

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let code = match err.kind {
            ErrorKind::Transport => ErrorCode::ServiceUnavailable,
            ErrorKind::Upstream | ErrorKind::Malformed => ErrorCode::ExternalServiceError,
            ErrorKind::LocalIo => ErrorCode::ImageProcessingError,
            ErrorKind::Cancelled => ErrorCode::Conflict,
        };
        Self::new(code, err.user_message()).with_details(serde_json::json!({ "kind": err.kind }))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("JSON error: {}", err))
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        Self::bad_request(format!("Multipart: {}", err))
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;
        use axum::http::StatusCode;

        log_error(&self);

        let status = StatusCode::from_u16(self.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let response = ErrorResponse::new(self);

        (status, Json(response)).into_response()
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn log_error(error: &AppError) {
    if error.code.is_server_error() {
        log::error!("{}", error);
    } else {
        log::warn!("{}", error);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_per_kind() {
        let transport = ServiceError::transport("connection refused");
        assert!(transport.user_message().contains("No response received"));

        let upstream = ServiceError::upstream_status(500, "boom");
        assert_eq!(upstream.user_message(), "Server error: 500 - boom");

        let job = ServiceError::upstream("text extraction job failed");
        assert!(job.user_message().contains("text extraction job failed"));

        let malformed = ServiceError::malformed("missing choices");
        assert!(malformed.user_message().contains("missing choices"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::LocalIo.to_string(), "local_io");
        let err = ServiceError::malformed("no captions");
        assert_eq!(err.to_string(), "malformed error: no captions");
    }

    #[test]
    fn test_service_error_to_app_error() {
        let app: AppError = ServiceError::transport("down").into();
        assert_eq!(app.code, ErrorCode::ServiceUnavailable);
        assert_eq!(app.code.http_status(), 503);

        let app: AppError = ServiceError::local_io("not an image").into();
        assert_eq!(app.code, ErrorCode::ImageProcessingError);
        assert!(!app.code.is_server_error());
    }

    #[test]
    fn test_error_display() {
        let err = AppError::not_found("Preview");
        let display = format!("{}", err);
        assert!(display.contains("NOT_FOUND"));
        assert!(display.contains("Preview"));
    }

    #[test]
    fn test_json_serialization() {
        let err = AppError::conflict("A turn is already in progress");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("Conflict"));
        let kind = serde_json::to_string(&ErrorKind::Upstream).unwrap();
        assert_eq!(kind, "\"upstream\"");
    }
}
