//! Error types and handling
//!
//! Every rejection leaves the service as `{error, message, ...context}`. Credential
//! and token failures stay deliberately vague; authorization failures carry the
//! machine-readable context a client needs to render an upgrade or access-request
//! screen.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Unknown user, wrong password, or password login on an SSO-only account (401)
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Account is locked after repeated failures (401)
    #[error("Account is temporarily locked")]
    AccountLocked { retry_after_secs: u64 },

    /// Token past its expiry (401)
    #[error("Token has expired")]
    TokenExpired,

    /// Bad signature, issuer, audience, type or structure (401)
    #[error("Token is invalid")]
    TokenInvalid,

    /// User has no active organization membership (403)
    #[error("No active organization membership")]
    TenantResolutionFailed,

    /// No identity attached to the request (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Identity present but not entitled (403)
    #[error("{message}")]
    Forbidden {
        error: String,
        message: String,
        context: Map<String, Value>,
    },

    /// Missing or weak secrets; fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Too many attempts (429)
    #[error("Too many attempts")]
    RateLimited { retry_after_secs: u64 },

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unprocessable entity - validation failed (422)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Build a 403 with a stable error label and extra context fields
    pub fn forbidden(
        error: impl Into<String>,
        message: impl Into<String>,
        context: impl IntoIterator<Item = (&'static str, Value)>,
    ) -> Self {
        AppError::Forbidden {
            error: error.into(),
            message: message.into(),
            context: context
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials
            | AppError::AccountLocked { .. }
            | AppError::TokenExpired
            | AppError::TokenInvalid
            | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::TenantResolutionFailed | AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Configuration(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable error label
    pub fn error_label(&self) -> &str {
        match self {
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::AccountLocked { .. } => "ACCOUNT_LOCKED",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            AppError::TokenInvalid => "TOKEN_INVALID",
            AppError::TenantResolutionFailed => "TENANT_RESOLUTION_FAILED",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden { error, .. } => error,
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert into the response body
    pub fn to_body(&self) -> ErrorResponse {
        match self {
            AppError::Forbidden {
                error,
                message,
                context,
            } => ErrorResponse {
                error: error.clone(),
                message: message.clone(),
                context: context.clone(),
            },
            AppError::AccountLocked { retry_after_secs }
            | AppError::RateLimited { retry_after_secs } => {
                ErrorResponse::new(self.error_label(), self.to_string())
                    .with("retryAfter", Value::from(*retry_after_secs))
            }
            // Server-side detail stays in the logs
            AppError::Configuration(_) | AppError::Database(_) | AppError::Internal(_) => {
                ErrorResponse::new(self.error_label(), "An unexpected error occurred")
            }
            _ => ErrorResponse::new(self.error_label(), self.to_string()),
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            AppError::AccountLocked { retry_after_secs }
            | AppError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Error response body
#[derive(Serialize, Debug, Clone)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Additional context fields, flattened into the body
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            context: Map::new(),
        }
    }

    /// Add a context field
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, error_type = self.error_label(), "Request error");
        }

        let body = self.to_body();
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
