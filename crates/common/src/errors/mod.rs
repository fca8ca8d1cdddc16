//! Error types for RelayForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - The `{ success: false, error, code }` response envelope
//! - Error codes for client handling

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
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
    ValidationError,
    MissingField,
    InvalidFormat,

    // Authentication errors (2xxx)
    Unauthorized,
    InvalidApiKey,
    ExpiredToken,

    // Authorization errors (3xxx)
    Forbidden,
    InsufficientPermissions,
    TenantMismatch,
    TenantInactive,

    // Resource errors (4xxx)
    NotFound,
    TenantNotFound,
    MemberNotFound,
    ApiKeyNotFound,
    UserNotFound,
    ProviderNotFound,

    // Conflict errors (5xxx)
    Conflict,
    LastOwner,
    PlanLimitReached,

    // Rate limiting (6xxx)
    RateLimited,
    QuotaExceeded,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    IdentityProviderError,
    ProviderError,
    ProviderTimeout,
    CircuitBreakerOpen,
    NoEligibleProvider,
    RoutingFailed,

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
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,

            // Auth (2xxx)
            ErrorCode::Unauthorized => 2001,
            ErrorCode::InvalidApiKey => 2002,
            ErrorCode::ExpiredToken => 2003,

            // Authz (3xxx)
            ErrorCode::Forbidden => 3001,
            ErrorCode::InsufficientPermissions => 3002,
            ErrorCode::TenantMismatch => 3003,
            ErrorCode::TenantInactive => 3004,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::TenantNotFound => 4002,
            ErrorCode::MemberNotFound => 4003,
            ErrorCode::ApiKeyNotFound => 4004,
            ErrorCode::UserNotFound => 4005,
            ErrorCode::ProviderNotFound => 4006,

            // Conflicts (5xxx)
            ErrorCode::Conflict => 5001,
            ErrorCode::LastOwner => 5002,
            ErrorCode::PlanLimitReached => 5003,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,
            ErrorCode::QuotaExceeded => 6002,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::IdentityProviderError => 8001,
            ErrorCode::ProviderError => 8002,
            ErrorCode::ProviderTimeout => 8003,
            ErrorCode::CircuitBreakerOpen => 8004,
            ErrorCode::NoEligibleProvider => 8005,
            ErrorCode::RoutingFailed => 8006,

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
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Token expired")]
    ExpiredToken,

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Missing required permission: {permission}")]
    InsufficientPermissions { permission: String },

    #[error("Tenant mismatch")]
    TenantMismatch,

    #[error("Tenant {id} is not active")]
    TenantInactive { id: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Tenant not found: {id}")]
    TenantNotFound { id: String },

    #[error("Member not found: {user_id}")]
    MemberNotFound { user_id: String },

    #[error("API key not found: {id}")]
    ApiKeyNotFound { id: String },

    #[error("User not found: {id}")]
    UserNotFound { id: String },

    #[error("Provider not found: {name}")]
    ProviderNotFound { name: String },

    // Conflict errors
    #[error("Duplicate resource: {message}")]
    Duplicate { message: String },

    #[error("A tenant must keep at least one owner")]
    LastOwner,

    #[error("Plan limit reached: {message}")]
    PlanLimitReached { message: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    #[error("Monthly request quota of {limit} exhausted for tenant {tenant_id}")]
    QuotaExceeded { tenant_id: String, limit: i64 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Identity provider error: {message}")]
    IdentityProvider { message: String },

    #[error("Provider {provider} failed: {message}")]
    Provider {
        provider: String,
        message: String,
        retryable: bool,
    },

    #[error("Provider {provider} timed out after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("Circuit breaker open for service: {service}")]
    CircuitBreakerOpen { service: String },

    #[error("No provider satisfies the request: {reason}")]
    NoEligibleProvider { reason: String },

    #[error("All providers failed: {message}")]
    RoutingFailed { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::InvalidApiKey => ErrorCode::InvalidApiKey,
            AppError::ExpiredToken => ErrorCode::ExpiredToken,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::InsufficientPermissions { .. } => ErrorCode::InsufficientPermissions,
            AppError::TenantMismatch => ErrorCode::TenantMismatch,
            AppError::TenantInactive { .. } => ErrorCode::TenantInactive,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::TenantNotFound { .. } => ErrorCode::TenantNotFound,
            AppError::MemberNotFound { .. } => ErrorCode::MemberNotFound,
            AppError::ApiKeyNotFound { .. } => ErrorCode::ApiKeyNotFound,
            AppError::UserNotFound { .. } => ErrorCode::UserNotFound,
            AppError::ProviderNotFound { .. } => ErrorCode::ProviderNotFound,
            AppError::Duplicate { .. } => ErrorCode::Conflict,
            AppError::LastOwner => ErrorCode::LastOwner,
            AppError::PlanLimitReached { .. } => ErrorCode::PlanLimitReached,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::IdentityProvider { .. } => ErrorCode::IdentityProviderError,
            AppError::Provider { .. } => ErrorCode::ProviderError,
            AppError::ProviderTimeout { .. } => ErrorCode::ProviderTimeout,
            AppError::CircuitBreakerOpen { .. } => ErrorCode::CircuitBreakerOpen,
            AppError::NoEligibleProvider { .. } => ErrorCode::NoEligibleProvider,
            AppError::RoutingFailed { .. } => ErrorCode::RoutingFailed,
            AppError::HttpClient(_) => ErrorCode::ProviderError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } |
            AppError::MissingField { .. } |
            AppError::InvalidFormat { .. } |
            AppError::NoEligibleProvider { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } |
            AppError::InvalidApiKey |
            AppError::ExpiredToken => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::Forbidden { .. } |
            AppError::InsufficientPermissions { .. } |
            AppError::TenantMismatch |
            AppError::TenantInactive { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. } |
            AppError::TenantNotFound { .. } |
            AppError::MemberNotFound { .. } |
            AppError::ApiKeyNotFound { .. } |
            AppError::UserNotFound { .. } |
            AppError::ProviderNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Duplicate { .. } |
            AppError::LastOwner |
            AppError::PlanLimitReached { .. } => StatusCode::CONFLICT,

            // 429 Too Many Requests
            AppError::RateLimited { .. } |
            AppError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_) |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::RoutingFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::IdentityProvider { .. } |
            AppError::Provider { .. } |
            AppError::ProviderTimeout { .. } |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::DatabaseConnection { .. } |
            AppError::CircuitBreakerOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
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

    /// Whether a provider call that failed with this error is worth repeating
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Provider { retryable, .. } => *retryable,
            AppError::ProviderTimeout { .. } => true,
            AppError::HttpClient(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Failure envelope returned by every endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
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
            success: false,
            error: message,
            code,
            field,
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string()
        }
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

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let text = rejection.body_text();

        // serde reports "missing field `name` at line 1 column 2"
        if let Some(field) = text
            .split("missing field `")
            .nth(1)
            .and_then(|rest| rest.split('`').next())
        {
            return AppError::MissingField { field: field.to_string() };
        }

        AppError::Validation {
            message: text,
            field: None,
        }
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidFormat {
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidFormat {
            message: rejection.body_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::TenantNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::TenantNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "Invalid name".into(),
            field: Some("name".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_routing_failure_is_internal_error() {
        let err = AppError::RoutingFailed {
            message: "openai: 503".into()
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_server_error());
    }

    #[test]
    fn test_retryable_classification() {
        let transient = AppError::Provider {
            provider: "openai".into(),
            message: "503".into(),
            retryable: true,
        };
        let permanent = AppError::Provider {
            provider: "openai".into(),
            message: "400".into(),
            retryable: false,
        };
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(AppError::ProviderTimeout { provider: "x".into(), timeout_ms: 10 }.is_retryable());
        assert!(!AppError::LastOwner.is_retryable());
    }

    #[tokio::test]
    async fn test_error_envelope_shape() {
        let response = AppError::MissingField { field: "prompt".into() }.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "MISSING_FIELD");
        assert_eq!(body["field"], "prompt");
        assert!(body["error"].as_str().unwrap().contains("prompt"));
    }
}
