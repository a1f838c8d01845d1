// src/errors.rs
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::services::store::StoreError;

/// Main error type for the medtransport-realtime service
#[derive(Debug)]
pub enum MarketplaceError {
    // Store errors
    StoreConnection(String),
    StoreQuery(String),
    StoreTimeout,

    // Serialization and parsing errors
    JsonParsing(String),
    JsonSerialization(String),

    // Business logic errors
    DriverNotFound(String),
    RequestNotFound(String),
    RequestNotAvailable(String),

    // Realtime communication errors
    WebSocketMessage(String),

    // Validation errors
    ValidationFailed(Vec<ValidationError>),
    InvalidFieldValue { field: String, value: String, reason: String },

    // Configuration and setup errors
    InvalidConfiguration(String),
    ServiceUnavailable(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl fmt::Display for MarketplaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketplaceError::StoreConnection(msg) => write!(f, "Store connection error: {}", msg),
            MarketplaceError::StoreQuery(msg) => write!(f, "Store query error: {}", msg),
            MarketplaceError::StoreTimeout => write!(f, "Store operation timed out"),

            MarketplaceError::JsonParsing(msg) => write!(f, "JSON parsing error: {}", msg),
            MarketplaceError::JsonSerialization(msg) => write!(f, "JSON serialization error: {}", msg),

            MarketplaceError::DriverNotFound(id) => write!(f, "Driver not found: {}", id),
            MarketplaceError::RequestNotFound(id) => write!(f, "Transport request not found: {}", id),
            MarketplaceError::RequestNotAvailable(id) => {
                write!(f, "Transport request is no longer available: {}", id)
            }

            MarketplaceError::WebSocketMessage(msg) => write!(f, "WebSocket message error: {}", msg),

            MarketplaceError::ValidationFailed(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            MarketplaceError::InvalidFieldValue { field, value, reason } => {
                write!(f, "Invalid value '{}' for field '{}': {}", value, field, reason)
            }

            MarketplaceError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            MarketplaceError::ServiceUnavailable(service) => write!(f, "Service unavailable: {}", service),
        }
    }
}

impl std::error::Error for MarketplaceError {}

impl IntoResponse for MarketplaceError {
    fn into_response(self) -> Response {
        let (status, error_type, message, details) = match self {
            MarketplaceError::JsonParsing(msg) => (StatusCode::BAD_REQUEST, "invalid_json", msg, None),

            MarketplaceError::ValidationFailed(errors) => {
                let details = serde_json::to_value(&errors).ok();
                (StatusCode::BAD_REQUEST, "validation_failed", "Validation errors occurred".to_string(), details)
            }
            MarketplaceError::InvalidFieldValue { field, value: _, reason } => {
                (StatusCode::BAD_REQUEST, "invalid_field", format!("Invalid value for {}: {}", field, reason), None)
            }

            MarketplaceError::DriverNotFound(id) => {
                (StatusCode::NOT_FOUND, "driver_not_found", format!("Driver not found: {}", id), None)
            }
            MarketplaceError::RequestNotFound(id) => {
                (StatusCode::NOT_FOUND, "request_not_found", format!("Transport request not found: {}", id), None)
            }
            MarketplaceError::RequestNotAvailable(id) => (
                StatusCode::CONFLICT,
                "request_not_available",
                format!("Transport request is no longer available: {}", id),
                None,
            ),

            MarketplaceError::StoreTimeout => {
                (StatusCode::GATEWAY_TIMEOUT, "store_timeout", "Store operation timed out".to_string(), None)
            }
            MarketplaceError::ServiceUnavailable(service) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", format!("Service unavailable: {}", service), None)
            }

            // All other errors are treated as internal server errors
            other => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", other.to_string(), None),
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
            details,
        };

        (status, axum::Json(error_response)).into_response()
    }
}

// Convenience type alias for Results
pub type MarketplaceResult<T> = Result<T, MarketplaceError>;

impl From<StoreError> for MarketplaceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) => MarketplaceError::StoreConnection(msg),
            StoreError::Timeout(_) => MarketplaceError::StoreTimeout,
            other => MarketplaceError::StoreQuery(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for MarketplaceError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::from(err).into()
    }
}

impl From<serde_json::Error> for MarketplaceError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            MarketplaceError::JsonParsing(err.to_string())
        } else {
            MarketplaceError::JsonSerialization(err.to_string())
        }
    }
}

impl From<std::io::Error> for MarketplaceError {
    fn from(err: std::io::Error) -> Self {
        MarketplaceError::ServiceUnavailable(err.to_string())
    }
}

// Helper functions for creating common errors
impl MarketplaceError {
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        MarketplaceError::ValidationFailed(vec![ValidationError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn invalid_field(field: impl Into<String>, value: impl ToString, reason: impl Into<String>) -> Self {
        MarketplaceError::InvalidFieldValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn driver_not_found(driver_id: impl Into<String>) -> Self {
        MarketplaceError::DriverNotFound(driver_id.into())
    }

    pub fn request_not_found(request_id: impl Into<String>) -> Self {
        MarketplaceError::RequestNotFound(request_id.into())
    }

    pub fn request_not_available(request_id: impl Into<String>) -> Self {
        MarketplaceError::RequestNotAvailable(request_id.into())
    }
}
