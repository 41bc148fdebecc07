// HTTP API error types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::types::{now_millis, SubscriptionStatus};

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized (unauthenticated caller)
    Unauthorized(String),

    // 403 Forbidden (authenticated, insufficient role)
    Forbidden(String),

    // 403 Forbidden, quota variant
    LimitExceeded,

    // 403 Forbidden, subscription lapsed
    TierExpired(SubscriptionStatus),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 502 Bad Gateway (billing processor / external service issues)
    BadGateway(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::LimitExceeded => 403,
            ApiError::TierExpired(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalServerError(_) => 500,
            ApiError::BadGateway(_) => 502,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Unauthorized(msg) => msg.clone(),
            ApiError::Forbidden(msg) => msg.clone(),
            ApiError::LimitExceeded => "Limit Exceeded".to_string(),
            ApiError::TierExpired(status) => {
                format!("Tier Inactive. Subscription Status: {}", status.as_str())
            }
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::Conflict(msg) => msg.clone(),
            ApiError::InternalServerError(msg) => msg.clone(),
            ApiError::BadGateway(msg) => msg.clone(),
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::LimitExceeded => "LIMIT_EXCEEDED",
            ApiError::TierExpired(_) => "TIER_EXPIRED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::BadGateway(_) => "BAD_GATEWAY",
        }
    }

    /// Convert to the uniform JSON envelope (message + timestamp)
    pub fn to_json(&self) -> Value {
        json!({
            "message": self.message(),
            "code": self.error_code(),
            "timestamp": now_millis(),
        })
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        ApiError::BadGateway(message.into())
    }
}

// Convert other error types to ApiError
impl From<crate::store::StoreError> for ApiError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::NotFound { collection, id } => {
                ApiError::not_found(format!("{} {} not found", doc_kind(&collection), id))
            }
            crate::store::StoreError::Serde(e) => {
                tracing::error!("document serialization error: {}", e);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            crate::store::StoreError::Backend(msg) => {
                // Don't expose backend internals to clients
                tracing::error!("document store error: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<crate::billing::BillingError> for ApiError {
    fn from(err: crate::billing::BillingError) -> Self {
        match err {
            crate::billing::BillingError::MissingItem(kind) => {
                ApiError::bad_request(format!("No subscription item for {}", kind))
            }
            other => {
                tracing::error!("billing processor error: {}", other);
                ApiError::bad_gateway("Billing processor error")
            }
        }
    }
}

fn doc_kind(collection: &str) -> &str {
    match collection {
        crate::store::GROUPS => "Group",
        crate::store::SECTIONS => "Section",
        crate::store::SUBJECTS => "Subject",
        crate::store::ENTITIES => "Entity",
        crate::store::USERS => "User",
        crate::store::TIERS => "Tier",
        crate::store::METADATA => "Metadata",
        crate::store::ENTITY_ANALYTICS | crate::store::USER_ANALYTICS => "Analytics",
        other => other,
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}
