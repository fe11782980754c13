// src/errors.rs
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AtelierError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Guest preview limit of {limit} reached")]
    QuotaExceeded { limit: u32 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream provider error: {0}")]
    Upstream(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid provider: {0}")]
    InvalidProvider(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AtelierError {
    /// Stable machine-readable code sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AtelierError::NotFound(_) => "NOT_FOUND",
            AtelierError::AccessDenied(_) => "ACCESS_DENIED",
            AtelierError::QuotaExceeded { .. } => "GUEST_QUOTA_EXCEEDED",
            AtelierError::Validation(_) => "VALIDATION_ERROR",
            AtelierError::Upstream(_) => "UPSTREAM_PROVIDER_FAILURE",
            AtelierError::Storage(_) => "STORAGE_FAILURE",
            AtelierError::Redis(_) => "DATABASE_ERROR",
            AtelierError::Serialization(_) => "DATA_PROCESSING_ERROR",
            AtelierError::InvalidProvider(_) => "INVALID_PROVIDER",
            AtelierError::InvalidTransition(_) => "INVALID_TRANSITION",
            AtelierError::Config(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl ResponseError for AtelierError {
    fn status_code(&self) -> StatusCode {
        match self {
            AtelierError::NotFound(_) => StatusCode::NOT_FOUND,
            AtelierError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AtelierError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AtelierError::Validation(_) => StatusCode::BAD_REQUEST,
            AtelierError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AtelierError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AtelierError::Redis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AtelierError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AtelierError::InvalidProvider(_) => StatusCode::BAD_REQUEST,
            AtelierError::InvalidTransition(_) => StatusCode::CONFLICT,
            AtelierError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Infrastructure failures never leak their internals to the caller.
        let message = match self {
            AtelierError::Redis(_) | AtelierError::Serialization(_) | AtelierError::Config(_) => {
                "An internal error occurred".to_string()
            }
            AtelierError::Storage(_) => "File storage is unavailable".to_string(),
            AtelierError::Upstream(_) => "AI service error".to_string(),
            _ => self.to_string(),
        };

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.code(),
            "message": message
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_maps_to_429_with_signup_code() {
        let err = AtelierError::QuotaExceeded { limit: 5 };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.code(), "GUEST_QUOTA_EXCEEDED");
        assert_eq!(err.to_string(), "Guest preview limit of 5 reached");
    }

    #[test]
    fn access_and_lookup_errors_map_to_client_statuses() {
        assert_eq!(
            AtelierError::NotFound("Configuration".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AtelierError::AccessDenied("other owner".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AtelierError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
