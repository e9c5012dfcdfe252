use http::StatusCode;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Error payload handed to the request layer.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. `insufficient_stock`
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Insufficient stock for {stock_id}: requested {requested}, available {available}")]
    InsufficientStock {
        stock_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Promotion expired: {0}")]
    PromotionExpired(String),

    #[error("Promotion usage limit reached: {0}")]
    PromotionUsageExceeded(String),

    #[error("Payment callback signature is invalid")]
    SignatureInvalid,

    #[error("Duplicate payment callback: {0}")]
    DuplicateCallback(String),

    #[error("Concurrent modification: {0}")]
    Contention(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Maps store errors, splitting out lock/serialization conflicts so they can be retried.
    pub fn from_db(error: DbErr) -> Self {
        let message = error.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("database is locked")
            || lowered.contains("could not serialize access")
            || lowered.contains("deadlock detected")
        {
            ServiceError::Contention(message)
        } else {
            ServiceError::DatabaseError(error)
        }
    }

    /// True for failures caused by two writers hitting the same row.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Contention(_))
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidStatusTransition { .. }
            | Self::DuplicateCallback(_)
            | Self::Contention(_) => StatusCode::CONFLICT,
            Self::PromotionExpired(_) | Self::PromotionUsageExceeded(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::SignatureInvalid => StatusCode::UNAUTHORIZED,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::Forbidden(_) => "forbidden",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidStatusTransition { .. } => "invalid_status_transition",
            Self::PromotionExpired(_) => "promotion_expired",
            Self::PromotionUsageExceeded(_) => "promotion_usage_exceeded",
            Self::SignatureInvalid => "signature_invalid",
            Self::DuplicateCallback(_) => "duplicate_callback",
            Self::Contention(_) => "contention",
            Self::Timeout(_) => "timeout",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            Self::Contention(_) => "The resource is busy, please retry".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_maps_to_unprocessable() {
        let err = ServiceError::InsufficientStock {
            stock_id: Uuid::nil(),
            requested: 3,
            available: 2,
        };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.error_code(), "insufficient_stock");
        assert!(err.to_string().contains("requested 3, available 2"));
    }

    #[test]
    fn test_database_details_are_hidden() {
        let err = ServiceError::DatabaseError(DbErr::Custom("relation stocks missing".into()));
        assert_eq!(err.response_message(), "Database error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_response_carries_stable_code() {
        let response = ServiceError::SignatureInvalid.to_response();
        assert_eq!(response.code, "signature_invalid");
        assert_eq!(response.message, "Payment callback signature is invalid");
    }

    #[test]
    fn test_lock_errors_become_contention() {
        let err = ServiceError::from_db(DbErr::Custom("database is locked".into()));
        assert!(err.is_transient());
        let err = ServiceError::from_db(DbErr::Custom("syntax error".into()));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transition_error_names_both_states() {
        let err = ServiceError::InvalidStatusTransition {
            from: OrderStatus::Delivered,
            to: OrderStatus::Cancelled,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition from DELIVERED to CANCELLED"
        );
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
