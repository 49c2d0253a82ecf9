//! Error handling for the Barstock server
//!
//! Every failed ledger mutation reports the entity and the invariant that
//! was violated. Only `LockTimeout` is marked retryable.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{EntityKind, LedgerError};
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    // Validation errors
    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // Ledger errors
    #[error("Reserve entry {reserve_entry_id} has {available} units, {requested} requested")]
    InsufficientReserve {
        reserve_entry_id: Uuid,
        available: i32,
        requested: i32,
    },

    #[error("{entity} {id} has {available} units, cannot remove {requested}")]
    InsufficientQuantity {
        entity: EntityKind,
        id: Uuid,
        available: i32,
        requested: i32,
    },

    #[error("Reserve format {reserve_format_id} does not match stock format {stock_format_id}")]
    FormatMismatch {
        reserve_format_id: Uuid,
        stock_format_id: Uuid,
    },

    #[error("Bar {bar_id} already has a shift in progress")]
    ShiftAlreadyOpen { bar_id: Uuid, shift_id: Option<i64> },

    #[error("Shift {shift_id} has {} uncounted entries", .missing.len())]
    IncompleteCounts { shift_id: i64, missing: Vec<i64> },

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Timed out waiting for a row lock")]
    LockTimeout,

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Whether a client may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::LockTimeout)
    }
}

/// PostgreSQL SQLSTATE codes that surface as `LockTimeout`
const LOCK_NOT_AVAILABLE: &str = "55P03";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some(LOCK_NOT_AVAILABLE) | Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                    return AppError::LockTimeout;
                }
                Some(UNIQUE_VIOLATION) => {
                    let constraint = db_err.constraint().unwrap_or("unique constraint");
                    return AppError::Conflict(format!("duplicate value violates {}", constraint));
                }
                Some(FOREIGN_KEY_VIOLATION) => {
                    return AppError::NotFound("Referenced record".to_string());
                }
                Some(NUMERIC_VALUE_OUT_OF_RANGE) => {
                    return AppError::validation("quantity", "Quantity out of range");
                }
                _ => {}
            }
        }
        AppError::DatabaseError(err)
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientReserve {
                reserve_entry_id,
                available,
                requested,
            } => AppError::InsufficientReserve {
                reserve_entry_id,
                available,
                requested,
            },
            LedgerError::InsufficientQuantity {
                entity,
                id,
                available,
                requested,
            } => AppError::InsufficientQuantity {
                entity,
                id,
                available,
                requested,
            },
            LedgerError::FormatMismatch {
                reserve_format_id,
                stock_format_id,
            } => AppError::FormatMismatch {
                reserve_format_id,
                stock_format_id,
            },
            LedgerError::InvalidQuantity(_) | LedgerError::Overflow { .. } => {
                AppError::validation("quantity", err.to_string())
            }
            LedgerError::InvalidThresholds { .. } => {
                AppError::validation("thresholds", err.to_string())
            }
            LedgerError::NegativeCount(_) => AppError::validation("final_count", err.to_string()),
            LedgerError::IncompleteCounts { shift_id, missing } => {
                AppError::IncompleteCounts { shift_id, missing }
            }
            LedgerError::InvalidTransition { .. } => {
                AppError::InvalidStateTransition(err.to_string())
            }
            LedgerError::SnapshotMismatch { .. } => AppError::Internal(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        // Report the first failing field in name order so responses are stable
        let field_errors = errors.field_errors();
        let first = field_errors
            .iter()
            .min_by_key(|(field, _)| **field)
            .and_then(|(field, errs)| errs.first().map(|e| (*field, e)));

        match first {
            Some((field, err)) => {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("failed {} check", err.code));
                AppError::validation(field, message)
            }
            None => AppError::validation("body", "Invalid request"),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorDetail {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: None,
            retryable: false,
            details: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, mut detail) = match &self {
            AppError::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new("TOKEN_EXPIRED", "Token has expired"),
            ),
            AppError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new("INVALID_TOKEN", "Invalid token"),
            ),
            AppError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new("UNAUTHORIZED", msg.clone()),
            ),
            AppError::InsufficientPermissions(msg) => (
                StatusCode::FORBIDDEN,
                ErrorDetail::new("INSUFFICIENT_PERMISSIONS", msg.clone()),
            ),
            AppError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    field: Some(field.clone()),
                    ..ErrorDetail::new("VALIDATION_ERROR", message.clone())
                },
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", format!("{} not found", resource)),
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorDetail::new("CONFLICT", msg.clone()),
            ),
            AppError::InsufficientReserve {
                reserve_entry_id,
                available,
                requested,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail {
                    field: Some("quantity".to_string()),
                    details: Some(serde_json::json!({
                        "reserve_entry_id": reserve_entry_id,
                        "available": available,
                        "requested": requested,
                    })),
                    ..ErrorDetail::new("INSUFFICIENT_RESERVE", message)
                },
            ),
            AppError::InsufficientQuantity {
                entity,
                id,
                available,
                requested,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail {
                    details: Some(serde_json::json!({
                        "entity": entity,
                        "id": id,
                        "available": available,
                        "requested": requested,
                    })),
                    ..ErrorDetail::new("INSUFFICIENT_QUANTITY", message)
                },
            ),
            AppError::FormatMismatch {
                reserve_format_id,
                stock_format_id,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail {
                    details: Some(serde_json::json!({
                        "reserve_format_id": reserve_format_id,
                        "stock_format_id": stock_format_id,
                    })),
                    ..ErrorDetail::new("FORMAT_MISMATCH", message)
                },
            ),
            AppError::ShiftAlreadyOpen { bar_id, shift_id } => (
                StatusCode::CONFLICT,
                ErrorDetail {
                    details: Some(serde_json::json!({
                        "bar_id": bar_id,
                        "shift_id": shift_id,
                    })),
                    ..ErrorDetail::new("SHIFT_ALREADY_OPEN", message)
                },
            ),
            AppError::IncompleteCounts { shift_id, missing } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail {
                    details: Some(serde_json::json!({
                        "shift_id": shift_id,
                        "missing_count_ids": missing,
                    })),
                    ..ErrorDetail::new("INCOMPLETE_COUNTS", message)
                },
            ),
            AppError::InvalidStateTransition(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("INVALID_STATE_TRANSITION", msg.clone()),
            ),
            AppError::LockTimeout => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetail {
                    retryable: true,
                    ..ErrorDetail::new(
                        "LOCK_TIMEOUT",
                        "The ledger rows are busy, please retry",
                    )
                },
            ),
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("DATABASE_ERROR", "A database error occurred"),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg.clone()),
            ),
            AppError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", "An internal server error occurred"),
            ),
        };
        detail.retryable = self.is_retryable();

        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }

        let mut response = (status, Json(ErrorResponse { error: detail })).into_response();
        if self.is_retryable() {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
