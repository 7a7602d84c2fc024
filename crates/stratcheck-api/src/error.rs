//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps trust-layer rejections from `stratcheck-core` to stable status codes
//! and machine-readable codes, with JSON bodies of the form
//! `{"error": {"code", "message", "details"?}}`.
//! Internal error details are logged, never returned.

use std::collections::BTreeMap;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use stratcheck_core::{GateError, StoreError};
use thiserror::Error;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "RATE_LIMITED", "EDIT_CONFLICT").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details for client errors (field errors, current version).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Trust-layer rejection; status depends on the variant.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// Resource not found (404).
    #[error("the requested resource could not be found")]
    NotFound,

    /// One or more fields failed validation (422).
    #[error("the request failed validation")]
    Validation(BTreeMap<String, String>),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Single-field validation failure.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Validation(BTreeMap::from([(field.to_string(), message.into())]))
    }

    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Gate(gate) => match gate {
                GateError::AuthFormat(_) => (StatusCode::UNAUTHORIZED, "AUTH_FORMAT"),
                GateError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
                GateError::AuthRequired => (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED"),
                GateError::AccountNotActivated => (StatusCode::FORBIDDEN, "ACCOUNT_NOT_ACTIVATED"),
                GateError::PermissionDenied { .. } => (StatusCode::FORBIDDEN, "PERMISSION_DENIED"),
                GateError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
                GateError::EditConflict { .. } => (StatusCode::CONFLICT, "EDIT_CONFLICT"),
                GateError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            Self::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_) | Self::Gate(GateError::Internal(_)))
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation(fields) => Some(json!(fields)),
            Self::Gate(GateError::EditConflict {
                current_version: Some(v),
            }) => Some(json!({ "current_version": v })),
            Self::Gate(GateError::PermissionDenied { required }) => {
                Some(json!({ "required_permission": required }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal error messages to clients.
        let message = if self.is_internal() {
            tracing::error!(error = %self, "internal server error");
            "the server encountered a problem and could not process your request".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: self.details(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        if status == StatusCode::UNAUTHORIZED {
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        if let Self::Gate(GateError::RateLimited { retry_after }) = &self {
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Storage failures surface as an undifferentiated internal error.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Database failures surface as an undifferentiated internal error.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
