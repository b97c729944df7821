//! Layered error types: store failures bubble into [`ServiceError`], which
//! the embedded reconciliation server converts into HTTP responses via
//! [`AppError`].

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::{state::machine::InvalidTransition, store::StoreError};

/// Errors surfaced by the domain layers (sessions, roster, sync).
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The local durable store failed; nothing may pretend the write
    /// happened.
    #[error("storage failure")]
    Storage(#[from] StoreError),
    /// Invalid input rejected at the point of the write attempt.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested entity was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

/// Errors the embedded reconciliation server maps to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed request body.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Missing or wrong bearer credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Unknown match.
    #[error("not found: {0}")]
    NotFound(String),
    /// Unexpected server-side failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Storage(source) => AppError::Internal(source.to_string()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
