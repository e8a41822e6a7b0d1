//! Unified error handling for the server.
//!
//! Every rejection carries a SQLSTATE-style code so clients can tell
//! permanent rejections from transient failures without parsing messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tidepool_engine::SchemaViolation;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema violation: {0}")]
    Schema(#[from] SchemaViolation),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: Option<String>,
    pub message: String,
}

impl AppError {
    /// Status code and remote error code for this error.
    pub fn status_and_code(&self) -> (StatusCode, Option<String>) {
        match self {
            AppError::Database(e) => {
                // Constraint and data errors keep their SQLSTATE.
                let code = e
                    .as_database_error()
                    .and_then(|db| db.code())
                    .map(|code| code.into_owned());
                let status = match code.as_deref().map(|c| c.get(..2)) {
                    Some(Some("23")) => StatusCode::CONFLICT,
                    Some(Some("22")) | Some(Some("42")) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, code)
            }
            AppError::Schema(violation) => (
                StatusCode::BAD_REQUEST,
                Some(schema_code(violation).to_string()),
            ),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, Some("22023".to_string())),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, Some("42501".to_string())),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, Some("PGRST116".to_string())),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, Some("PGRST301".to_string())),
        }
    }
}

fn schema_code(violation: &SchemaViolation) -> &'static str {
    match violation {
        SchemaViolation::UnknownTable(_) => "42P01",
        SchemaViolation::UnknownColumn { .. } | SchemaViolation::ReservedColumn { .. } => "42703",
        SchemaViolation::TypeMismatch { .. } => "22P02",
        SchemaViolation::EmptyRecordId(_)
        | SchemaViolation::EmptyPatch { .. }
        | SchemaViolation::EmptyTransaction => "22023",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                if code.is_some() {
                    e.to_string()
                } else {
                    "Database error".to_string()
                }
            }
            AppError::Schema(violation) => {
                tracing::warn!(code = ?code, "Rejected write: {}", violation);
                violation.to_string()
            }
            AppError::Forbidden(msg) => {
                tracing::warn!("Forbidden: {}", msg);
                msg.clone()
            }
            AppError::BadRequest(msg) | AppError::NotFound(msg) => msg.clone(),
            AppError::Unauthorized(msg) => msg.to_string(),
        };

        (status, Json(ErrorResponse { code, message })).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
