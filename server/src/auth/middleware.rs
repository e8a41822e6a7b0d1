//! Authentication extractor.
//!
//! Requests carry `Authorization: Bearer <token>` with a token issued by
//! `POST /auth/token`.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tidepool_engine::Identity;

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub identity: Identity,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = match auth_header {
            Some(header) if header.starts_with("Bearer ") => header.trim_start_matches("Bearer "),
            Some(_) => {
                return Err(AppError::Unauthorized(
                    "Invalid authorization header format",
                ))
            }
            None => return Err(AppError::Unauthorized("Missing authorization header")),
        };

        if token.is_empty() {
            return Err(AppError::Unauthorized("Empty bearer token"));
        }

        match state.tokens.resolve(token) {
            Some(identity) => Ok(AuthUser { identity }),
            None => {
                tracing::debug!("Rejected unknown or expired token");
                Err(AppError::Unauthorized("Token is invalid or expired"))
            }
        }
    }
}
