//! Sign-in handler.

use serde::Deserialize;

use crate::auth::{IssuedToken, TokenRegistry};
use crate::config::Config;
use crate::error::{AppError, Result};

/// Body of `POST /auth/token`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub identity: String,
    #[serde(default)]
    pub secret: String,
}

/// Exchange an identity and the shared secret for a sync token.
///
/// Without a configured `AUTH_SECRET` every sign-in is accepted.
pub fn handle_token(
    tokens: &TokenRegistry,
    config: &Config,
    request: TokenRequest,
) -> Result<IssuedToken> {
    if request.identity.trim().is_empty() {
        return Err(AppError::BadRequest("identity must not be empty".to_string()));
    }

    if let Some(secret) = &config.auth_secret {
        if &request.secret != secret {
            tracing::warn!(identity = %request.identity, "Sign-in rejected");
            return Err(AppError::Unauthorized("Invalid credentials"));
        }
    }

    let issued = tokens.issue(&request.identity);
    tracing::info!(identity = %request.identity, "Issued sync token");
    Ok(issued)
}
