//! Sign-in routes.

use axum::{extract::State, routing::post, Json, Router};

use crate::auth::IssuedToken;
use crate::error::Result;
use crate::handlers::{handle_token, TokenRequest};
use crate::AppState;

/// Create auth routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/auth/token", post(token_handler))
}

/// POST /auth/token - Issue a sync token.
async fn token_handler(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> Result<Json<IssuedToken>> {
    let issued = handle_token(&state.tokens, &state.config, request)?;
    Ok(Json(issued))
}
