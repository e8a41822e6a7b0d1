//! Row endpoint routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tidepool_engine::{Fields, WireRow};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_delete, handle_get, handle_list, handle_patch, handle_put};
use crate::AppState;

/// Create row routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rows/{table}", get(list_handler))
        .route(
            "/rows/{table}/{id}",
            get(get_handler)
                .put(put_handler)
                .patch(patch_handler)
                .delete(delete_handler),
        )
}

/// GET /rows/{table} - Rows of a table visible to the caller.
async fn list_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table): Path<String>,
) -> Result<Json<Vec<WireRow>>> {
    let rows = handle_list(state.rows.as_ref(), &state.rules, &auth.identity, &table).await?;
    Ok(Json(rows))
}

/// GET /rows/{table}/{id} - One visible row.
async fn get_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<WireRow>> {
    let row = handle_get(state.rows.as_ref(), &state.rules, &auth.identity, &table, &id).await?;
    Ok(Json(row))
}

/// PUT /rows/{table}/{id} - Create or replace a row.
async fn put_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((table, id)): Path<(String, String)>,
    Json(fields): Json<Fields>,
) -> Result<Json<WireRow>> {
    let row = handle_put(
        state.rows.as_ref(),
        &state.rules,
        &auth.identity,
        &table,
        &id,
        fields,
    )
    .await?;
    Ok(Json(row))
}

/// PATCH /rows/{table}/{id} - Update some columns of a row.
async fn patch_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((table, id)): Path<(String, String)>,
    Json(fields): Json<Fields>,
) -> Result<Json<WireRow>> {
    let row = handle_patch(
        state.rows.as_ref(),
        &state.rules,
        &auth.identity,
        &table,
        &id,
        fields,
    )
    .await?;
    Ok(Json(row))
}

/// DELETE /rows/{table}/{id} - Remove a row.
async fn delete_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((table, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    handle_delete(state.rows.as_ref(), &state.rules, &auth.identity, &table, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
