//! HTTP handlers for catalog lookups

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::models::Format;
use crate::services::CatalogService;
use crate::AppState;

/// Get a format by ID
pub async fn get_format(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(format_id): Path<Uuid>,
) -> AppResult<Json<Format>> {
    let service = CatalogService::new(state.db);
    let format = service.get_format(&current_user.0, format_id).await?;
    Ok(Json(format))
}
