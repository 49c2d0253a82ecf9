//! HTTP handler for the restock advisory

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::restock::RestockReport;
use crate::services::RestockService;
use crate::AppState;

/// Ranked list of formats the bar should reorder
pub async fn get_restock_advice(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(bar_id): Path<Uuid>,
) -> AppResult<Json<RestockReport>> {
    let service = RestockService::new(state.db);
    let report = service.advise(&current_user.0, bar_id).await?;
    Ok(Json(report))
}
