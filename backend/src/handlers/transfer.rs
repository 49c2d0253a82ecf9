//! HTTP handlers for transfers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::models::{HistoryLimit, Transfer};
use crate::services::transfer::{TransferInput, TransferOutcome};
use crate::services::TransferService;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

/// Move units from a reserve entry to a stock entry
pub async fn create_transfer(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<TransferInput>,
) -> AppResult<(StatusCode, Json<TransferOutcome>)> {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    let service = TransferService::new(state.db, state.bus, lock_timeout_ms);
    let outcome = service.transfer(&current_user.0, input).await?;

    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

/// Recent transfers into a bar
pub async fn list_bar_transfers(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(bar_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<Transfer>>> {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    let service = TransferService::new(state.db, state.bus, lock_timeout_ms);
    let transfers = service
        .list_for_bar(&current_user.0, bar_id, HistoryLimit::new(query.limit))
        .await?;
    Ok(Json(transfers))
}
