//! HTTP handlers for shift reconciliation

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::handlers::transfer::HistoryQuery;
use crate::middleware::CurrentUser;
use crate::models::{HistoryLimit, Shift, ShiftCount};
use crate::services::shift::{CloseOutcome, RecordCountInput, ShiftDetail};
use crate::services::ShiftService;
use crate::AppState;

fn shift_service(state: AppState) -> ShiftService {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    ShiftService::new(state.db, state.bus, lock_timeout_ms)
}

#[derive(Debug, Deserialize)]
pub struct OpenShiftInput {
    pub bar_id: Uuid,
}

/// Open a shift for the bar named in the body
pub async fn open_shift(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<OpenShiftInput>,
) -> AppResult<(StatusCode, Json<Shift>)> {
    let shift = shift_service(state).open(&current_user.0, input.bar_id).await?;
    Ok((StatusCode::CREATED, Json(shift)))
}

/// Snapshot the bar's ledger and start counting
pub async fn begin_counting(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(shift_id): Path<i64>,
) -> AppResult<Json<ShiftDetail>> {
    let detail = shift_service(state)
        .begin_counting(&current_user.0, shift_id)
        .await?;
    Ok(Json(detail))
}

/// Record a final count
pub async fn record_count(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((shift_id, count_id)): Path<(i64, i64)>,
    Json(input): Json<RecordCountInput>,
) -> AppResult<Json<ShiftCount>> {
    let count = shift_service(state)
        .record_count(&current_user.0, shift_id, count_id, input)
        .await?;
    Ok(Json(count))
}

/// Close a shift and reconcile the ledger
pub async fn close_shift(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(shift_id): Path<i64>,
) -> AppResult<Json<CloseOutcome>> {
    let outcome = shift_service(state).close(&current_user.0, shift_id).await?;
    Ok(Json(outcome))
}

/// Get a shift with its counts
pub async fn get_shift(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(shift_id): Path<i64>,
) -> AppResult<Json<ShiftDetail>> {
    let detail = shift_service(state).get(&current_user.0, shift_id).await?;
    Ok(Json(detail))
}

/// Get the bar's shift in progress
pub async fn get_current_shift(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(bar_id): Path<Uuid>,
) -> AppResult<Json<ShiftDetail>> {
    let detail = shift_service(state).current(&current_user.0, bar_id).await?;
    Ok(Json(detail))
}

/// Shift history of a bar
pub async fn list_bar_shifts(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(bar_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<Shift>>> {
    let shifts = shift_service(state)
        .list_for_bar(&current_user.0, bar_id, HistoryLimit::new(query.limit))
        .await?;
    Ok(Json(shifts))
}
