//! HTTP handlers for the stock and reserve ledgers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::models::{ReserveEntry, StockEntry};
use crate::services::ledger::{AdjustInput, UpsertOutcome, UpsertReserveInput, UpsertStockInput};
use crate::services::LedgerService;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct FormatQuery {
    pub format_id: Option<Uuid>,
}

fn ledger_service(state: AppState) -> LedgerService {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    LedgerService::new(state.db, state.bus, lock_timeout_ms)
}

/// List a bar's stock entries, or fetch one with `?format_id=`
pub async fn list_bar_stocks(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(bar_id): Path<Uuid>,
    Query(query): Query<FormatQuery>,
) -> AppResult<Json<Vec<StockEntry>>> {
    let service = ledger_service(state);
    let entries = match query.format_id {
        Some(format_id) => service
            .get_stock(&current_user.0, bar_id, format_id)
            .await?
            .map(|e| vec![e])
            .ok_or_else(|| AppError::NotFound("Stock entry".to_string()))?,
        None => service.list_bar_stocks(&current_user.0, bar_id).await?,
    };
    Ok(Json(entries))
}

/// Create or update a stock entry
pub async fn upsert_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(bar_id): Path<Uuid>,
    Json(input): Json<UpsertStockInput>,
) -> AppResult<Json<UpsertOutcome<StockEntry>>> {
    let service = ledger_service(state);
    let outcome = service.upsert_stock(&current_user.0, bar_id, input).await?;
    Ok(Json(outcome))
}

/// Apply a manual correction to a stock entry
pub async fn adjust_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(stock_id): Path<Uuid>,
    Json(input): Json<AdjustInput>,
) -> AppResult<Json<StockEntry>> {
    let service = ledger_service(state);
    let entry = service
        .adjust_stock_entry(&current_user.0, stock_id, input)
        .await?;
    Ok(Json(entry))
}

/// List a reserve's entries, or fetch one with `?format_id=`
pub async fn list_reserve_entries(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reserve_id): Path<Uuid>,
    Query(query): Query<FormatQuery>,
) -> AppResult<Json<Vec<ReserveEntry>>> {
    let service = ledger_service(state);
    let entries = match query.format_id {
        Some(format_id) => service
            .get_reserve_entry(&current_user.0, reserve_id, format_id)
            .await?
            .map(|e| vec![e])
            .ok_or_else(|| AppError::NotFound("Reserve entry".to_string()))?,
        None => {
            service
                .list_reserve_entries(&current_user.0, reserve_id)
                .await?
        }
    };
    Ok(Json(entries))
}

/// Create or update a reserve entry
pub async fn upsert_reserve_entry(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reserve_id): Path<Uuid>,
    Json(input): Json<UpsertReserveInput>,
) -> AppResult<Json<UpsertOutcome<ReserveEntry>>> {
    let service = ledger_service(state);
    let outcome = service
        .upsert_reserve_entry(&current_user.0, reserve_id, input)
        .await?;
    Ok(Json(outcome))
}

/// Apply a manual correction (e.g. a delivery) to a reserve entry
pub async fn adjust_reserve_entry(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(reserve_entry_id): Path<Uuid>,
    Json(input): Json<AdjustInput>,
) -> AppResult<Json<ReserveEntry>> {
    let service = ledger_service(state);
    let entry = service
        .adjust_reserve_entry(&current_user.0, reserve_entry_id, input)
        .await?;
    Ok(Json(entry))
}
