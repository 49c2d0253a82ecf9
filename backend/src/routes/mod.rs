//! Route definitions for the Barstock API

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes; everything here requires an actor token
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/formats/:format_id", get(handlers::get_format))
        .nest("/bars", bar_routes())
        .route("/stocks/:stock_id/adjust", post(handlers::adjust_stock))
        .nest("/reserves", reserve_routes())
        .route(
            "/reserve-entries/:reserve_entry_id/adjust",
            post(handlers::adjust_reserve_entry),
        )
        .route("/transfers", post(handlers::create_transfer))
        .nest("/shifts", shift_routes())
        .route("/restock/:bar_id", get(handlers::get_restock_advice))
        .nest("/stream", stream_routes())
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Per-bar ledger, history and shift routes
fn bar_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/:bar_id/stocks",
            get(handlers::list_bar_stocks).put(handlers::upsert_stock),
        )
        .route("/:bar_id/transfers", get(handlers::list_bar_transfers))
        .route("/:bar_id/shifts", get(handlers::list_bar_shifts))
        .route("/:bar_id/shifts/current", get(handlers::get_current_shift))
}

/// Reserve ledger routes
fn reserve_routes() -> Router<AppState> {
    Router::new().route(
        "/:reserve_id/entries",
        get(handlers::list_reserve_entries).put(handlers::upsert_reserve_entry),
    )
}

/// Shift reconciliation routes
fn shift_routes() -> Router<AppState> {
    Router::new()
        .route("/open", post(handlers::open_shift))
        .route("/:shift_id", get(handlers::get_shift))
        .route("/:shift_id/counts/init", post(handlers::begin_counting))
        .route("/:shift_id/counts/:count_id", put(handlers::record_count))
        .route("/:shift_id/close", post(handlers::close_shift))
}

/// Server-Sent Events routes
fn stream_routes() -> Router<AppState> {
    Router::new()
        .route("/bars/:bar_id", get(handlers::stream_bar))
        .route("/reserves/:reserve_id", get(handlers::stream_reserve))
}
