//! WebAssembly module for the Barstock inventory platform
//!
//! Provides client-side computation for:
//! - Restock advisory previews
//! - Stock level classification
//! - Shift count derivations on the counting screen

use serde::Serialize;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::restock::*;
pub use shared::validation::*;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {}

#[derive(Serialize)]
struct RestockPreview {
    summary: RestockSummary,
    lines: Vec<RestockLine>,
}

/// Rank a bar's stock entries (JSON array as served by the API)
#[wasm_bindgen]
pub fn advise_restock(entries_json: &str) -> Result<String, JsValue> {
    let entries: Vec<StockEntry> = serde_json::from_str(entries_json)
        .map_err(|e| JsValue::from_str(&format!("Invalid stock entries JSON: {}", e)))?;

    let lines = advise(&entries);
    let preview = RestockPreview {
        summary: summarize(&lines),
        lines,
    };
    serde_json::to_string(&preview).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Severity of a stock level: "danger", "warning" or "ok"
#[wasm_bindgen]
pub fn classify_stock_level(current_quantity: i32, min_threshold: i32, max_threshold: i32) -> String {
    classify(current_quantity, min_threshold, max_threshold).to_string()
}

/// Units to order to bring an entry up to its maximum
#[wasm_bindgen]
pub fn restock_quantity(current_quantity: i32, max_threshold: i32) -> i32 {
    quantity_to_order(current_quantity, max_threshold)
}

/// Preview `consumed` and `to_restock` for a count before it is recorded
#[wasm_bindgen]
pub fn derive_shift_count(initial_count: i32, final_count: i32, max_threshold: i32) -> Result<String, JsValue> {
    let derived = derive_count(initial_count, final_count, max_threshold)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    serde_json::to_string(&derived).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Whether an operator-entered count would be accepted
#[wasm_bindgen]
pub fn is_valid_final_count(final_count: i32) -> bool {
    validate_final_count(final_count).is_ok()
}
