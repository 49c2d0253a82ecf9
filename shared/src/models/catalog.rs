//! Catalog reference data (read-only for the ledger)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A packaged variant of a product (e.g. 70cl bottle, 30L keg)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Format {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    /// Human label such as "70cl" or "6x33cl"
    pub size: String,
    pub volume: Decimal,
    pub unit: String,
    pub packaging: String,
}

impl Format {
    /// Display label used in advisory listings, e.g. "Gin Tonic Premium 70cl (bottle)"
    pub fn label(&self) -> String {
        format!("{} {} ({})", self.product_name, self.size, self.packaging)
    }
}
