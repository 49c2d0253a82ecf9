//! Reserve → bar transfers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::ledger::{checked_adjust, ReserveEntry, StockEntry};
use crate::types::EntityKind;

/// Immutable record of one completed transfer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transfer {
    pub id: i64,
    pub idempotency_key: Option<String>,
    pub reserve_entry_id: Uuid,
    pub reserve_id: Uuid,
    pub stock_id: Uuid,
    pub bar_id: Uuid,
    pub format_id: Uuid,
    pub quantity: i32,
    pub reserve_quantity_before: i32,
    pub reserve_quantity_after: i32,
    pub stock_quantity_before: i32,
    pub stock_quantity_after: i32,
    pub transferred_by: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    /// Whether a request replaying this transfer's idempotency key asks for
    /// the same movement
    pub fn matches_request(&self, reserve_entry_id: Uuid, stock_id: Uuid, quantity: i32) -> bool {
        self.reserve_entry_id == reserve_entry_id
            && self.stock_id == stock_id
            && self.quantity == quantity
    }
}

/// Before/after quantities computed from the locked rows, prior to any write
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct TransferPlan {
    pub reserve_entry_id: Uuid,
    pub stock_id: Uuid,
    pub format_id: Uuid,
    pub quantity: i32,
    pub reserve_quantity_before: i32,
    pub reserve_quantity_after: i32,
    pub stock_quantity_before: i32,
    pub stock_quantity_after: i32,
}

impl TransferPlan {
    /// Units are neither created nor destroyed
    pub fn is_conserving(&self) -> bool {
        i64::from(self.reserve_quantity_after) + i64::from(self.stock_quantity_after)
            == i64::from(self.reserve_quantity_before) + i64::from(self.stock_quantity_before)
    }

    /// Compare the rows written by the ledger with the planned values.
    ///
    /// A mismatch means some writer bypassed the row locks.
    pub fn verify(&self, reserve_after: i32, stock_after: i32) -> LedgerResult<()> {
        if reserve_after != self.reserve_quantity_after {
            return Err(LedgerError::SnapshotMismatch {
                entity: EntityKind::Reserve,
                id: self.reserve_entry_id,
                expected: self.reserve_quantity_after,
                found: reserve_after,
            });
        }
        if stock_after != self.stock_quantity_after {
            return Err(LedgerError::SnapshotMismatch {
                entity: EntityKind::Stock,
                id: self.stock_id,
                expected: self.stock_quantity_after,
                found: stock_after,
            });
        }
        Ok(())
    }
}

/// Validate a transfer of `quantity` units and compute its before/after values.
///
/// Checks run in order: positive quantity, sufficient reserve, matching format.
pub fn plan_transfer(
    reserve: &ReserveEntry,
    stock: &StockEntry,
    quantity: i32,
) -> LedgerResult<TransferPlan> {
    if quantity <= 0 {
        return Err(LedgerError::InvalidQuantity(quantity));
    }

    if reserve.quantity < quantity {
        return Err(LedgerError::InsufficientReserve {
            reserve_entry_id: reserve.id,
            available: reserve.quantity,
            requested: quantity,
        });
    }

    if reserve.format_id != stock.format_id {
        return Err(LedgerError::FormatMismatch {
            reserve_format_id: reserve.format_id,
            stock_format_id: stock.format_id,
        });
    }

    let reserve_after = checked_adjust(EntityKind::Reserve, reserve.id, reserve.quantity, -quantity)?;
    let stock_after = checked_adjust(EntityKind::Stock, stock.id, stock.current_quantity, quantity)?;

    Ok(TransferPlan {
        reserve_entry_id: reserve.id,
        stock_id: stock.id,
        format_id: stock.format_id,
        quantity,
        reserve_quantity_before: reserve.quantity,
        reserve_quantity_after: reserve_after,
        stock_quantity_before: stock.current_quantity,
        stock_quantity_after: stock_after,
    })
}
