//! Stock and reserve ledger rows

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::event::{ReserveSnapshot, StockSnapshot};
use crate::types::EntityKind;

/// Minimum/maximum quantity bounds of a ledger row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thresholds {
    pub min: i32,
    pub max: i32,
}

impl Thresholds {
    /// Build thresholds, enforcing `0 <= min <= max`
    pub fn new(min: i32, max: i32) -> LedgerResult<Self> {
        if min < 0 || max < min {
            return Err(LedgerError::InvalidThresholds { min, max });
        }
        Ok(Self { min, max })
    }
}

/// Current quantity of one format on the floor of one bar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockEntry {
    pub id: Uuid,
    pub bar_id: Uuid,
    pub format_id: Uuid,
    pub current_quantity: i32,
    pub min_threshold: i32,
    pub max_threshold: i32,
    /// Bumped by every committed write to the row
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockEntry {
    pub fn snapshot(&self) -> StockSnapshot {
        StockSnapshot {
            stock_id: self.id,
            bar_id: self.bar_id,
            format_id: self.format_id,
            current_quantity: self.current_quantity,
            min_threshold: self.min_threshold,
            max_threshold: self.max_threshold,
            version: self.version,
        }
    }
}

/// Backroom or cellar quantity of one format in one reserve
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReserveEntry {
    pub id: Uuid,
    pub reserve_id: Uuid,
    pub format_id: Uuid,
    pub quantity: i32,
    pub min_quantity: i32,
    pub max_quantity: i32,
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl ReserveEntry {
    pub fn snapshot(&self) -> ReserveSnapshot {
        ReserveSnapshot {
            reserve_entry_id: self.id,
            reserve_id: self.reserve_id,
            format_id: self.format_id,
            quantity: self.quantity,
            min_quantity: self.min_quantity,
            max_quantity: self.max_quantity,
            version: self.version,
        }
    }

    /// Whether the lot is past its expiration date on `today`
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration_date.is_some_and(|d| d < today)
    }
}

/// Apply `delta` to `current`, refusing to go below zero.
///
/// This is the only arithmetic path for ledger mutations other than the
/// absolute set performed when a shift closes.
pub fn checked_adjust(entity: EntityKind, id: Uuid, current: i32, delta: i32) -> LedgerResult<i32> {
    let next = current
        .checked_add(delta)
        .ok_or(LedgerError::Overflow { entity, id })?;

    if next < 0 {
        return Err(LedgerError::InsufficientQuantity {
            entity,
            id,
            available: current,
            requested: delta.saturating_neg(),
        });
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_ordering() {
        assert!(Thresholds::new(0, 0).is_ok());
        assert!(Thresholds::new(10, 50).is_ok());
        assert_eq!(
            Thresholds::new(20, 10),
            Err(LedgerError::InvalidThresholds { min: 20, max: 10 })
        );
        assert!(Thresholds::new(-1, 10).is_err());
    }

    #[test]
    fn test_checked_adjust_positive_and_negative() {
        let id = Uuid::new_v4();
        assert_eq!(checked_adjust(EntityKind::Stock, id, 5, 20), Ok(25));
        assert_eq!(checked_adjust(EntityKind::Stock, id, 5, -5), Ok(0));
    }

    #[test]
    fn test_checked_adjust_rejects_negative_result() {
        let id = Uuid::new_v4();
        let err = checked_adjust(EntityKind::Reserve, id, 4, -10).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientQuantity {
                entity: EntityKind::Reserve,
                id,
                available: 4,
                requested: 10,
            }
        );
        assert_eq!(
            err.to_string(),
            format!("Reserve entry {} has 4 units, cannot remove 10", id)
        );
    }

    #[test]
    fn test_checked_adjust_overflow() {
        let id = Uuid::new_v4();
        assert!(matches!(
            checked_adjust(EntityKind::Stock, id, i32::MAX, 1),
            Err(LedgerError::Overflow { .. })
        ));
    }

    #[test]
    fn test_reserve_expiration() {
        let entry = ReserveEntry {
            id: Uuid::new_v4(),
            reserve_id: Uuid::new_v4(),
            format_id: Uuid::new_v4(),
            quantity: 12,
            min_quantity: 0,
            max_quantity: 48,
            lot_number: Some("L-2024-118".to_string()),
            expiration_date: NaiveDate::from_ymd_opt(2024, 6, 30),
            version: 1,
            updated_at: Utc::now(),
        };
        assert!(!entry.is_expired(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()));
        assert!(entry.is_expired(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()));
    }
}
