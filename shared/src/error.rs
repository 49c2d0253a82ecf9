//! Ledger invariant violations

use thiserror::Error;
use uuid::Uuid;

use crate::types::EntityKind;

/// A ledger rule was violated. Every variant names the entity and the
/// invariant so callers can report exactly what went wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(i32),

    #[error("Reserve entry {reserve_entry_id} has {available} units, {requested} requested")]
    InsufficientReserve {
        reserve_entry_id: Uuid,
        available: i32,
        requested: i32,
    },

    #[error("{entity} {id} has {available} units, cannot remove {requested}")]
    InsufficientQuantity {
        entity: EntityKind,
        id: Uuid,
        available: i32,
        requested: i32,
    },

    #[error("Reserve format {reserve_format_id} does not match stock format {stock_format_id}")]
    FormatMismatch {
        reserve_format_id: Uuid,
        stock_format_id: Uuid,
    },

    #[error("Invalid thresholds: min {min} must be >= 0 and <= max {max}")]
    InvalidThresholds { min: i32, max: i32 },

    #[error("Shift cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Shift {shift_id} has {} uncounted entries", .missing.len())]
    IncompleteCounts { shift_id: i64, missing: Vec<i64> },

    #[error("Final count must be a non-negative integer, got {0}")]
    NegativeCount(i32),

    #[error("Quantity overflow on {entity} {id}")]
    Overflow { entity: EntityKind, id: Uuid },

    #[error("{entity} {id} changed under lock: expected {expected}, found {found}")]
    SnapshotMismatch {
        entity: EntityKind,
        id: Uuid,
        expected: i32,
        found: i32,
    },
}

/// Result alias for pure ledger computations
pub type LedgerResult<T> = Result<T, LedgerError>;
