//! Input validation for ledger operations

use crate::error::{LedgerError, LedgerResult};
use crate::models::Thresholds;

/// Longest accepted idempotency key
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Validate a requested transfer quantity
pub fn validate_transfer_quantity(quantity: i32) -> LedgerResult<()> {
    if quantity <= 0 {
        return Err(LedgerError::InvalidQuantity(quantity));
    }
    Ok(())
}

/// Validate an operator-entered final count
pub fn validate_final_count(final_count: i32) -> LedgerResult<()> {
    if final_count < 0 {
        return Err(LedgerError::NegativeCount(final_count));
    }
    Ok(())
}

/// Validate min/max thresholds of a ledger row
pub fn validate_thresholds(min: i32, max: i32) -> LedgerResult<Thresholds> {
    Thresholds::new(min, max)
}

/// Validate an initial quantity supplied when a row is first stocked
pub fn validate_initial_quantity(quantity: i32) -> Result<(), &'static str> {
    if quantity < 0 {
        return Err("Initial quantity cannot be negative");
    }
    Ok(())
}

/// Validate a client-supplied idempotency key (1-128 visible ASCII characters)
pub fn validate_idempotency_key(key: &str) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("Idempotency key cannot be empty");
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err("Idempotency key must be at most 128 characters");
    }
    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err("Idempotency key must be visible ASCII characters");
    }
    Ok(())
}
