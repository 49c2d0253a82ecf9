//! Ledger models
//!
//! Re-exports the domain types from the shared crate

pub use shared::models::*;
pub use shared::types::*;
