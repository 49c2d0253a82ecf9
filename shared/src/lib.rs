//! Shared types and ledger rules for the Barstock inventory platform
//!
//! This crate contains the pure, I/O-free half of the system: ledger row
//! types, transfer planning, the shift state machine, the restock advisory
//! and validation. It is shared between the backend and the browser (via WASM).

pub mod error;
pub mod models;
pub mod restock;
pub mod types;
pub mod validation;

pub use error::*;
pub use models::*;
pub use restock::*;
pub use types::*;
pub use validation::*;
