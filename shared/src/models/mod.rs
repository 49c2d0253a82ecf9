//! Domain models for the Barstock inventory platform

mod catalog;
mod event;
mod ledger;
mod shift;
mod transfer;

pub use catalog::*;
pub use event::*;
pub use ledger::*;
pub use shift::*;
pub use transfer::*;
