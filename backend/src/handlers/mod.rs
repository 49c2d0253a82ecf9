//! HTTP handlers for the Barstock API

pub mod catalog;
pub mod health;
pub mod ledger;
pub mod restock;
pub mod shift;
pub mod stream;
pub mod transfer;

pub use catalog::*;
pub use health::*;
pub use ledger::*;
pub use restock::*;
pub use shift::*;
pub use stream::*;
pub use transfer::*;
