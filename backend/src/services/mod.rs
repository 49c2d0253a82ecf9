//! Business logic services for the Barstock ledger

pub mod bus;
pub mod catalog;
pub mod ledger;
pub mod restock;
pub mod scope;
pub mod shift;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;

pub use bus::NotificationBus;
pub use catalog::CatalogService;
pub use ledger::LedgerService;
pub use restock::RestockService;
pub use shift::ShiftService;
pub use transfer::TransferService;
