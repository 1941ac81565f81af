//! Infrastructure layer: stores, movement operators, stock counts, config.
//!
//! Everything that touches persistence lives here. The pure rules (balances,
//! expiry, the count state machine) come from `stockpro-inventory`; this crate
//! wires them to a `UnitOfWork` so each operation commits or rolls back as a
//! whole.

pub mod config;
pub mod movements;
pub mod projection;
pub mod reports;
pub mod service;
pub mod stock_count;
pub mod store;

pub use config::{ConfigLoadError, StockProConfig};
pub use reports::InventoryReports;
pub use service::InventoryService;
pub use stock_count::{CloseOutcome, StockCountService};

#[cfg(test)]
mod integration_tests;
