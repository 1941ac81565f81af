//! `stockpro-core`: shared building blocks for the inventory engine.
//!
//! This crate holds the strongly-typed identifiers and the error taxonomy that
//! every other layer reports through. It has no IO and no storage concerns.

pub mod error;
pub mod id;

pub use error::{Entity, InventoryError, InventoryResult};
pub use id::{CountItemId, LocationId, ProductId, SaleId, SessionId, TransactionId};
