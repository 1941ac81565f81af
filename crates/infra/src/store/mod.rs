//! Ledger, projection and stock-count persistence boundary.
//!
//! `InventoryStore` hands out `UnitOfWork`s (one database transaction each)
//! and answers read-only queries over committed state. Two backends:
//! `InMemoryInventoryStore` for tests/dev and `PostgresInventoryStore`.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::{InMemoryInventoryStore, InMemoryMasterData};
pub use postgres::PostgresInventoryStore;
pub use query::{
    Page, Pagination, SessionPage, StockFilter, StockPage, TransactionFilter, TransactionPage,
};
pub use r#trait::{InventoryStore, StoreError, UnitOfWork, in_unit_of_work};
