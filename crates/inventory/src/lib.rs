//! Inventory ledger domain.
//!
//! Ledger entries, the current-stock projection row, expiry rules, the
//! negative-balance policy, movement commands and the stock count state
//! machine. Pure, deterministic logic: no IO and no storage. The store and
//! the operators that tie these together live in `stockpro-infra`.

pub mod count;
pub mod expiry;
pub mod master;
pub mod movement;
pub mod policy;
pub mod stock;
pub mod transaction;

pub use count::{
    BulkAddFailure, BulkAddReport, CountStatus, CountVariance, StockCountItem, StockCountSession,
};
pub use expiry::{ResolvedExpiry, calculate_expiry, resolve_expiry};
pub use master::{Location, MasterData, Product};
pub use movement::{Adjustment, BatchLine, BatchStockIn, SaleDeduction, StockIn, Transfer};
pub use policy::BalancePolicy;
pub use stock::{CurrentStock, StockKey, next_balance, on_hand};
pub use transaction::{InventoryTransaction, NewTransaction, TransactionKind, join_notes};
