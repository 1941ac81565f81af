//! Movement operators.
//!
//! Each operator runs inside a caller-supplied unit of work: it validates the
//! command, checks master data, locks the affected projection rows, appends
//! ledger entries and applies the deltas. Nothing is committed here; the
//! caller commits or drops the unit of work as a whole.

pub mod adjustment;
pub mod receiving;
pub mod sale;
pub mod transfer;

pub use adjustment::adjust;
pub use receiving::{batch_stock_in, stock_in};
pub use sale::deduct_for_sale;
pub use transfer::{TransferReceipt, transfer};
