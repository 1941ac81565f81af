//! Ledger append and current-stock projection primitives.
//!
//! Every movement goes through `record_movement`: one ledger entry appended
//! and the matching delta applied to the projection row, inside the caller's
//! unit of work. The projection is a cache; `replay` rebuilds it from the
//! ledger when the two disagree.

pub mod replay;

use chrono::Utc;
use tracing::{debug, warn};

use stockpro_core::{InventoryResult, TransactionId};
use stockpro_inventory::{
    BalancePolicy, CurrentStock, InventoryTransaction, NewTransaction, StockKey, next_balance,
};

use crate::store::UnitOfWork;

pub use replay::{Drift, ProjectionRepair, RebuildReport};

/// Read a projection row with an exclusive lock; `None` if it does not exist yet.
pub fn get_for_update(
    uow: &mut dyn UnitOfWork,
    key: StockKey,
) -> InventoryResult<Option<CurrentStock>> {
    Ok(uow.stock_for_update(key)?)
}

/// Add `delta` to the balance for `key` and persist the row.
///
/// Creates the row when absent, unless `delta` is negative and `policy` does
/// not allow negative balances (`InvalidState`).
pub fn apply_delta(
    uow: &mut dyn UnitOfWork,
    key: StockKey,
    delta: i64,
    policy: BalancePolicy,
) -> InventoryResult<CurrentStock> {
    let existing = uow.stock_for_update(key)?;
    let created = existing.is_none();
    let row = next_balance(existing.as_ref(), key, delta, policy, Utc::now())?;
    uow.put_stock(&row)?;

    if created && row.quantity < 0 {
        warn!(
            product_id = %key.product_id,
            location_id = %key.location_id,
            quantity = row.quantity,
            "stock record created with a negative balance"
        );
    }
    debug!(%key, delta, quantity = row.quantity, "projection updated");
    Ok(row)
}

/// Append a ledger entry, stamping its id and transaction date.
pub fn append(
    uow: &mut dyn UnitOfWork,
    draft: NewTransaction,
) -> InventoryResult<InventoryTransaction> {
    let entry = draft.into_entry(TransactionId::new(), Utc::now())?;
    uow.insert_transaction(&entry)?;
    Ok(entry)
}

/// Append `draft` and apply its quantity change to the projection.
pub fn record_movement(
    uow: &mut dyn UnitOfWork,
    draft: NewTransaction,
    policy: BalancePolicy,
) -> InventoryResult<(InventoryTransaction, CurrentStock)> {
    let key = draft.key();
    let delta = draft.quantity_change;
    draft.validate()?;
    let row = apply_delta(uow, key, delta, policy)?;
    let entry = append(uow, draft)?;
    Ok((entry, row))
}
