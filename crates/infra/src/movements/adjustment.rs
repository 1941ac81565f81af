use tracing::info;

use stockpro_core::{InventoryError, InventoryResult};
use stockpro_inventory::{
    Adjustment, BalancePolicy, InventoryTransaction, MasterData, NewTransaction, TransactionKind,
    on_hand,
};

use crate::projection::record_movement;
use crate::store::UnitOfWork;

/// Correct a balance by `quantity_change` (ADJUSTMENT_ADD / ADJUSTMENT_SUB).
///
/// Under `Strict` a reduction may not exceed the current balance. Stock count
/// closure passes `AllowNegative`, which also lets it create a row that starts
/// below zero.
pub fn adjust(
    uow: &mut dyn UnitOfWork,
    master: &dyn MasterData,
    cmd: &Adjustment,
    policy: BalancePolicy,
) -> InventoryResult<InventoryTransaction> {
    cmd.validate()?;
    master.require_product(cmd.product_id)?;
    let location = master.require_location(cmd.location_id)?;

    let key = cmd.key();
    let current = uow.stock_for_update(key)?;
    if cmd.quantity_change < 0 {
        let requested = cmd
            .quantity_change
            .checked_neg()
            .ok_or_else(|| InventoryError::invalid_quantity("quantity change out of range"))?;
        policy.check_withdrawal(on_hand(current.as_ref()), requested, &location, cmd.product_id)?;
    }

    let kind = TransactionKind::adjustment_for(cmd.quantity_change);
    let draft = NewTransaction::new(kind, key, cmd.quantity_change)
        .with_notes(Some(cmd.ledger_notes()));
    let (entry, row) = record_movement(uow, draft, policy)?;

    info!(
        transaction_id = %entry.id,
        product_id = %entry.product_id,
        location_id = %entry.location_id,
        kind = %entry.kind,
        quantity_change = entry.quantity_change,
        balance = row.quantity,
        ?policy,
        "stock adjusted"
    );
    Ok(entry)
}
