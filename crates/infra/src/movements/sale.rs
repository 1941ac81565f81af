use tracing::{info, warn};

use stockpro_core::InventoryResult;
use stockpro_inventory::{
    InventoryTransaction, MasterData, NewTransaction, SaleDeduction, TransactionKind, on_hand,
};

use crate::projection::record_movement;
use crate::store::UnitOfWork;

/// Deduct sold units (kind SALE, linked to the sale id).
///
/// Runs inside the caller's unit of work so the sales component can commit
/// the deduction together with its own records. With the POS override
/// (`AllowNegative`) the balance may go, or start, below zero.
pub fn deduct_for_sale(
    uow: &mut dyn UnitOfWork,
    master: &dyn MasterData,
    cmd: &SaleDeduction,
) -> InventoryResult<InventoryTransaction> {
    cmd.validate()?;
    master.require_product(cmd.product_id)?;
    let location = master.require_location(cmd.location_id)?;

    let key = cmd.key();
    let available = on_hand(uow.stock_for_update(key)?.as_ref());
    cmd.policy
        .check_withdrawal(available, cmd.quantity, &location, cmd.product_id)?;

    let draft = NewTransaction::new(TransactionKind::Sale, key, -cmd.quantity)
        .with_cost(cmd.cost_per_unit)
        .related_to(cmd.sale_id)
        .with_notes(cmd.notes.clone());
    let (entry, row) = record_movement(uow, draft, cmd.policy)?;

    if row.quantity < 0 {
        warn!(
            product_id = %entry.product_id,
            location_id = %entry.location_id,
            sale_id = %cmd.sale_id,
            balance = row.quantity,
            "sale drove stock below zero"
        );
    }
    info!(
        transaction_id = %entry.id,
        product_id = %entry.product_id,
        location_id = %entry.location_id,
        sale_id = %cmd.sale_id,
        quantity = cmd.quantity,
        balance = row.quantity,
        "stock deducted for sale"
    );
    Ok(entry)
}
