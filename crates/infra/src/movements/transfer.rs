use serde::Serialize;
use tracing::info;

use stockpro_core::InventoryResult;
use stockpro_inventory::{
    BalancePolicy, InventoryTransaction, Location, MasterData, NewTransaction, TransactionKind,
    Transfer, on_hand,
};

use crate::projection::record_movement;
use crate::store::UnitOfWork;

/// The two linked ledger entries of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub outbound: InventoryTransaction,
    /// `related_transaction_id` points at `outbound`.
    pub inbound: InventoryTransaction,
}

fn leg_notes(direction: &str, other: &Location, notes: Option<&str>) -> String {
    let base = format!("{direction}: {} ({})", other.name, other.id);
    match notes.map(str::trim).filter(|n| !n.is_empty()) {
        Some(notes) => format!("{base}; notes: {notes}"),
        None => base,
    }
}

/// Move `quantity` of a product from one location to another.
///
/// The source may never go negative. Both rows are locked up front in
/// `StockKey` order, so opposite-direction transfers of the same product
/// cannot deadlock.
pub fn transfer(
    uow: &mut dyn UnitOfWork,
    master: &dyn MasterData,
    cmd: &Transfer,
) -> InventoryResult<TransferReceipt> {
    cmd.validate()?;
    let product = master.require_product(cmd.product_id)?;
    let from = master.require_location(cmd.from_location_id)?;
    let to = master.require_location(cmd.to_location_id)?;

    let (source, destination) = (cmd.source(), cmd.destination());
    uow.lock_stock(&[source, destination])?;

    let available = on_hand(uow.stock_for_update(source)?.as_ref());
    BalancePolicy::Strict.check_withdrawal(available, cmd.quantity, &from, product.id)?;

    let notes = cmd.notes.as_deref();
    let out_draft = NewTransaction::new(TransactionKind::TransferOut, source, -cmd.quantity)
        .with_cost(product.standard_cost)
        .with_notes(Some(leg_notes("transfer to", &to, notes)));
    let (outbound, source_row) = record_movement(uow, out_draft, BalancePolicy::Strict)?;

    let in_draft = NewTransaction::new(TransactionKind::TransferIn, destination, cmd.quantity)
        .with_cost(product.standard_cost)
        .related_to(outbound.id)
        .with_notes(Some(leg_notes("transfer from", &from, notes)));
    let (inbound, destination_row) = record_movement(uow, in_draft, BalancePolicy::Strict)?;

    let value = product
        .standard_cost
        .and_then(|cost| u64::try_from(cmd.quantity).ok()?.checked_mul(cost));
    info!(
        outbound_id = %outbound.id,
        inbound_id = %inbound.id,
        product_id = %product.id,
        from_location = %from.id,
        to_location = %to.id,
        quantity = cmd.quantity,
        value = ?value,
        source_balance = source_row.quantity,
        destination_balance = destination_row.quantity,
        "stock transferred"
    );
    Ok(TransferReceipt { outbound, inbound })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpro_core::LocationId;

    #[test]
    fn leg_notes_name_the_other_location() {
        let loc = Location {
            id: LocationId::new(),
            name: "Back room".to_string(),
        };
        let plain = leg_notes("transfer to", &loc, None);
        assert_eq!(plain, format!("transfer to: Back room ({})", loc.id));
        let with_notes = leg_notes("transfer from", &loc, Some("restock"));
        assert!(with_notes.ends_with("; notes: restock"));
    }
}
