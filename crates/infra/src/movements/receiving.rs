use tracing::{info, warn};

use stockpro_core::InventoryResult;
use stockpro_inventory::{
    BalancePolicy, BatchStockIn, InventoryTransaction, MasterData, NewTransaction, StockIn,
    StockKey, TransactionKind, resolve_expiry,
};

use crate::projection::record_movement;
use crate::store::UnitOfWork;

/// Receive one lot: a STOCK_IN entry plus `+quantity` on the projection.
pub fn stock_in(
    uow: &mut dyn UnitOfWork,
    master: &dyn MasterData,
    cmd: &StockIn,
) -> InventoryResult<InventoryTransaction> {
    cmd.validate()?;
    let product = master.require_product(cmd.product_id)?;
    master.require_location(cmd.location_id)?;

    let expiry = resolve_expiry(&product, cmd.production_date, cmd.expiry_date)?;
    if let Some((supplied, calculated)) = expiry.disagreement() {
        warn!(
            product_id = %product.id,
            sku = %product.sku,
            %supplied,
            %calculated,
            "supplied expiry date differs from production date + shelf life; keeping supplied date"
        );
    }

    let draft = NewTransaction::new(TransactionKind::StockIn, cmd.key(), cmd.quantity)
        .with_cost(cmd.cost_per_unit)
        .with_dates(cmd.production_date, expiry.expiry_date)
        .with_notes(cmd.notes.clone());
    let (entry, row) = record_movement(uow, draft, BalancePolicy::Strict)?;

    info!(
        transaction_id = %entry.id,
        product_id = %entry.product_id,
        location_id = %entry.location_id,
        quantity = cmd.quantity,
        expiry_date = ?entry.expiry_date,
        balance = row.quantity,
        "stock received"
    );
    Ok(entry)
}

/// Receive several lots as one event. The first failing line aborts the
/// batch; since nothing is committed here, the caller's rollback discards
/// every line written before it.
pub fn batch_stock_in(
    uow: &mut dyn UnitOfWork,
    master: &dyn MasterData,
    cmd: &BatchStockIn,
) -> InventoryResult<Vec<InventoryTransaction>> {
    cmd.validate()?;
    master.require_location(cmd.location_id)?;

    let lines = cmd.to_stock_ins();
    let keys: Vec<StockKey> = lines.iter().map(StockIn::key).collect();
    uow.lock_stock(&keys)?;

    let mut entries = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        let entry = stock_in(uow, master, line).inspect_err(|err| {
            warn!(line = index, product_id = %line.product_id, error = %err, "batch stock-in aborted");
        })?;
        entries.push(entry);
    }

    info!(
        location_id = %cmd.location_id,
        lines = entries.len(),
        "stock batch received"
    );
    Ok(entries)
}
