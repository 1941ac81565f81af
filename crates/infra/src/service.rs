//! Self-committing entry points for the movement operators.
//!
//! `InventoryService` wraps each operator in its own unit of work:
//!
//! ```text
//! begin ─► operator (validate, lock, append, apply) ─► commit
//!              │
//!              └─ error ─► unit of work dropped ─► rollback
//! ```
//!
//! Failures surface as typed `InventoryError`s; nothing is retried here.
//! `Busy` is the only kind a caller may safely retry.

use tracing::instrument;

use stockpro_core::InventoryResult;
use stockpro_inventory::{
    Adjustment, BalancePolicy, BatchStockIn, InventoryTransaction, MasterData, SaleDeduction,
    StockIn, Transfer,
};

use crate::movements::{self, TransferReceipt};
use crate::store::{InventoryStore, UnitOfWork, in_unit_of_work};

/// Movement operators bound to a store and the master data they validate against.
#[derive(Debug, Clone)]
pub struct InventoryService<S, M> {
    store: S,
    master: M,
}

impl<S, M> InventoryService<S, M>
where
    S: InventoryStore,
    M: MasterData,
{
    pub fn new(store: S, master: M) -> Self {
        Self { store, master }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[instrument(skip(self, cmd), fields(product_id = %cmd.product_id, location_id = %cmd.location_id), err)]
    pub fn stock_in(&self, cmd: &StockIn) -> InventoryResult<InventoryTransaction> {
        in_unit_of_work(&self.store, |uow| movements::stock_in(uow, &self.master, cmd))
    }

    /// All lines or none.
    #[instrument(skip(self, cmd), fields(location_id = %cmd.location_id, lines = cmd.lines.len()), err)]
    pub fn batch_stock_in(&self, cmd: &BatchStockIn) -> InventoryResult<Vec<InventoryTransaction>> {
        in_unit_of_work(&self.store, |uow| {
            movements::batch_stock_in(uow, &self.master, cmd)
        })
    }

    /// User-initiated adjustment; never allowed to overdraw.
    #[instrument(skip(self, cmd), fields(product_id = %cmd.product_id, location_id = %cmd.location_id), err)]
    pub fn adjust(&self, cmd: &Adjustment) -> InventoryResult<InventoryTransaction> {
        in_unit_of_work(&self.store, |uow| {
            movements::adjust(uow, &self.master, cmd, BalancePolicy::Strict)
        })
    }

    #[instrument(skip(self, cmd), fields(product_id = %cmd.product_id), err)]
    pub fn transfer(&self, cmd: &Transfer) -> InventoryResult<TransferReceipt> {
        in_unit_of_work(&self.store, |uow| movements::transfer(uow, &self.master, cmd))
    }

    /// Sale deduction in its own unit of work.
    #[instrument(skip(self, cmd), fields(sale_id = %cmd.sale_id), err)]
    pub fn deduct_for_sale(&self, cmd: &SaleDeduction) -> InventoryResult<InventoryTransaction> {
        in_unit_of_work(&self.store, |uow| {
            movements::deduct_for_sale(uow, &self.master, cmd)
        })
    }

    /// Sale deduction inside the sales component's own unit of work; the
    /// caller commits.
    pub fn deduct_for_sale_in(
        &self,
        uow: &mut dyn UnitOfWork,
        cmd: &SaleDeduction,
    ) -> InventoryResult<InventoryTransaction> {
        movements::deduct_for_sale(uow, &self.master, cmd)
    }
}
