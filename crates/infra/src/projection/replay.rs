//! Projection repair: recompute balances from the ledger.
//!
//! The ledger is the source of truth; a `current_stock` row is only a cache
//! of `SUM(quantity_change)` for its key. This module detects and repairs
//! drift between the two, away from the hot path:
//!
//! - `verify_key` / `verify_all`: read-only comparison
//! - `rebuild_key`: lock the row and rewrite it to the ledger sum
//! - `rebuild_all`: repair every drifted key, optionally as a dry run

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use stockpro_core::InventoryResult;
use stockpro_inventory::{CurrentStock, StockKey};

use crate::store::{InventoryStore, in_unit_of_work};

/// Disagreement between a projection row and its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drift {
    pub key: StockKey,
    /// Cached balance; `None` when the row is missing.
    pub projected: Option<i64>,
    /// Sum of the ledger entries for the key.
    pub ledger: i64,
}

impl Drift {
    fn detect(key: StockKey, projected: Option<i64>, ledger: i64) -> Option<Self> {
        let consistent = match projected {
            Some(quantity) => quantity == ledger,
            // No row and no net movement is consistent.
            None => ledger == 0,
        };
        (!consistent).then_some(Drift {
            key,
            projected,
            ledger,
        })
    }
}

/// Outcome of `rebuild_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub keys_examined: usize,
    /// Keys found out of step (repaired unless `dry_run`).
    pub drifted: Vec<Drift>,
    pub dry_run: bool,
}

impl RebuildReport {
    pub fn keys_repaired(&self) -> usize {
        if self.dry_run { 0 } else { self.drifted.len() }
    }
}

/// Verify and rebuild projection rows from the ledger.
#[derive(Debug, Clone)]
pub struct ProjectionRepair<S> {
    store: S,
}

impl<S> ProjectionRepair<S>
where
    S: InventoryStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Compare one key against its ledger without locking.
    pub fn verify_key(&self, key: StockKey) -> InventoryResult<Option<Drift>> {
        let projected = self.store.stock(key)?.map(|row| row.quantity);
        let ledger: i64 = self
            .store
            .ledger_for_key(key)?
            .iter()
            .map(|tx| tx.quantity_change)
            .sum();
        Ok(Drift::detect(key, projected, ledger))
    }

    pub fn verify_all(&self) -> InventoryResult<Vec<Drift>> {
        let mut drifted = Vec::new();
        for key in self.store.stock_keys()? {
            if let Some(drift) = self.verify_key(key)? {
                drifted.push(drift);
            }
        }
        Ok(drifted)
    }

    /// Rewrite one projection row to its ledger sum, under lock.
    ///
    /// Returns the drift that was repaired, if any. Rows are never deleted;
    /// a row whose ledger nets to zero is set to zero.
    #[instrument(skip(self), fields(key = %key), err)]
    pub fn rebuild_key(&self, key: StockKey) -> InventoryResult<Option<Drift>> {
        in_unit_of_work(&self.store, |uow| {
            let row = uow.stock_for_update(key)?;
            let ledger = uow.ledger_sum(key)?;
            let Some(drift) = Drift::detect(key, row.as_ref().map(|r| r.quantity), ledger) else {
                return Ok(None);
            };

            uow.put_stock(&CurrentStock {
                product_id: key.product_id,
                location_id: key.location_id,
                quantity: ledger,
                last_updated: Utc::now(),
            })?;
            warn!(
                product_id = %key.product_id,
                location_id = %key.location_id,
                projected = ?drift.projected,
                ledger,
                "projection drift repaired"
            );
            Ok(Some(drift))
        })
    }

    /// Check every key and repair the ones out of step.
    ///
    /// With `dry_run` nothing is written; the report lists what would change.
    /// Each key is repaired in its own unit of work.
    #[instrument(skip(self), err)]
    pub fn rebuild_all(&self, dry_run: bool) -> InventoryResult<RebuildReport> {
        let keys = self.store.stock_keys()?;
        let mut report = RebuildReport {
            keys_examined: keys.len(),
            drifted: Vec::new(),
            dry_run,
        };

        for key in keys {
            let drift = if dry_run {
                self.verify_key(key)?
            } else {
                self.rebuild_key(key)?
            };
            report.drifted.extend(drift);
        }

        info!(
            keys_examined = report.keys_examined,
            drifted = report.drifted.len(),
            dry_run,
            "projection rebuild finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stockpro_core::{LocationId, ProductId};
    use stockpro_inventory::{BalancePolicy, NewTransaction, TransactionKind};

    use crate::projection::record_movement;
    use crate::store::InMemoryInventoryStore;

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), LocationId::new())
    }

    fn seed(store: &InMemoryInventoryStore, key: StockKey, quantity: i64) {
        let mut uow = store.begin().unwrap();
        record_movement(
            &mut *uow,
            NewTransaction::new(TransactionKind::StockIn, key, quantity),
            BalancePolicy::Strict,
        )
        .unwrap();
        uow.commit().unwrap();
    }

    fn corrupt(store: &InMemoryInventoryStore, key: StockKey, quantity: i64) {
        let mut uow = store.begin().unwrap();
        uow.stock_for_update(key).unwrap();
        uow.put_stock(&CurrentStock {
            product_id: key.product_id,
            location_id: key.location_id,
            quantity,
            last_updated: Utc::now(),
        })
        .unwrap();
        uow.commit().unwrap();
    }

    #[test]
    fn consistent_store_reports_no_drift() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let k = key();
        seed(&store, k, 8);
        let repair = ProjectionRepair::new(store);
        assert_eq!(repair.verify_key(k).unwrap(), None);
        assert!(repair.verify_all().unwrap().is_empty());
    }

    #[test]
    fn rebuild_key_restores_ledger_sum() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let k = key();
        seed(&store, k, 8);
        corrupt(&store, k, 3);

        let repair = ProjectionRepair::new(store.clone());
        let drift = repair.rebuild_key(k).unwrap().unwrap();
        assert_eq!(drift.projected, Some(3));
        assert_eq!(drift.ledger, 8);
        assert_eq!(store.stock(k).unwrap().unwrap().quantity, 8);
        assert_eq!(repair.rebuild_key(k).unwrap(), None);
    }

    #[test]
    fn dry_run_reports_without_writing() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let good = key();
        let bad = key();
        seed(&store, good, 2);
        seed(&store, bad, 5);
        corrupt(&store, bad, 50);

        let repair = ProjectionRepair::new(store.clone());
        let report = repair.rebuild_all(true).unwrap();
        assert_eq!(report.keys_examined, 2);
        assert_eq!(report.drifted.len(), 1);
        assert_eq!(report.keys_repaired(), 0);
        assert_eq!(store.stock(bad).unwrap().unwrap().quantity, 50);

        let report = repair.rebuild_all(false).unwrap();
        assert_eq!(report.keys_repaired(), 1);
        assert_eq!(store.stock(bad).unwrap().unwrap().quantity, 5);
    }

    #[test]
    fn missing_row_with_ledger_entries_is_drift() {
        assert_eq!(
            Drift::detect(key(), None, 0),
            None,
            "no row and nothing moved is fine"
        );
        assert!(Drift::detect(key(), None, 4).is_some());
    }
}
