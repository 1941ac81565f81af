//! Read helpers over committed state. Informational only; nothing here locks.

use chrono::{Days, NaiveDate};
use tracing::instrument;

use stockpro_core::{InventoryError, InventoryResult, LocationId};
use stockpro_inventory::{CurrentStock, InventoryTransaction, StockKey, on_hand};

use crate::store::{
    InventoryStore, Pagination, StockFilter, StockPage, TransactionFilter, TransactionPage,
};

#[derive(Debug, Clone)]
pub struct InventoryReports<S> {
    store: S,
}

impl<S: InventoryStore> InventoryReports<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Received lots expiring within `days` of `today` (both ends inclusive)
    /// whose product still has a positive balance at that location.
    #[instrument(skip(self), err)]
    pub fn near_expiry(
        &self,
        today: NaiveDate,
        days: u32,
    ) -> InventoryResult<Vec<InventoryTransaction>> {
        let until = today
            .checked_add_days(Days::new(u64::from(days)))
            .ok_or_else(|| InventoryError::invalid_state("near-expiry window out of range"))?;
        Ok(self.store.near_expiry(today, until)?)
    }

    /// Projection rows below zero, ordered by (location, product).
    pub fn negative_stock(&self) -> InventoryResult<Vec<CurrentStock>> {
        Ok(self.store.list_stock(&StockFilter::negative())?)
    }

    pub fn transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> InventoryResult<TransactionPage> {
        if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
            if start > end {
                return Err(InventoryError::invalid_state(format!(
                    "start date {start} is after end date {end}"
                )));
            }
        }
        Ok(self.store.query_transactions(filter, pagination)?)
    }

    /// Projection rows, optionally limited to one location.
    pub fn stock_summary(
        &self,
        location_id: Option<LocationId>,
        pagination: Pagination,
    ) -> InventoryResult<StockPage> {
        let filter = StockFilter {
            location_id,
            ..StockFilter::default()
        };
        let rows = self.store.list_stock(&filter)?;
        Ok(pagination.apply(rows))
    }

    /// Balance for one key; 0 when no row exists yet.
    pub fn stock_level(&self, key: StockKey) -> InventoryResult<i64> {
        Ok(on_hand(self.store.stock(key)?.as_ref()))
    }
}
