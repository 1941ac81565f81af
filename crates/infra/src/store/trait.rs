use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;

use stockpro_core::{CountItemId, InventoryError, InventoryResult, LocationId, SessionId};
use stockpro_inventory::{
    CurrentStock, InventoryTransaction, StockCountItem, StockCountSession, StockKey,
};

use super::query::{Pagination, SessionPage, StockFilter, TransactionFilter, TransactionPage};

/// Store operation error.
///
/// These are **infrastructure errors** (locking, constraint races, IO) as
/// opposed to domain errors. They cross into the domain as `InventoryError`:
///
/// | StoreError | InventoryError |
/// |------------|----------------|
/// | `Busy` | `Busy` |
/// | `Conflict` | `Busy` |
/// | `Storage` | `Storage` |
/// | `Poisoned` | `Storage` |
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Lock wait timed out or a deadlock was detected.
    #[error("lock wait timed out: {0}")]
    Busy(String),

    /// A concurrent writer inserted the same unique row first.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl From<StoreError> for InventoryError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Busy(msg) | StoreError::Conflict(msg) => InventoryError::Busy(msg),
            StoreError::Storage(msg) => InventoryError::Storage(msg),
            StoreError::Poisoned => InventoryError::storage("store lock poisoned"),
        }
    }
}

/// One atomic unit of work against the store (one database transaction).
///
/// ## Locking
///
/// Methods named `*_for_update` take an exclusive lock on the row (or on the
/// key, when the row does not exist yet) that is held until the unit of work
/// ends. `lock_stock` locks several stock keys at once, always in `StockKey`
/// order, so callers touching more than one key never deadlock each other.
///
/// ## Atomicity
///
/// Writes are visible to other units of work only after `commit`. Dropping a
/// unit of work without committing rolls everything back.
pub trait UnitOfWork {
    /// Lock the given stock keys in deterministic order.
    fn lock_stock(&mut self, keys: &[StockKey]) -> Result<(), StoreError>;

    /// Read a projection row with an exclusive lock.
    fn stock_for_update(&mut self, key: StockKey) -> Result<Option<CurrentStock>, StoreError>;

    /// Read a projection row without locking it.
    fn stock(&mut self, key: StockKey) -> Result<Option<CurrentStock>, StoreError>;

    /// Insert or overwrite a projection row. The key must be locked.
    fn put_stock(&mut self, row: &CurrentStock) -> Result<(), StoreError>;

    /// Projection rows at one location (committed plus this unit's writes).
    fn stock_at_location(&mut self, location_id: LocationId)
    -> Result<Vec<CurrentStock>, StoreError>;

    /// Append a ledger entry.
    fn insert_transaction(&mut self, entry: &InventoryTransaction) -> Result<(), StoreError>;

    /// Sum of `quantity_change` over every ledger entry for `key`.
    fn ledger_sum(&mut self, key: StockKey) -> Result<i64, StoreError>;

    fn session_for_update(
        &mut self,
        id: SessionId,
    ) -> Result<Option<StockCountSession>, StoreError>;

    /// Insert or overwrite a session.
    fn save_session(&mut self, session: &StockCountSession) -> Result<(), StoreError>;

    fn items(&mut self, session_id: SessionId) -> Result<Vec<StockCountItem>, StoreError>;

    fn item_for_update(&mut self, id: CountItemId) -> Result<Option<StockCountItem>, StoreError>;

    /// Insert a new item. `Conflict` if the session already has that product.
    fn insert_item(&mut self, item: &StockCountItem) -> Result<(), StoreError>;

    /// Overwrite an existing item.
    fn save_item(&mut self, item: &StockCountItem) -> Result<(), StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Ledger, projection and stock-count persistence.
///
/// Writes happen only through a `UnitOfWork`; the read methods here see
/// committed state.
pub trait InventoryStore: Send + Sync {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError>;

    fn stock(&self, key: StockKey) -> Result<Option<CurrentStock>, StoreError>;

    /// Projection rows matching `filter`, ordered by (location, product).
    fn list_stock(&self, filter: &StockFilter) -> Result<Vec<CurrentStock>, StoreError>;

    /// Ledger entries matching `filter`, newest first.
    fn query_transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<TransactionPage, StoreError>;

    /// Every ledger entry for one key, oldest first.
    fn ledger_for_key(&self, key: StockKey) -> Result<Vec<InventoryTransaction>, StoreError>;

    /// STOCK_IN entries with an expiry date in `[from, to]` whose key still has
    /// a positive balance, soonest expiry first.
    fn near_expiry(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<InventoryTransaction>, StoreError>;

    /// Every key that has a projection row or at least one ledger entry.
    fn stock_keys(&self) -> Result<Vec<StockKey>, StoreError>;

    fn session(&self, id: SessionId) -> Result<Option<StockCountSession>, StoreError>;

    fn session_items(&self, id: SessionId) -> Result<Vec<StockCountItem>, StoreError>;

    /// Sessions, most recently started first.
    fn list_sessions(&self, pagination: Pagination) -> Result<SessionPage, StoreError>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        (**self).begin()
    }

    fn stock(&self, key: StockKey) -> Result<Option<CurrentStock>, StoreError> {
        (**self).stock(key)
    }

    fn list_stock(&self, filter: &StockFilter) -> Result<Vec<CurrentStock>, StoreError> {
        (**self).list_stock(filter)
    }

    fn query_transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<TransactionPage, StoreError> {
        (**self).query_transactions(filter, pagination)
    }

    fn ledger_for_key(&self, key: StockKey) -> Result<Vec<InventoryTransaction>, StoreError> {
        (**self).ledger_for_key(key)
    }

    fn near_expiry(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        (**self).near_expiry(from, to)
    }

    fn stock_keys(&self) -> Result<Vec<StockKey>, StoreError> {
        (**self).stock_keys()
    }

    fn session(&self, id: SessionId) -> Result<Option<StockCountSession>, StoreError> {
        (**self).session(id)
    }

    fn session_items(&self, id: SessionId) -> Result<Vec<StockCountItem>, StoreError> {
        (**self).session_items(id)
    }

    fn list_sessions(&self, pagination: Pagination) -> Result<SessionPage, StoreError> {
        (**self).list_sessions(pagination)
    }
}

/// Run `work` inside a fresh unit of work and commit it.
///
/// Any error from `work` drops the unit of work, which rolls it back.
pub fn in_unit_of_work<S, T, F>(store: &S, work: F) -> InventoryResult<T>
where
    S: InventoryStore + ?Sized,
    F: FnOnce(&mut dyn UnitOfWork) -> InventoryResult<T>,
{
    let mut uow = store.begin()?;
    let out = work(&mut *uow)?;
    uow.commit()?;
    Ok(out)
}
