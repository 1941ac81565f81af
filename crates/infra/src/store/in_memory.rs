use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::debug;

use stockpro_core::{CountItemId, InventoryError, InventoryResult, LocationId, ProductId, SessionId};
use stockpro_inventory::{
    CurrentStock, InventoryTransaction, Location, MasterData, Product, StockCountItem,
    StockCountSession, StockKey, TransactionKind,
};

use super::query::{Pagination, SessionPage, StockFilter, TransactionFilter, TransactionPage};
use super::r#trait::{InventoryStore, StoreError, UnitOfWork};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Lockable resource inside the in-memory store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Stock(StockKey),
    Session(SessionId),
    Item(CountItemId),
}

/// Exclusive per-key locks with a bounded wait.
#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl LockTable {
    fn acquire(&self, key: LockKey, timeout: Duration) -> Result<(), StoreError> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().map_err(|_| StoreError::Poisoned)?;
        while held.contains(&key) {
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::Busy(format!("timed out waiting for {key:?}")));
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| StoreError::Poisoned)?;
            held = guard;
        }
        held.insert(key);
        Ok(())
    }

    fn release(&self, keys: &[LockKey]) {
        if keys.is_empty() {
            return;
        }
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for key in keys {
            held.remove(key);
        }
        drop(held);
        self.released.notify_all();
    }
}

#[derive(Debug, Default)]
struct State {
    stock: BTreeMap<StockKey, CurrentStock>,
    ledger: Vec<InventoryTransaction>,
    sessions: HashMap<SessionId, StockCountSession>,
    items: HashMap<CountItemId, StockCountItem>,
}

impl State {
    fn ledger_sum(&self, key: StockKey) -> i64 {
        self.ledger
            .iter()
            .filter(|tx| tx.key() == key)
            .map(|tx| tx.quantity_change)
            .sum()
    }
}

/// In-memory inventory store.
///
/// Intended for tests/dev. Row locks are emulated with a per-key lock table,
/// so concurrent units of work on different keys proceed in parallel while
/// two units of work on the same key serialize (or time out with `Busy`).
#[derive(Debug)]
pub struct InMemoryInventoryStore {
    state: RwLock<State>,
    locks: LockTable,
    lock_timeout: Duration,
}

impl Default for InMemoryInventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            locks: LockTable::default(),
            lock_timeout,
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        Ok(Box::new(InMemoryUnitOfWork {
            store: self,
            held: Vec::new(),
            stock: BTreeMap::new(),
            ledger: Vec::new(),
            sessions: HashMap::new(),
            items: HashMap::new(),
            new_items: HashSet::new(),
        }))
    }

    fn stock(&self, key: StockKey) -> Result<Option<CurrentStock>, StoreError> {
        Ok(self.read()?.stock.get(&key).cloned())
    }

    fn list_stock(&self, filter: &StockFilter) -> Result<Vec<CurrentStock>, StoreError> {
        Ok(self
            .read()?
            .stock
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    fn query_transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<TransactionPage, StoreError> {
        let mut rows: Vec<InventoryTransaction> = self
            .read()?
            .ledger
            .iter()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.transaction_date
                .cmp(&a.transaction_date)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(pagination.apply(rows))
    }

    fn ledger_for_key(&self, key: StockKey) -> Result<Vec<InventoryTransaction>, StoreError> {
        Ok(self
            .read()?
            .ledger
            .iter()
            .filter(|tx| tx.key() == key)
            .cloned()
            .collect())
    }

    fn near_expiry(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let state = self.read()?;
        let mut rows: Vec<InventoryTransaction> = state
            .ledger
            .iter()
            .filter(|tx| tx.kind == TransactionKind::StockIn)
            .filter(|tx| tx.expiry_date.is_some_and(|d| d >= from && d <= to))
            .filter(|tx| state.stock.get(&tx.key()).is_some_and(|row| row.quantity > 0))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.expiry_date.cmp(&b.expiry_date).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    fn stock_keys(&self) -> Result<Vec<StockKey>, StoreError> {
        let state = self.read()?;
        let keys: BTreeSet<StockKey> = state
            .stock
            .keys()
            .copied()
            .chain(state.ledger.iter().map(InventoryTransaction::key))
            .collect();
        Ok(keys.into_iter().collect())
    }

    fn session(&self, id: SessionId) -> Result<Option<StockCountSession>, StoreError> {
        Ok(self.read()?.sessions.get(&id).cloned())
    }

    fn session_items(&self, id: SessionId) -> Result<Vec<StockCountItem>, StoreError> {
        let state = self.read()?;
        let mut items: Vec<StockCountItem> = state
            .items
            .values()
            .filter(|item| item.session_id == id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.id);
        Ok(items)
    }

    fn list_sessions(&self, pagination: Pagination) -> Result<SessionPage, StoreError> {
        let mut sessions: Vec<StockCountSession> = self.read()?.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| {
            b.start_date()
                .cmp(&a.start_date())
                .then_with(|| b.id().cmp(&a.id()))
        });
        Ok(pagination.apply(sessions))
    }
}

/// Unit of work over `InMemoryInventoryStore`.
///
/// Writes are staged locally and published under the state write lock on
/// commit. Held locks are released on drop, committed or not.
struct InMemoryUnitOfWork<'a> {
    store: &'a InMemoryInventoryStore,
    held: Vec<LockKey>,
    stock: BTreeMap<StockKey, CurrentStock>,
    ledger: Vec<InventoryTransaction>,
    sessions: HashMap<SessionId, StockCountSession>,
    items: HashMap<CountItemId, StockCountItem>,
    new_items: HashSet<CountItemId>,
}

impl InMemoryUnitOfWork<'_> {
    fn lock(&mut self, key: LockKey) -> Result<(), StoreError> {
        if self.held.contains(&key) {
            return Ok(());
        }
        self.store.locks.acquire(key, self.store.lock_timeout)?;
        debug!(?key, "lock acquired");
        self.held.push(key);
        Ok(())
    }

    fn current_item(&self, id: CountItemId) -> Result<Option<StockCountItem>, StoreError> {
        if let Some(item) = self.items.get(&id) {
            return Ok(Some(item.clone()));
        }
        Ok(self.store.read()?.items.get(&id).cloned())
    }
}

impl Drop for InMemoryUnitOfWork<'_> {
    fn drop(&mut self) {
        self.store.locks.release(&self.held);
    }
}

impl UnitOfWork for InMemoryUnitOfWork<'_> {
    fn lock_stock(&mut self, keys: &[StockKey]) -> Result<(), StoreError> {
        let ordered: BTreeSet<StockKey> = keys.iter().copied().collect();
        for key in ordered {
            self.lock(LockKey::Stock(key))?;
        }
        Ok(())
    }

    fn stock_for_update(&mut self, key: StockKey) -> Result<Option<CurrentStock>, StoreError> {
        self.lock(LockKey::Stock(key))?;
        self.stock(key)
    }

    fn stock(&mut self, key: StockKey) -> Result<Option<CurrentStock>, StoreError> {
        if let Some(row) = self.stock.get(&key) {
            return Ok(Some(row.clone()));
        }
        Ok(self.store.read()?.stock.get(&key).cloned())
    }

    fn put_stock(&mut self, row: &CurrentStock) -> Result<(), StoreError> {
        let key = row.key();
        if !self.held.contains(&LockKey::Stock(key)) {
            return Err(StoreError::Storage(format!(
                "stock row {key} written without holding its lock"
            )));
        }
        self.stock.insert(key, row.clone());
        Ok(())
    }

    fn stock_at_location(
        &mut self,
        location_id: LocationId,
    ) -> Result<Vec<CurrentStock>, StoreError> {
        let state = self.store.read()?;
        let mut rows: BTreeMap<StockKey, CurrentStock> = state
            .stock
            .iter()
            .filter(|(key, _)| key.location_id == location_id)
            .map(|(key, row)| (*key, row.clone()))
            .collect();
        for (key, row) in self.stock.iter().filter(|(k, _)| k.location_id == location_id) {
            rows.insert(*key, row.clone());
        }
        Ok(rows.into_values().collect())
    }

    fn insert_transaction(&mut self, entry: &InventoryTransaction) -> Result<(), StoreError> {
        self.ledger.push(entry.clone());
        Ok(())
    }

    fn ledger_sum(&mut self, key: StockKey) -> Result<i64, StoreError> {
        let committed = self.store.read()?.ledger_sum(key);
        let staged: i64 = self
            .ledger
            .iter()
            .filter(|tx| tx.key() == key)
            .map(|tx| tx.quantity_change)
            .sum();
        Ok(committed + staged)
    }

    fn session_for_update(
        &mut self,
        id: SessionId,
    ) -> Result<Option<StockCountSession>, StoreError> {
        self.lock(LockKey::Session(id))?;
        if let Some(session) = self.sessions.get(&id) {
            return Ok(Some(session.clone()));
        }
        Ok(self.store.read()?.sessions.get(&id).cloned())
    }

    fn save_session(&mut self, session: &StockCountSession) -> Result<(), StoreError> {
        self.lock(LockKey::Session(session.id()))?;
        self.sessions.insert(session.id(), session.clone());
        Ok(())
    }

    fn items(&mut self, session_id: SessionId) -> Result<Vec<StockCountItem>, StoreError> {
        let mut items: HashMap<CountItemId, StockCountItem> = self
            .store
            .read()?
            .items
            .values()
            .filter(|item| item.session_id == session_id)
            .map(|item| (item.id, item.clone()))
            .collect();
        for item in self.items.values().filter(|item| item.session_id == session_id) {
            items.insert(item.id, item.clone());
        }
        let mut items: Vec<StockCountItem> = items.into_values().collect();
        items.sort_by_key(|item| item.id);
        Ok(items)
    }

    fn item_for_update(&mut self, id: CountItemId) -> Result<Option<StockCountItem>, StoreError> {
        self.lock(LockKey::Item(id))?;
        self.current_item(id)
    }

    fn insert_item(&mut self, item: &StockCountItem) -> Result<(), StoreError> {
        let duplicate = self
            .items(item.session_id)?
            .iter()
            .any(|existing| existing.product_id == item.product_id);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "session {} already has product {}",
                item.session_id, item.product_id
            )));
        }
        self.lock(LockKey::Item(item.id))?;
        self.new_items.insert(item.id);
        self.items.insert(item.id, item.clone());
        Ok(())
    }

    fn save_item(&mut self, item: &StockCountItem) -> Result<(), StoreError> {
        if self.current_item(item.id)?.is_none() {
            return Err(StoreError::Storage(format!("stock count item {} does not exist", item.id)));
        }
        self.lock(LockKey::Item(item.id))?;
        self.items.insert(item.id, item.clone());
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let mut state = self.store.state.write().map_err(|_| StoreError::Poisoned)?;

        // Unique (session, product) holds across concurrent inserts.
        for id in &self.new_items {
            if let Some(item) = self.items.get(id) {
                let taken = state.items.values().any(|existing| {
                    existing.session_id == item.session_id
                        && existing.product_id == item.product_id
                        && existing.id != item.id
                });
                if taken {
                    return Err(StoreError::Conflict(format!(
                        "session {} already has product {}",
                        item.session_id, item.product_id
                    )));
                }
            }
        }

        let stock = std::mem::take(&mut self.stock);
        state.stock.extend(stock);
        state.ledger.append(&mut self.ledger);
        state.sessions.extend(self.sessions.drain());
        state.items.extend(self.items.drain());
        Ok(())
    }
}

/// In-memory product and location masters.
#[derive(Debug, Default)]
pub struct InMemoryMasterData {
    products: RwLock<HashMap<ProductId, Product>>,
    locations: RwLock<HashMap<LocationId, Location>>,
}

impl InMemoryMasterData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_product(&self, product: Product) -> InventoryResult<()> {
        self.products
            .write()
            .map_err(|_| InventoryError::storage("product master lock poisoned"))?
            .insert(product.id, product);
        Ok(())
    }

    pub fn insert_location(&self, location: Location) -> InventoryResult<()> {
        self.locations
            .write()
            .map_err(|_| InventoryError::storage("location master lock poisoned"))?
            .insert(location.id, location);
        Ok(())
    }
}

impl MasterData for InMemoryMasterData {
    fn product(&self, id: ProductId) -> InventoryResult<Option<Product>> {
        let products = self
            .products
            .read()
            .map_err(|_| InventoryError::storage("product master lock poisoned"))?;
        Ok(products.get(&id).cloned())
    }

    fn location(&self, id: LocationId) -> InventoryResult<Option<Location>> {
        let locations = self
            .locations
            .read()
            .map_err(|_| InventoryError::storage("location master lock poisoned"))?;
        Ok(locations.get(&id).cloned())
    }
}
