//! Stock count workflow over the store.
//!
//! `StockCountService` drives the session state machine from
//! `stockpro_inventory::count`, persisting every transition in a unit of
//! work. Closing a session reconciles each counted difference through the
//! adjustment operator with `AllowNegative`, in the same unit of work as the
//! status change: either every adjustment and the CLOSED status commit, or
//! none of them do.

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use stockpro_core::{
    CountItemId, Entity, InventoryError, InventoryResult, LocationId, ProductId, SessionId,
};
use stockpro_inventory::{
    Adjustment, BalancePolicy, BulkAddFailure, BulkAddReport, InventoryTransaction, MasterData,
    StockCountItem, StockCountSession, StockKey, on_hand,
};

use crate::movements;
use crate::store::{
    InventoryStore, Pagination, SessionPage, StoreError, UnitOfWork, in_unit_of_work,
};

/// A closed session and the adjustments its closure produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseOutcome {
    pub session: StockCountSession,
    pub adjustments: Vec<InventoryTransaction>,
}

fn locked_session(uow: &mut dyn UnitOfWork, id: SessionId) -> InventoryResult<StockCountSession> {
    uow.session_for_update(id)?
        .ok_or_else(|| InventoryError::not_found(Entity::Session, id))
}

/// Insert an item, turning a uniqueness race into `DuplicateItem`.
fn insert_item(uow: &mut dyn UnitOfWork, item: &StockCountItem) -> InventoryResult<()> {
    match uow.insert_item(item) {
        Err(StoreError::Conflict(_)) => Err(InventoryError::DuplicateItem {
            session: item.session_id,
            product: item.product_id,
        }),
        other => Ok(other?),
    }
}

#[derive(Debug, Clone)]
pub struct StockCountService<S, M> {
    store: S,
    master: M,
}

impl<S, M> StockCountService<S, M>
where
    S: InventoryStore,
    M: MasterData,
{
    pub fn new(store: S, master: M) -> Self {
        Self { store, master }
    }

    /// Open a new session for a location.
    #[instrument(skip(self, notes), err)]
    pub fn create(
        &self,
        location_id: LocationId,
        notes: Option<String>,
    ) -> InventoryResult<StockCountSession> {
        self.master.require_location(location_id)?;
        let session = StockCountSession::open(location_id, notes, Utc::now());
        in_unit_of_work(&self.store, |uow| Ok(uow.save_session(&session)?))?;
        info!(session_id = %session.id(), %location_id, "stock count session opened");
        Ok(session)
    }

    pub fn get(&self, id: SessionId) -> InventoryResult<StockCountSession> {
        self.store
            .session(id)?
            .ok_or_else(|| InventoryError::not_found(Entity::Session, id))
    }

    pub fn items(&self, id: SessionId) -> InventoryResult<Vec<StockCountItem>> {
        self.get(id)?;
        Ok(self.store.session_items(id)?)
    }

    pub fn list_sessions(&self, pagination: Pagination) -> InventoryResult<SessionPage> {
        Ok(self.store.list_sessions(pagination)?)
    }

    /// Add one product, snapshotting its current balance at the session's location.
    #[instrument(skip(self), err)]
    pub fn add_item(
        &self,
        session_id: SessionId,
        product_id: ProductId,
    ) -> InventoryResult<StockCountItem> {
        in_unit_of_work(&self.store, |uow| {
            let session = locked_session(uow, session_id)?;
            session.ensure_accepts_items()?;
            self.master.require_product(product_id)?;

            if uow.items(session_id)?.iter().any(|i| i.product_id == product_id) {
                return Err(InventoryError::DuplicateItem {
                    session: session_id,
                    product: product_id,
                });
            }

            let key = StockKey::new(product_id, session.location_id());
            let system_quantity = on_hand(uow.stock(key)?.as_ref());
            let item = StockCountItem::new(session_id, product_id, system_quantity);
            insert_item(uow, &item)?;
            Ok(item)
        })
    }

    /// Add every product that has a stock record at the session's location.
    ///
    /// Products already in the session are skipped. A product that cannot be
    /// added is reported in `errors` and does not stop the others.
    #[instrument(skip(self), err)]
    pub fn add_all_items_from_location(
        &self,
        session_id: SessionId,
    ) -> InventoryResult<BulkAddReport> {
        let report = in_unit_of_work(&self.store, |uow| {
            let session = locked_session(uow, session_id)?;
            session.ensure_accepts_items()?;

            let mut present: HashSet<ProductId> =
                uow.items(session_id)?.iter().map(|i| i.product_id).collect();
            let mut report = BulkAddReport::default();

            for row in uow.stock_at_location(session.location_id())? {
                if present.contains(&row.product_id) {
                    report.skipped.push(row.product_id);
                    continue;
                }
                let item = StockCountItem::new(session_id, row.product_id, row.quantity);
                let added = self
                    .master
                    .require_product(row.product_id)
                    .and_then(|_| insert_item(uow, &item));
                match added {
                    Ok(()) => {
                        present.insert(row.product_id);
                        report.added.push(item);
                    }
                    Err(error @ (InventoryError::Busy(_) | InventoryError::Storage(_))) => {
                        return Err(error);
                    }
                    Err(error) => {
                        warn!(product_id = %row.product_id, %error, "product not added to stock count");
                        report.errors.push(BulkAddFailure {
                            product_id: row.product_id,
                            error,
                        });
                    }
                }
            }
            Ok(report)
        })?;

        info!(
            %session_id,
            added = report.added.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "stock count items added from location"
        );
        Ok(report)
    }

    /// Explicit `OPEN -> COUNTING`.
    #[instrument(skip(self), err)]
    pub fn start_counting(&self, session_id: SessionId) -> InventoryResult<StockCountSession> {
        in_unit_of_work(&self.store, |uow| {
            let mut session = locked_session(uow, session_id)?;
            session.start_counting()?;
            uow.save_session(&session)?;
            Ok(session)
        })
    }

    /// Record (or overwrite) the counted quantity of one item. The first
    /// count on an `OPEN` session moves it to `COUNTING`.
    #[instrument(skip(self), err)]
    pub fn record_count(
        &self,
        session_id: SessionId,
        item_id: CountItemId,
        counted_quantity: i64,
    ) -> InventoryResult<StockCountItem> {
        in_unit_of_work(&self.store, |uow| {
            let mut session = locked_session(uow, session_id)?;
            session.ensure_accepts_counts()?;

            let mut item = uow
                .item_for_update(item_id)?
                .filter(|item| item.session_id == session_id)
                .ok_or_else(|| InventoryError::not_found(Entity::Item, item_id))?;
            item.record(counted_quantity, Utc::now())?;

            if session.note_count_recorded()? {
                uow.save_session(&session)?;
                info!(%session_id, "stock count session moved to counting");
            }
            uow.save_item(&item)?;
            Ok(item)
        })
    }

    /// `COUNTING -> CLOSED`, posting one adjustment per nonzero difference.
    #[instrument(skip(self), err)]
    pub fn close(&self, session_id: SessionId) -> InventoryResult<CloseOutcome> {
        let outcome = in_unit_of_work(&self.store, |uow| {
            let mut session = locked_session(uow, session_id)?;
            let items = uow.items(session_id)?;
            let variances = session.close(&items, Utc::now())?;

            let keys: Vec<StockKey> = variances
                .iter()
                .map(|v| StockKey::new(v.product_id, session.location_id()))
                .collect();
            uow.lock_stock(&keys)?;

            let reason = session.adjustment_reason();
            let mut adjustments = Vec::with_capacity(variances.len());
            for variance in &variances {
                let cmd = Adjustment::new(
                    variance.product_id,
                    session.location_id(),
                    variance.difference,
                )
                .with_reason(reason.clone())
                .with_notes(variance.adjustment_notes());
                adjustments.push(movements::adjust(
                    uow,
                    &self.master,
                    &cmd,
                    BalancePolicy::AllowNegative,
                )?);
            }

            uow.save_session(&session)?;
            Ok(CloseOutcome {
                session,
                adjustments,
            })
        })?;

        info!(
            %session_id,
            adjustments = outcome.adjustments.len(),
            "stock count session closed"
        );
        Ok(outcome)
    }

    /// `OPEN | COUNTING -> CANCELED`; no adjustments.
    #[instrument(skip(self), err)]
    pub fn cancel(&self, session_id: SessionId) -> InventoryResult<StockCountSession> {
        let session = in_unit_of_work(&self.store, |uow| {
            let mut session = locked_session(uow, session_id)?;
            session.cancel(Utc::now())?;
            uow.save_session(&session)?;
            Ok(session)
        })?;
        info!(%session_id, "stock count session canceled");
        Ok(session)
    }
}
