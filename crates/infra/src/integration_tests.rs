//! End-to-end tests for the inventory engine against the in-memory store.
//!
//! Covers the movement operators, the stock count workflow, the read helpers
//! and projection repair through their public services, including lock
//! contention between units of work.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use proptest::prelude::*;

use stockpro_core::{InventoryError, LocationId, ProductId, SaleId};
use stockpro_inventory::{
    Adjustment, BalancePolicy, BatchLine, BatchStockIn, CountStatus, Location, NewTransaction,
    Product, SaleDeduction, StockIn, StockKey, TransactionKind, Transfer,
};

use crate::projection::{ProjectionRepair, record_movement};
use crate::reports::InventoryReports;
use crate::service::InventoryService;
use crate::stock_count::StockCountService;
use crate::store::{
    InMemoryInventoryStore, InMemoryMasterData, InventoryStore, Pagination, TransactionFilter,
    in_unit_of_work,
};

type Store = Arc<InMemoryInventoryStore>;
type Master = Arc<InMemoryMasterData>;

struct Fixture {
    store: Store,
    master: Master,
    service: InventoryService<Store, Master>,
    counts: StockCountService<Store, Master>,
    reports: InventoryReports<Store>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_store(InMemoryInventoryStore::new())
    }

    fn with_lock_timeout(timeout: Duration) -> Self {
        Self::with_store(InMemoryInventoryStore::with_lock_timeout(timeout))
    }

    fn with_store(store: InMemoryInventoryStore) -> Self {
        let store = Arc::new(store);
        let master = Arc::new(InMemoryMasterData::new());
        Self {
            service: InventoryService::new(store.clone(), master.clone()),
            counts: StockCountService::new(store.clone(), master.clone()),
            reports: InventoryReports::new(store.clone()),
            store,
            master,
        }
    }

    fn product(&self, shelf_life_days: Option<u32>, standard_cost: Option<u64>) -> ProductId {
        let id = ProductId::new();
        self.master
            .insert_product(Product {
                id,
                sku: format!("SKU-{id}"),
                barcode: None,
                name: "Test product".to_string(),
                shelf_life_days,
                standard_cost,
            })
            .unwrap();
        id
    }

    fn location(&self, name: &str) -> LocationId {
        let id = LocationId::new();
        self.master
            .insert_location(Location {
                id,
                name: name.to_string(),
            })
            .unwrap();
        id
    }

    fn receive(&self, product: ProductId, location: LocationId, quantity: i64) {
        self.service
            .stock_in(&StockIn::new(product, location, quantity))
            .unwrap();
    }

    fn level(&self, product: ProductId, location: LocationId) -> i64 {
        self.reports
            .stock_level(StockKey::new(product, location))
            .unwrap()
    }

    fn ledger_count(&self, product: ProductId) -> u64 {
        let filter = TransactionFilter {
            product_id: Some(product),
            ..TransactionFilter::default()
        };
        self.reports
            .transactions(&filter, Pagination::default())
            .unwrap()
            .total
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn stock_in_derives_expiry_from_shelf_life() {
    let fx = Fixture::new();
    let product = fx.product(Some(5), None);
    let location = fx.location("Main");

    let mut cmd = StockIn::new(product, location, 10);
    cmd.production_date = Some(date(2025, 1, 1));
    let entry = fx.service.stock_in(&cmd).unwrap();

    assert_eq!(entry.kind, TransactionKind::StockIn);
    assert_eq!(entry.expiry_date, Some(date(2025, 1, 6)));
    assert_eq!(fx.level(product, location), 10);
}

#[test]
fn supplied_expiry_wins_over_calculated() {
    let fx = Fixture::new();
    let product = fx.product(Some(5), None);
    let location = fx.location("Main");

    let mut cmd = StockIn::new(product, location, 3);
    cmd.production_date = Some(date(2025, 1, 1));
    cmd.expiry_date = Some(date(2025, 2, 1));
    let entry = fx.service.stock_in(&cmd).unwrap();

    assert_eq!(entry.expiry_date, Some(date(2025, 2, 1)));
}

#[test]
fn stock_in_without_dates_for_expiring_product_is_rejected() {
    let fx = Fixture::new();
    let product = fx.product(Some(5), None);
    let location = fx.location("Main");

    let err = fx
        .service
        .stock_in(&StockIn::new(product, location, 3))
        .unwrap_err();
    assert!(matches!(err, InventoryError::MissingExpiryInput { .. }));
    assert_eq!(fx.ledger_count(product), 0);
}

#[test]
fn overdrawing_adjustment_changes_nothing() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Main");
    fx.receive(product, location, 10);

    let err = fx
        .service
        .adjust(&Adjustment::new(product, location, -15))
        .unwrap_err();

    match err {
        InventoryError::InsufficientStock {
            current, requested, ..
        } => {
            assert_eq!(current, 10);
            assert_eq!(requested, 15);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
    assert_eq!(fx.ledger_count(product), 1);
    assert_eq!(fx.level(product, location), 10);
}

#[test]
fn adjustment_records_reason_and_kind() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Main");
    fx.receive(product, location, 10);

    let entry = fx
        .service
        .adjust(&Adjustment::new(product, location, -4).with_reason("damaged"))
        .unwrap();

    assert_eq!(entry.kind, TransactionKind::AdjustmentSub);
    assert_eq!(entry.quantity_change, -4);
    assert!(entry.notes.unwrap().contains("damaged"));
    assert_eq!(fx.level(product, location), 6);
}

#[test]
fn transfer_moves_stock_with_linked_entries() {
    let fx = Fixture::new();
    let product = fx.product(None, Some(250));
    let from = fx.location("Warehouse");
    let to = fx.location("Shop");
    fx.receive(product, from, 10);

    let receipt = fx
        .service
        .transfer(&Transfer::new(product, from, to, 4))
        .unwrap();

    assert_eq!(fx.level(product, from), 6);
    assert_eq!(fx.level(product, to), 4);
    assert_eq!(fx.ledger_count(product), 3);
    assert_eq!(receipt.outbound.kind, TransactionKind::TransferOut);
    assert_eq!(receipt.outbound.quantity_change, -4);
    assert_eq!(receipt.inbound.kind, TransactionKind::TransferIn);
    assert_eq!(receipt.inbound.quantity_change, 4);
    assert_eq!(
        receipt.inbound.related_transaction_id,
        Some(*receipt.outbound.id.as_uuid())
    );
    assert_eq!(receipt.outbound.cost_per_unit, Some(250));
}

#[test]
fn transfer_to_same_location_is_rejected() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Main");
    fx.receive(product, location, 10);

    let err = fx
        .service
        .transfer(&Transfer::new(product, location, location, 1))
        .unwrap_err();
    assert!(matches!(err, InventoryError::SameLocationTransfer(_)));
    assert_eq!(fx.ledger_count(product), 1);
}

#[test]
fn transfer_never_overdraws_the_source() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let from = fx.location("Warehouse");
    let to = fx.location("Shop");
    fx.receive(product, from, 3);

    let err = fx
        .service
        .transfer(&Transfer::new(product, from, to, 4))
        .unwrap_err();
    assert!(matches!(err, InventoryError::InsufficientStock { .. }));
    assert_eq!(fx.level(product, from), 3);
    assert_eq!(fx.level(product, to), 0);
}

#[test]
fn failing_batch_line_rolls_back_the_whole_batch() {
    let fx = Fixture::new();
    let plain = fx.product(None, None);
    let expiring = fx.product(Some(30), None);
    let location = fx.location("Dock");

    let batch = BatchStockIn {
        location_id: location,
        lines: vec![BatchLine::new(plain, 5), BatchLine::new(expiring, 2)],
        batch_notes: Some("PO-17".to_string()),
    };
    let err = fx.service.batch_stock_in(&batch).unwrap_err();

    assert!(matches!(err, InventoryError::MissingExpiryInput { .. }));
    assert_eq!(fx.level(plain, location), 0);
    assert_eq!(fx.ledger_count(plain), 0);
}

#[test]
fn batch_stock_in_tags_every_line() {
    let fx = Fixture::new();
    let a = fx.product(None, None);
    let b = fx.product(None, None);
    let location = fx.location("Dock");

    let batch = BatchStockIn {
        location_id: location,
        lines: vec![BatchLine::new(a, 5), BatchLine::new(b, 7)],
        batch_notes: Some("PO-17".to_string()),
    };
    let entries = fx.service.batch_stock_in(&batch).unwrap();

    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.notes.as_deref() == Some("PO-17")));
    assert_eq!(fx.level(a, location), 5);
    assert_eq!(fx.level(b, location), 7);
}

#[test]
fn sale_respects_balance_policy() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Shop");
    fx.receive(product, location, 2);
    let sale = SaleId::new();

    let err = fx
        .service
        .deduct_for_sale(&SaleDeduction::new(product, location, 5, sale))
        .unwrap_err();
    assert!(matches!(err, InventoryError::InsufficientStock { .. }));

    let entry = fx
        .service
        .deduct_for_sale(&SaleDeduction::new(product, location, 5, sale).allow_negative(true))
        .unwrap();
    assert_eq!(entry.kind, TransactionKind::Sale);
    assert_eq!(entry.related_transaction_id, Some(*sale.as_uuid()));
    assert_eq!(fx.level(product, location), -3);

    let negative = fx.reports.negative_stock().unwrap();
    assert_eq!(negative.len(), 1);
    assert_eq!(negative[0].product_id, product);
}

#[test]
fn sale_without_stock_row_needs_override() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Shop");

    let err = fx
        .service
        .deduct_for_sale(&SaleDeduction::new(product, location, 1, SaleId::new()))
        .unwrap_err();
    assert!(matches!(err, InventoryError::InsufficientStock { .. }));

    fx.service
        .deduct_for_sale(
            &SaleDeduction::new(product, location, 1, SaleId::new()).allow_negative(true),
        )
        .unwrap();
    assert_eq!(fx.level(product, location), -1);
}

#[test]
fn sale_in_caller_unit_of_work_rolls_back_with_it() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Shop");
    fx.receive(product, location, 5);

    {
        let mut uow = fx.store.begin().unwrap();
        fx.service
            .deduct_for_sale_in(
                &mut *uow,
                &SaleDeduction::new(product, location, 2, SaleId::new()),
            )
            .unwrap();
        // dropped without commit
    }
    assert_eq!(fx.level(product, location), 5);

    let mut uow = fx.store.begin().unwrap();
    fx.service
        .deduct_for_sale_in(
            &mut *uow,
            &SaleDeduction::new(product, location, 2, SaleId::new()),
        )
        .unwrap();
    uow.commit().unwrap();
    assert_eq!(fx.level(product, location), 3);
}

#[test]
fn closing_a_count_posts_only_real_differences() {
    let fx = Fixture::new();
    let p1 = fx.product(None, None);
    let p2 = fx.product(None, None);
    let location = fx.location("Main");
    fx.receive(p1, location, 10);
    fx.receive(p2, location, 5);

    let session = fx.counts.create(location, None).unwrap();
    let report = fx.counts.add_all_items_from_location(session.id()).unwrap();
    assert_eq!(report.added.len(), 2);
    assert!(report.errors.is_empty());

    for item in &report.added {
        let counted = if item.product_id == p1 { 10 } else { 3 };
        fx.counts
            .record_count(session.id(), item.id, counted)
            .unwrap();
    }
    assert_eq!(
        fx.counts.get(session.id()).unwrap().status(),
        CountStatus::Counting
    );

    let outcome = fx.counts.close(session.id()).unwrap();
    assert_eq!(outcome.session.status(), CountStatus::Closed);
    assert!(outcome.session.end_date().is_some());
    assert_eq!(outcome.adjustments.len(), 1);

    let adjustment = &outcome.adjustments[0];
    assert_eq!(adjustment.product_id, p2);
    assert_eq!(adjustment.quantity_change, -2);
    assert_eq!(adjustment.kind, TransactionKind::AdjustmentSub);
    let notes = adjustment.notes.as_deref().unwrap();
    assert!(notes.contains(&format!("stock count #{}", session.id())));
    assert!(notes.contains("difference: -2"));

    assert_eq!(fx.level(p1, location), 10);
    assert_eq!(fx.level(p2, location), 3);
}

#[test]
fn adding_the_same_product_twice_is_rejected() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Main");
    fx.receive(product, location, 4);
    let session = fx.counts.create(location, Some("cycle".to_string())).unwrap();

    let item = fx.counts.add_item(session.id(), product).unwrap();
    assert_eq!(item.system_quantity, 4);

    let err = fx.counts.add_item(session.id(), product).unwrap_err();
    assert!(matches!(err, InventoryError::DuplicateItem { .. }));
    assert_eq!(fx.counts.items(session.id()).unwrap().len(), 1);
}

#[test]
fn item_without_stock_row_snapshots_zero() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Main");
    let session = fx.counts.create(location, None).unwrap();

    let item = fx.counts.add_item(session.id(), product).unwrap();
    assert_eq!(item.system_quantity, 0);
}

#[test]
fn bulk_add_skips_existing_and_reports_failures() {
    let fx = Fixture::new();
    let known = fx.product(None, None);
    let other = fx.product(None, None);
    let location = fx.location("Main");
    fx.receive(known, location, 3);
    fx.receive(other, location, 8);

    // A stock row for a product the master no longer knows.
    let ghost = StockKey::new(ProductId::new(), location);
    in_unit_of_work(&fx.store, |uow| {
        record_movement(
            uow,
            NewTransaction::new(TransactionKind::StockIn, ghost, 1),
            BalancePolicy::Strict,
        )
    })
    .unwrap();

    let session = fx.counts.create(location, None).unwrap();
    fx.counts.add_item(session.id(), known).unwrap();

    let report = fx.counts.add_all_items_from_location(session.id()).unwrap();
    assert_eq!(report.skipped, vec![known]);
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.added[0].product_id, other);
    assert_eq!(report.added[0].system_quantity, 8);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].product_id, ghost.product_id);
    assert!(matches!(report.errors[0].error, InventoryError::NotFound { .. }));
    assert_eq!(fx.counts.items(session.id()).unwrap().len(), 2);
}

#[test]
fn incomplete_count_cannot_close() {
    let fx = Fixture::new();
    let p1 = fx.product(None, None);
    let p2 = fx.product(None, None);
    let location = fx.location("Main");
    let session = fx.counts.create(location, None).unwrap();
    let first = fx.counts.add_item(session.id(), p1).unwrap();
    fx.counts.add_item(session.id(), p2).unwrap();

    let err = fx.counts.close(session.id()).unwrap_err();
    assert!(matches!(err, InventoryError::InvalidStateTransition { .. }));

    fx.counts.record_count(session.id(), first.id, 1).unwrap();
    let err = fx.counts.close(session.id()).unwrap_err();
    match err {
        InventoryError::IncompleteCount { missing } => assert_eq!(missing, vec![p2]),
        other => panic!("expected IncompleteCount, got {other:?}"),
    }
    assert_eq!(
        fx.counts.get(session.id()).unwrap().status(),
        CountStatus::Counting
    );
}

#[test]
fn record_count_checks_item_and_quantity() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Main");
    let first = fx.counts.create(location, None).unwrap();
    let second = fx.counts.create(location, None).unwrap();
    let item = fx.counts.add_item(first.id(), product).unwrap();

    let err = fx
        .counts
        .record_count(second.id(), item.id, 1)
        .unwrap_err();
    assert!(matches!(err, InventoryError::NotFound { .. }));

    let err = fx.counts.record_count(first.id(), item.id, -1).unwrap_err();
    assert!(matches!(err, InventoryError::InvalidQuantity(_)));
    assert_eq!(
        fx.counts.get(first.id()).unwrap().status(),
        CountStatus::Open
    );

    let recounted = fx.counts.record_count(first.id(), item.id, 2).unwrap();
    assert_eq!(recounted.counted_quantity, Some(2));
    let recounted = fx.counts.record_count(first.id(), item.id, 4).unwrap();
    assert_eq!(recounted.counted_quantity, Some(4));
}

#[test]
fn canceled_session_is_frozen() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Main");
    fx.receive(product, location, 2);
    let session = fx.counts.create(location, None).unwrap();
    let item = fx.counts.add_item(session.id(), product).unwrap();
    fx.counts.record_count(session.id(), item.id, 9).unwrap();

    let canceled = fx.counts.cancel(session.id()).unwrap();
    assert_eq!(canceled.status(), CountStatus::Canceled);

    assert!(matches!(
        fx.counts.add_item(session.id(), ProductId::new()),
        Err(InventoryError::InvalidStateTransition { .. })
    ));
    assert!(matches!(
        fx.counts.record_count(session.id(), item.id, 1),
        Err(InventoryError::InvalidStateTransition { .. })
    ));
    assert!(matches!(
        fx.counts.close(session.id()),
        Err(InventoryError::InvalidStateTransition { .. })
    ));
    assert!(matches!(
        fx.counts.cancel(session.id()),
        Err(InventoryError::InvalidStateTransition { .. })
    ));
    assert_eq!(fx.level(product, location), 2);
}

#[test]
fn unknown_session_is_not_found() {
    let fx = Fixture::new();
    let missing = stockpro_core::SessionId::new();
    assert!(matches!(
        fx.counts.get(missing),
        Err(InventoryError::NotFound { .. })
    ));
    assert!(matches!(
        fx.counts.start_counting(missing),
        Err(InventoryError::NotFound { .. })
    ));
}

#[test]
fn close_is_all_or_nothing_under_contention() {
    let fx = Fixture::with_lock_timeout(Duration::from_millis(50));
    let p1 = fx.product(None, None);
    let p2 = fx.product(None, None);
    let location = fx.location("Main");
    fx.receive(p1, location, 10);
    fx.receive(p2, location, 10);

    let session = fx.counts.create(location, None).unwrap();
    let report = fx.counts.add_all_items_from_location(session.id()).unwrap();
    for item in &report.added {
        fx.counts.record_count(session.id(), item.id, 7).unwrap();
    }

    {
        let mut blocker = fx.store.begin().unwrap();
        blocker
            .lock_stock(&[StockKey::new(p2, location)])
            .unwrap();

        let err = fx.counts.close(session.id()).unwrap_err();
        assert!(err.is_retryable());
    }

    assert_eq!(
        fx.counts.get(session.id()).unwrap().status(),
        CountStatus::Counting
    );
    assert_eq!(fx.level(p1, location), 10);
    assert_eq!(fx.level(p2, location), 10);
    assert_eq!(fx.ledger_count(p1), 1);

    let outcome = fx.counts.close(session.id()).unwrap();
    assert_eq!(outcome.adjustments.len(), 2);
    assert_eq!(fx.level(p1, location), 7);
    assert_eq!(fx.level(p2, location), 7);
}

#[test]
fn close_rolls_back_adjustments_already_posted() {
    let fx = Fixture::new();
    let p1 = fx.product(None, None);
    let p2 = fx.product(None, None);
    let location = fx.location("Main");
    fx.receive(p1, location, 10);

    let session = fx.counts.create(location, None).unwrap();
    let first = fx.counts.add_item(session.id(), p1).unwrap();
    // Item ids are time-ordered; keep p1's adjustment ahead of p2's.
    thread::sleep(Duration::from_millis(2));
    let second = fx.counts.add_item(session.id(), p2).unwrap();
    assert_eq!(second.system_quantity, 0);
    fx.receive(p2, location, i64::MAX);

    fx.counts.record_count(session.id(), first.id, 7).unwrap();
    fx.counts.record_count(session.id(), second.id, 1).unwrap();

    let err = fx.counts.close(session.id()).unwrap_err();
    assert!(matches!(err, InventoryError::InvalidQuantity(_)));

    assert_eq!(
        fx.counts.get(session.id()).unwrap().status(),
        CountStatus::Counting
    );
    assert_eq!(fx.level(p1, location), 10);
    assert_eq!(fx.level(p2, location), i64::MAX);
    assert_eq!(fx.ledger_count(p1), 1);
    assert_eq!(fx.ledger_count(p2), 1);
}

#[test]
fn count_far_above_a_negative_snapshot_is_rejected() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Shop");
    let sale = SaleDeduction::new(product, location, 5, SaleId::new()).allow_negative(true);
    fx.service.deduct_for_sale(&sale).unwrap();

    let session = fx.counts.create(location, None).unwrap();
    let item = fx.counts.add_item(session.id(), product).unwrap();
    assert_eq!(item.system_quantity, -5);

    let err = fx
        .counts
        .record_count(session.id(), item.id, i64::MAX)
        .unwrap_err();
    assert!(matches!(err, InventoryError::InvalidQuantity(_)));
    assert_eq!(
        fx.counts.get(session.id()).unwrap().status(),
        CountStatus::Open
    );

    fx.counts.record_count(session.id(), item.id, 0).unwrap();
    let outcome = fx.counts.close(session.id()).unwrap();
    assert_eq!(outcome.adjustments.len(), 1);
    assert_eq!(outcome.adjustments[0].quantity_change, 5);
    assert_eq!(fx.level(product, location), 0);
}

#[test]
fn locked_row_makes_transfer_busy() {
    let fx = Fixture::with_lock_timeout(Duration::from_millis(50));
    let product = fx.product(None, None);
    let from = fx.location("Warehouse");
    let to = fx.location("Shop");
    fx.receive(product, from, 5);

    let mut blocker = fx.store.begin().unwrap();
    blocker.lock_stock(&[StockKey::new(product, to)]).unwrap();

    let err = fx
        .service
        .transfer(&Transfer::new(product, from, to, 1))
        .unwrap_err();
    assert!(matches!(err, InventoryError::Busy(_)));
    drop(blocker);

    fx.service
        .transfer(&Transfer::new(product, from, to, 1))
        .unwrap();
    assert_eq!(fx.level(product, to), 1);
}

#[test]
fn opposite_transfers_do_not_deadlock() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let a = fx.location("A");
    let b = fx.location("B");
    fx.receive(product, a, 500);
    fx.receive(product, b, 500);

    let handles: Vec<_> = [(a, b), (b, a), (a, b), (b, a)]
        .into_iter()
        .map(|(from, to)| {
            let service = fx.service.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    service
                        .transfer(&Transfer::new(product, from, to, 1))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(fx.level(product, a), 500);
    assert_eq!(fx.level(product, b), 500);
    assert_eq!(fx.ledger_count(product), 2 + 4 * 50 * 2);
    let drift = ProjectionRepair::new(fx.store.clone()).verify_all().unwrap();
    assert!(drift.is_empty());
}

#[test]
fn concurrent_sales_never_oversell() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Shop");
    fx.receive(product, location, 20);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = fx.service.clone();
            thread::spawn(move || {
                let mut sold = 0;
                for _ in 0..10 {
                    let cmd = SaleDeduction::new(product, location, 1, SaleId::new());
                    match service.deduct_for_sale(&cmd) {
                        Ok(_) => sold += 1,
                        Err(InventoryError::InsufficientStock { .. }) => {}
                        Err(other) => panic!("unexpected error: {other:?}"),
                    }
                }
                sold
            })
        })
        .collect();
    let sold: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(sold, 20);
    assert_eq!(fx.level(product, location), 0);
}

#[test]
fn near_expiry_lists_lots_still_in_stock() {
    let fx = Fixture::new();
    let fresh = fx.product(Some(10), None);
    let sold_out = fx.product(Some(10), None);
    let location = fx.location("Cold room");
    let today = date(2025, 6, 1);

    let mut soon = StockIn::new(fresh, location, 4);
    soon.production_date = Some(date(2025, 5, 27));
    fx.service.stock_in(&soon).unwrap();

    let mut later = StockIn::new(fresh, location, 4);
    later.expiry_date = Some(date(2025, 8, 1));
    fx.service.stock_in(&later).unwrap();

    let mut gone = StockIn::new(sold_out, location, 2);
    gone.expiry_date = Some(date(2025, 6, 3));
    fx.service.stock_in(&gone).unwrap();
    fx.service
        .adjust(&Adjustment::new(sold_out, location, -2))
        .unwrap();

    let expiring = fx.reports.near_expiry(today, 30).unwrap();
    assert_eq!(expiring.len(), 1);
    assert_eq!(expiring[0].product_id, fresh);
    assert_eq!(expiring[0].expiry_date, Some(date(2025, 6, 6)));
}

#[test]
fn ledger_listing_filters_and_paginates() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Main");
    for _ in 0..5 {
        fx.receive(product, location, 1);
    }
    fx.service
        .adjust(&Adjustment::new(product, location, 2))
        .unwrap();

    let filter = TransactionFilter {
        product_id: Some(product),
        kind: Some(TransactionKind::StockIn),
        ..TransactionFilter::default()
    };
    let page = fx
        .reports
        .transactions(&filter, Pagination::new(Some(2), Some(0)))
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 2);
    assert!(page.has_more);
    assert!(page.items[0].transaction_date >= page.items[1].transaction_date);

    let inverted = TransactionFilter {
        start_date: Some(date(2025, 2, 1)),
        end_date: Some(date(2025, 1, 1)),
        ..TransactionFilter::default()
    };
    assert!(
        fx.reports
            .transactions(&inverted, Pagination::default())
            .is_err()
    );

    let summary = fx
        .reports
        .stock_summary(Some(location), Pagination::default())
        .unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.items[0].quantity, 7);
}

#[test]
fn repair_restores_projection_from_ledger() {
    let fx = Fixture::new();
    let product = fx.product(None, None);
    let location = fx.location("Main");
    fx.receive(product, location, 10);
    let key = StockKey::new(product, location);

    in_unit_of_work(&fx.store, |uow| {
        let mut row = uow.stock_for_update(key)?.unwrap();
        row.quantity = 7;
        uow.put_stock(&row)?;
        Ok(())
    })
    .unwrap();

    let repair = ProjectionRepair::new(fx.store.clone());
    let drift = repair.verify_all().unwrap();
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].projected, Some(7));
    assert_eq!(drift[0].ledger, 10);

    let dry = repair.rebuild_all(true).unwrap();
    assert_eq!(dry.keys_repaired(), 0);
    assert_eq!(fx.level(product, location), 7);

    let report = repair.rebuild_all(false).unwrap();
    assert_eq!(report.keys_repaired(), 1);
    assert_eq!(fx.level(product, location), 10);
    assert!(repair.verify_all().unwrap().is_empty());
}

#[derive(Debug, Clone)]
enum Op {
    Receive { product: usize, location: usize, quantity: i64 },
    Adjust { product: usize, location: usize, change: i64 },
    Sell { product: usize, location: usize, quantity: i64, allow_negative: bool },
    Move { product: usize, from: usize, quantity: i64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..2usize, 0..2usize, 1..50i64).prop_map(|(product, location, quantity)| Op::Receive {
            product,
            location,
            quantity
        }),
        (0..2usize, 0..2usize, -30..30i64)
            .prop_filter("nonzero change", |(_, _, change)| *change != 0)
            .prop_map(|(product, location, change)| Op::Adjust {
                product,
                location,
                change
            }),
        (0..2usize, 0..2usize, 1..30i64, any::<bool>()).prop_map(
            |(product, location, quantity, allow_negative)| Op::Sell {
                product,
                location,
                quantity,
                allow_negative
            }
        ),
        (0..2usize, 0..2usize, 1..30i64).prop_map(|(product, from, quantity)| Op::Move {
            product,
            from,
            quantity
        }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn projection_always_matches_ledger(ops in prop::collection::vec(op(), 1..40)) {
        let fx = Fixture::new();
        let products = [fx.product(None, None), fx.product(None, None)];
        let locations = [fx.location("L0"), fx.location("L1")];
        let mut net = [0i64; 2];

        for op in ops {
            let total_before = fx.reports.transactions(&TransactionFilter::default(), Pagination::default()).unwrap().total;
            let (product, outcome) = match op {
                Op::Receive { product, location, quantity } => {
                    let res = fx.service.stock_in(&StockIn::new(products[product], locations[location], quantity));
                    (product, res.map(|_| quantity))
                }
                Op::Adjust { product, location, change } => {
                    let res = fx.service.adjust(&Adjustment::new(products[product], locations[location], change));
                    (product, res.map(|_| change))
                }
                Op::Sell { product, location, quantity, allow_negative } => {
                    let cmd = SaleDeduction::new(products[product], locations[location], quantity, SaleId::new())
                        .allow_negative(allow_negative);
                    (product, fx.service.deduct_for_sale(&cmd).map(|_| -quantity))
                }
                Op::Move { product, from, quantity } => {
                    let cmd = Transfer::new(products[product], locations[from], locations[1 - from], quantity);
                    (product, fx.service.transfer(&cmd).map(|_| 0))
                }
            };
            let total_after = fx.reports.transactions(&TransactionFilter::default(), Pagination::default()).unwrap().total;
            match outcome {
                Ok(change) => {
                    net[product] += change;
                    prop_assert!(total_after > total_before);
                }
                Err(err) => {
                    prop_assert!(matches!(err, InventoryError::InsufficientStock { .. }), "unexpected {err:?}");
                    prop_assert_eq!(total_after, total_before);
                }
            }
        }

        let drift = ProjectionRepair::new(fx.store.clone()).verify_all().unwrap();
        prop_assert!(drift.is_empty());
        for (index, product) in products.iter().enumerate() {
            let held: i64 = locations.iter().map(|l| fx.level(*product, *l)).sum();
            prop_assert_eq!(held, net[index]);
        }
    }
}
