//! Read-side filters and pagination for ledger and projection queries.
//!
//! These are plain data; each store backend translates them into its own
//! query language. Listings are paginated by default.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use stockpro_core::{LocationId, ProductId};
use stockpro_inventory::{CurrentStock, InventoryTransaction, StockCountSession, TransactionKind};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 1000;

/// Pagination parameters for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of rows to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// Slice an already-ordered result set.
    pub fn apply<T>(&self, rows: Vec<T>) -> Page<T> {
        let total = rows.len() as u64;
        let items: Vec<T> = rows
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect();
        Page::new(items, total, *self)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of rows matching the filter (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = u64::from(pagination.offset) + (items.len() as u64) < total;
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }
}

pub type TransactionPage = Page<InventoryTransaction>;
pub type SessionPage = Page<StockCountSession>;
pub type StockPage = Page<CurrentStock>;

/// Filter criteria for the ledger listing.
///
/// Date bounds are calendar days and both inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub product_id: Option<ProductId>,
    pub location_id: Option<LocationId>,
    pub kind: Option<TransactionKind>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &InventoryTransaction) -> bool {
        let day = tx.transaction_date.date_naive();
        self.product_id.is_none_or(|p| p == tx.product_id)
            && self.location_id.is_none_or(|l| l == tx.location_id)
            && self.kind.is_none_or(|k| k == tx.kind)
            && self.start_date.is_none_or(|d| day >= d)
            && self.end_date.is_none_or(|d| day <= d)
    }

    /// Lower timestamp bound (start of `start_date`, UTC).
    pub fn from_instant(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.start_date.map(|d| d.and_time(NaiveTime::MIN).and_utc())
    }

    /// Exclusive upper timestamp bound (start of the day after `end_date`, UTC).
    pub fn until_instant(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.end_date
            .and_then(|d| d.succ_opt())
            .map(|d| d.and_time(NaiveTime::MIN).and_utc())
    }
}

/// Filter criteria for projection rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockFilter {
    pub product_id: Option<ProductId>,
    pub location_id: Option<LocationId>,
    /// Only rows with a balance below zero.
    pub negative_only: bool,
}

impl StockFilter {
    pub fn at_location(location_id: LocationId) -> Self {
        Self {
            location_id: Some(location_id),
            ..Self::default()
        }
    }

    pub fn negative() -> Self {
        Self {
            negative_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, row: &CurrentStock) -> bool {
        self.product_id.is_none_or(|p| p == row.product_id)
            && self.location_id.is_none_or(|l| l == row.location_id)
            && (!self.negative_only || row.quantity < 0)
    }
}
