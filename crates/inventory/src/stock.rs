//! Current stock projection row and the pure balance arithmetic behind it.

use core::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpro_core::{InventoryError, InventoryResult, LocationId, ProductId};

use crate::policy::BalancePolicy;

/// Key of a projection row: one balance per (product, location).
///
/// Ordering is by location first, then product. Multi-row operations lock
/// rows in this order so opposite-direction transfers cannot deadlock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub location_id: LocationId,
}

impl StockKey {
    pub fn new(product_id: ProductId, location_id: LocationId) -> Self {
        Self {
            product_id,
            location_id,
        }
    }
}

impl Ord for StockKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.location_id
            .cmp(&other.location_id)
            .then_with(|| self.product_id.cmp(&other.product_id))
    }
}

impl PartialOrd for StockKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.location_id)
    }
}

/// Cached balance for one (product, location).
///
/// Always equal to the sum of `quantity_change` over the ledger entries with
/// the same key. May be negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentStock {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub last_updated: DateTime<Utc>,
}

impl CurrentStock {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.location_id)
    }
}

/// Balance of an optional row; an absent row counts as zero.
pub fn on_hand(row: Option<&CurrentStock>) -> i64 {
    row.map_or(0, |r| r.quantity)
}

/// Compute the row that results from adding `delta` to `existing`.
///
/// An absent row is created lazily, but a negative first movement is only
/// accepted when `policy` allows negative balances.
pub fn next_balance(
    existing: Option<&CurrentStock>,
    key: StockKey,
    delta: i64,
    policy: BalancePolicy,
    now: DateTime<Utc>,
) -> InventoryResult<CurrentStock> {
    let current = match existing {
        Some(row) => row.quantity,
        None if delta < 0 && !policy.allows_negative() => {
            return Err(InventoryError::invalid_state(format!(
                "no stock record for {key}; cannot apply {delta}"
            )));
        }
        None => 0,
    };

    let quantity = current.checked_add(delta).ok_or_else(|| {
        InventoryError::invalid_quantity(format!("balance overflow: {current} + {delta}"))
    })?;

    Ok(CurrentStock {
        product_id: key.product_id,
        location_id: key.location_id,
        quantity,
        last_updated: now,
    })
}
