//! Immutable ledger entries.

use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockpro_core::{InventoryError, InventoryResult, LocationId, ProductId, TransactionId};

use crate::stock::StockKey;

/// What caused a stock movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    StockIn,
    Sale,
    AdjustmentAdd,
    AdjustmentSub,
    TransferOut,
    TransferIn,
    /// Opening balance imported when a location goes live.
    Initial,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 7] = [
        TransactionKind::StockIn,
        TransactionKind::Sale,
        TransactionKind::AdjustmentAdd,
        TransactionKind::AdjustmentSub,
        TransactionKind::TransferOut,
        TransactionKind::TransferIn,
        TransactionKind::Initial,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::StockIn => "STOCK_IN",
            TransactionKind::Sale => "SALE",
            TransactionKind::AdjustmentAdd => "ADJUSTMENT_ADD",
            TransactionKind::AdjustmentSub => "ADJUSTMENT_SUB",
            TransactionKind::TransferOut => "TRANSFER_OUT",
            TransactionKind::TransferIn => "TRANSFER_IN",
            TransactionKind::Initial => "INITIAL",
        }
    }

    /// The adjustment kind matching the sign of `quantity_change`.
    pub fn adjustment_for(quantity_change: i64) -> Self {
        if quantity_change < 0 {
            TransactionKind::AdjustmentSub
        } else {
            TransactionKind::AdjustmentAdd
        }
    }

    fn sign_ok(self, quantity_change: i64) -> bool {
        match self {
            TransactionKind::StockIn | TransactionKind::AdjustmentAdd | TransactionKind::TransferIn => {
                quantity_change > 0
            }
            TransactionKind::Sale | TransactionKind::AdjustmentSub | TransactionKind::TransferOut => {
                quantity_change < 0
            }
            TransactionKind::Initial => quantity_change != 0,
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| InventoryError::invalid_state(format!("unknown transaction kind: {s}")))
    }
}

/// One movement in the stock ledger. Never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity_change: i64,
    pub cost_per_unit: Option<u64>,
    pub production_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    /// Other leg of a transfer, or the sale that caused a deduction.
    pub related_transaction_id: Option<Uuid>,
    pub notes: Option<String>,
    pub transaction_date: DateTime<Utc>,
}

impl InventoryTransaction {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.location_id)
    }
}

/// A ledger entry that has not been appended yet.
///
/// Id and timestamp are assigned by the store at append time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity_change: i64,
    pub cost_per_unit: Option<u64>,
    pub production_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub related_transaction_id: Option<Uuid>,
    pub notes: Option<String>,
}

impl NewTransaction {
    pub fn new(kind: TransactionKind, key: StockKey, quantity_change: i64) -> Self {
        Self {
            kind,
            product_id: key.product_id,
            location_id: key.location_id,
            quantity_change,
            cost_per_unit: None,
            production_date: None,
            expiry_date: None,
            related_transaction_id: None,
            notes: None,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.location_id)
    }

    pub fn with_cost(mut self, cost_per_unit: Option<u64>) -> Self {
        self.cost_per_unit = cost_per_unit;
        self
    }

    pub fn with_dates(mut self, production: Option<NaiveDate>, expiry: Option<NaiveDate>) -> Self {
        self.production_date = production;
        self.expiry_date = expiry;
        self
    }

    pub fn related_to(mut self, related: impl Into<Uuid>) -> Self {
        self.related_transaction_id = Some(related.into());
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes.filter(|n| !n.trim().is_empty());
        self
    }

    /// The quantity must be nonzero and its sign must match the kind.
    pub fn validate(&self) -> InventoryResult<()> {
        if self.quantity_change == 0 {
            return Err(InventoryError::invalid_quantity(
                "ledger entries must move a nonzero quantity",
            ));
        }
        if !self.kind.sign_ok(self.quantity_change) {
            return Err(InventoryError::invalid_quantity(format!(
                "{} entry cannot carry quantity change {}",
                self.kind, self.quantity_change
            )));
        }
        Ok(())
    }

    /// Seal the draft into a ledger entry.
    pub fn into_entry(
        self,
        id: TransactionId,
        transaction_date: DateTime<Utc>,
    ) -> InventoryResult<InventoryTransaction> {
        self.validate()?;
        Ok(InventoryTransaction {
            id,
            kind: self.kind,
            product_id: self.product_id,
            location_id: self.location_id,
            quantity_change: self.quantity_change,
            cost_per_unit: self.cost_per_unit,
            production_date: self.production_date,
            expiry_date: self.expiry_date,
            related_transaction_id: self.related_transaction_id,
            notes: self.notes,
            transaction_date,
        })
    }
}

/// Join optional note fragments with `"; "`, dropping empty ones.
pub fn join_notes<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    let joined = parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    (!joined.is_empty()).then_some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), LocationId::new())
    }

    #[test]
    fn kind_round_trips_through_its_label() {
        for kind in TransactionKind::ALL {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
        assert!("RETURN".parse::<TransactionKind>().is_err());
    }

    #[test]
    fn kind_serializes_as_upper_snake_case() {
        let json = serde_json::to_string(&TransactionKind::TransferOut).unwrap();
        assert_eq!(json, "\"TRANSFER_OUT\"");
    }

    #[test]
    fn sign_must_match_kind() {
        assert!(NewTransaction::new(TransactionKind::StockIn, key(), 5).validate().is_ok());
        assert!(NewTransaction::new(TransactionKind::StockIn, key(), -5).validate().is_err());
        assert!(NewTransaction::new(TransactionKind::Sale, key(), 2).validate().is_err());
        assert!(NewTransaction::new(TransactionKind::Initial, key(), -1).validate().is_ok());
        assert!(NewTransaction::new(TransactionKind::AdjustmentAdd, key(), 0).validate().is_err());
    }

    #[test]
    fn adjustment_kind_follows_sign() {
        assert_eq!(TransactionKind::adjustment_for(3), TransactionKind::AdjustmentAdd);
        assert_eq!(TransactionKind::adjustment_for(-3), TransactionKind::AdjustmentSub);
    }

    #[test]
    fn sealing_keeps_every_field() {
        let k = key();
        let sale = Uuid::now_v7();
        let entry = NewTransaction::new(TransactionKind::Sale, k, -2)
            .with_cost(Some(350))
            .related_to(sale)
            .with_notes(Some("till 3".to_string()))
            .into_entry(TransactionId::new(), Utc::now())
            .unwrap();
        assert_eq!(entry.key(), k);
        assert_eq!(entry.related_transaction_id, Some(sale));
        assert_eq!(entry.cost_per_unit, Some(350));
        assert_eq!(entry.notes.as_deref(), Some("till 3"));
    }

    #[test]
    fn blank_notes_are_dropped() {
        let draft = NewTransaction::new(TransactionKind::StockIn, key(), 1)
            .with_notes(Some("   ".to_string()));
        assert_eq!(draft.notes, None);
        assert_eq!(join_notes([Some("a"), None, Some(" "), Some("b")]).as_deref(), Some("a; b"));
        assert_eq!(join_notes([None, Some("")]), None);
    }
}
