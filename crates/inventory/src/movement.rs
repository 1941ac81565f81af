//! Commands accepted by the movement operators.
//!
//! Each command validates its own shape (positive quantities, distinct
//! locations). Checks that need stored state (existence, balances) happen in
//! the operators while the affected rows are locked.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockpro_core::{InventoryError, InventoryResult, LocationId, ProductId, SaleId};

use crate::policy::BalancePolicy;
use crate::stock::StockKey;
use crate::transaction::join_notes;

const DEFAULT_ADJUSTMENT_REASON: &str = "manual adjustment";

fn require_positive(quantity: i64, what: &str) -> InventoryResult<()> {
    if quantity <= 0 {
        return Err(InventoryError::invalid_quantity(format!(
            "{what} quantity must be greater than zero, got {quantity}"
        )));
    }
    Ok(())
}

/// Receive one lot of a product into a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockIn {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub cost_per_unit: Option<u64>,
    pub production_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl StockIn {
    pub fn new(product_id: ProductId, location_id: LocationId, quantity: i64) -> Self {
        Self {
            product_id,
            location_id,
            quantity,
            cost_per_unit: None,
            production_date: None,
            expiry_date: None,
            notes: None,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.location_id)
    }

    pub fn validate(&self) -> InventoryResult<()> {
        require_positive(self.quantity, "stock-in")
    }
}

/// One line of a receiving batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub cost_per_unit: Option<u64>,
    pub production_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl BatchLine {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
            cost_per_unit: None,
            production_date: None,
            expiry_date: None,
            notes: None,
        }
    }
}

/// Receive several lots into one location as a single receiving event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStockIn {
    pub location_id: LocationId,
    pub lines: Vec<BatchLine>,
    /// Shared note appended to every line's own notes.
    pub batch_notes: Option<String>,
}

impl BatchStockIn {
    pub fn validate(&self) -> InventoryResult<()> {
        if self.lines.is_empty() {
            return Err(InventoryError::invalid_quantity(
                "a stock-in batch needs at least one line",
            ));
        }
        Ok(())
    }

    /// Expand the batch into per-line stock-in commands, in input order.
    pub fn to_stock_ins(&self) -> Vec<StockIn> {
        self.lines
            .iter()
            .map(|line| StockIn {
                product_id: line.product_id,
                location_id: self.location_id,
                quantity: line.quantity,
                cost_per_unit: line.cost_per_unit,
                production_date: line.production_date,
                expiry_date: line.expiry_date,
                notes: join_notes([line.notes.as_deref(), self.batch_notes.as_deref()]),
            })
            .collect()
    }
}

/// Correct a balance by a signed amount.
///
/// The balance policy is not part of the command: callers get `Strict`, and
/// only stock count closure passes `AllowNegative` to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity_change: i64,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl Adjustment {
    pub fn new(product_id: ProductId, location_id: LocationId, quantity_change: i64) -> Self {
        Self {
            product_id,
            location_id,
            quantity_change,
            reason: None,
            notes: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.location_id)
    }

    pub fn validate(&self) -> InventoryResult<()> {
        if self.quantity_change == 0 {
            return Err(InventoryError::invalid_quantity(
                "adjustment quantity change must not be zero",
            ));
        }
        Ok(())
    }

    /// Ledger notes: `reason: <reason>` followed by `; notes: <notes>` when present.
    pub fn ledger_notes(&self) -> String {
        let reason = self
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_ADJUSTMENT_REASON);
        match self.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(notes) => format!("reason: {reason}; notes: {notes}"),
            None => format!("reason: {reason}"),
        }
    }
}

/// Move stock of one product between two locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub product_id: ProductId,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub quantity: i64,
    pub notes: Option<String>,
}

impl Transfer {
    pub fn new(product_id: ProductId, from: LocationId, to: LocationId, quantity: i64) -> Self {
        Self {
            product_id,
            from_location_id: from,
            to_location_id: to,
            quantity,
            notes: None,
        }
    }

    pub fn source(&self) -> StockKey {
        StockKey::new(self.product_id, self.from_location_id)
    }

    pub fn destination(&self) -> StockKey {
        StockKey::new(self.product_id, self.to_location_id)
    }

    pub fn validate(&self) -> InventoryResult<()> {
        if self.from_location_id == self.to_location_id {
            return Err(InventoryError::SameLocationTransfer(self.from_location_id));
        }
        require_positive(self.quantity, "transfer")
    }
}

/// Deduct sold units, on behalf of the sales component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDeduction {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub sale_id: SaleId,
    /// `AllowNegative` when the POS override toggle is on.
    pub policy: BalancePolicy,
    pub cost_per_unit: Option<u64>,
    pub notes: Option<String>,
}

impl SaleDeduction {
    pub fn new(product_id: ProductId, location_id: LocationId, quantity: i64, sale_id: SaleId) -> Self {
        Self {
            product_id,
            location_id,
            quantity,
            sale_id,
            policy: BalancePolicy::Strict,
            cost_per_unit: None,
            notes: None,
        }
    }

    pub fn allow_negative(mut self, allow: bool) -> Self {
        self.policy = BalancePolicy::from_allow_negative(allow);
        self
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.location_id)
    }

    pub fn validate(&self) -> InventoryResult<()> {
        require_positive(self.quantity, "sale")
    }
}
