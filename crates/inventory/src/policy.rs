//! Negative-balance policy threaded through the deducting operators.

use serde::{Deserialize, Serialize};

use stockpro_core::{InventoryError, InventoryResult, ProductId};

use crate::master::Location;

/// Whether an operation may drive a balance below zero.
///
/// User-initiated adjustments and transfers are always `Strict`. Stock count
/// closure reconciles to whatever was physically counted and therefore uses
/// `AllowNegative`; the POS may opt into it with its override toggle.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancePolicy {
    #[default]
    Strict,
    AllowNegative,
}

impl BalancePolicy {
    pub fn from_allow_negative(allow_negative: bool) -> Self {
        if allow_negative {
            BalancePolicy::AllowNegative
        } else {
            BalancePolicy::Strict
        }
    }

    pub fn allows_negative(self) -> bool {
        matches!(self, BalancePolicy::AllowNegative)
    }

    /// Check that withdrawing `requested` units from `on_hand` is permitted.
    pub fn check_withdrawal(
        self,
        on_hand: i64,
        requested: i64,
        location: &Location,
        product: ProductId,
    ) -> InventoryResult<()> {
        if self.allows_negative() || on_hand >= requested {
            return Ok(());
        }
        Err(InventoryError::InsufficientStock {
            current: on_hand,
            requested,
            location: location.id,
            location_name: location.name.clone(),
            product,
        })
    }
}
