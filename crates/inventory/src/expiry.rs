//! Expiry date derivation for received lots.

use chrono::{Days, NaiveDate};

use stockpro_core::{InventoryError, InventoryResult};

use crate::master::Product;

/// Outcome of expiry resolution for one received lot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResolvedExpiry {
    /// The expiry date to record on the ledger entry.
    pub expiry_date: Option<NaiveDate>,
    /// What production date + shelf life yields, when both are known.
    pub calculated: Option<NaiveDate>,
}

impl ResolvedExpiry {
    /// `(supplied, calculated)` when an explicitly supplied expiry date differs
    /// from the one the shelf life rule produces.
    pub fn disagreement(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.expiry_date, self.calculated) {
            (Some(recorded), Some(calculated)) if recorded != calculated => {
                Some((recorded, calculated))
            }
            _ => None,
        }
    }
}

/// `production_date + shelf_life_days`, when the product has a shelf life.
pub fn calculate_expiry(
    product: &Product,
    production_date: NaiveDate,
) -> InventoryResult<Option<NaiveDate>> {
    let Some(days) = product.shelf_life_days else {
        return Ok(None);
    };
    production_date
        .checked_add_days(Days::new(u64::from(days)))
        .map(Some)
        .ok_or_else(|| {
            InventoryError::invalid_state(format!(
                "expiry date out of range: {production_date} + {days} days"
            ))
        })
}

/// Decide which expiry date a received lot carries.
///
/// Order of precedence:
/// 1. an explicitly supplied expiry date;
/// 2. production date + the product's shelf life;
/// 3. a product with a shelf life but no dates at all is rejected;
/// 4. otherwise the lot has no expiry.
pub fn resolve_expiry(
    product: &Product,
    production_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
) -> InventoryResult<ResolvedExpiry> {
    if expiry_date.is_some() {
        // Calculated date is informational here; a supplied expiry stands even
        // when the calculation fails.
        let calculated = production_date
            .and_then(|produced| calculate_expiry(product, produced).ok().flatten());
        return Ok(ResolvedExpiry {
            expiry_date,
            calculated,
        });
    }

    let calculated = match production_date {
        Some(produced) => calculate_expiry(product, produced)?,
        None => None,
    };

    if calculated.is_some() {
        return Ok(ResolvedExpiry {
            expiry_date: calculated,
            calculated,
        });
    }

    if product.shelf_life_days.is_some() && production_date.is_none() {
        return Err(InventoryError::MissingExpiryInput {
            product: product.id,
        });
    }

    Ok(ResolvedExpiry {
        expiry_date: None,
        calculated: None,
    })
}
