//! Reference data owned by the external product and location masters.
//!
//! The engine only reads these records; creating or editing them is someone
//! else's job. `MasterData` is the port the operators consume.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use stockpro_core::{Entity, InventoryError, InventoryResult, LocationId, ProductId};

/// Product as seen by the inventory engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub barcode: Option<String>,
    pub name: String,
    /// Days a lot stays sellable after production. `None` means the product does not expire.
    pub shelf_life_days: Option<u32>,
    /// Standard cost in the smallest currency unit (e.g., cents).
    pub standard_cost: Option<u64>,
}

/// Storage location as seen by the inventory engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
}

/// Read access to the product and location masters.
pub trait MasterData: Send + Sync {
    fn product(&self, id: ProductId) -> InventoryResult<Option<Product>>;

    fn location(&self, id: LocationId) -> InventoryResult<Option<Location>>;

    /// Like `product`, but a missing product is an error.
    fn require_product(&self, id: ProductId) -> InventoryResult<Product> {
        self.product(id)?
            .ok_or_else(|| InventoryError::not_found(Entity::Product, id))
    }

    /// Like `location`, but a missing location is an error.
    fn require_location(&self, id: LocationId) -> InventoryResult<Location> {
        self.location(id)?
            .ok_or_else(|| InventoryError::not_found(Entity::Location, id))
    }
}

impl<M> MasterData for Arc<M>
where
    M: MasterData + ?Sized,
{
    fn product(&self, id: ProductId) -> InventoryResult<Option<Product>> {
        (**self).product(id)
    }

    fn location(&self, id: LocationId) -> InventoryResult<Option<Location>> {
        (**self).location(id)
    }
}
