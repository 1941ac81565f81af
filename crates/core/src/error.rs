//! Error model shared by every inventory operation.

use thiserror::Error;

use crate::id::{LocationId, ProductId, SessionId};

/// Result type used across the inventory engine.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Kind of record a `NotFound` error refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Entity {
    Product,
    Location,
    Session,
    Item,
}

impl core::fmt::Display for Entity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            Entity::Product => "product",
            Entity::Location => "location",
            Entity::Session => "stock count session",
            Entity::Item => "stock count item",
        };
        f.write_str(label)
    }
}

/// Typed failure of an inventory operation.
///
/// Each variant carries the context a presentation layer needs to build a
/// user-facing message; `kind()` gives a stable code for mapping to statuses.
/// Operators never retry on their own; `Busy` is the only retryable kind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    /// Zero or negative quantity where a positive one is required (and friends).
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error(
        "insufficient stock of product {product} at '{location_name}': on hand {current}, requested {requested}"
    )]
    InsufficientStock {
        current: i64,
        requested: i64,
        location: LocationId,
        location_name: String,
        product: ProductId,
    },

    /// The product has a shelf life but neither a production nor an expiry date was given.
    #[error("product {product} has a shelf life; a production date or expiry date is required")]
    MissingExpiryInput { product: ProductId },

    #[error("source and destination location are the same ({0})")]
    SameLocationTransfer(LocationId),

    #[error("product {product} is already part of stock count session {session}")]
    DuplicateItem { session: SessionId, product: ProductId },

    #[error("cannot {action} a stock count session in status {status}")]
    InvalidStateTransition { status: String, action: &'static str },

    #[error("stock count is incomplete; uncounted products: {}", join_ids(missing))]
    IncompleteCount { missing: Vec<ProductId> },

    /// A precondition on persisted state does not hold.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Lock wait timed out or a concurrent writer won a race; safe to retry.
    #[error("resource busy: {0}")]
    Busy(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

fn join_ids(ids: &[ProductId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl InventoryError {
    pub fn not_found(entity: Entity, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_transition(status: impl core::fmt::Display, action: &'static str) -> Self {
        Self::InvalidStateTransition {
            status: status.to_string(),
            action,
        }
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Stable snake_case code for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            InventoryError::NotFound { .. } => "not_found",
            InventoryError::InvalidQuantity(_) => "invalid_quantity",
            InventoryError::InsufficientStock { .. } => "insufficient_stock",
            InventoryError::MissingExpiryInput { .. } => "missing_expiry_input",
            InventoryError::SameLocationTransfer(_) => "same_location_transfer",
            InventoryError::DuplicateItem { .. } => "duplicate_item",
            InventoryError::InvalidStateTransition { .. } => "invalid_state_transition",
            InventoryError::IncompleteCount { .. } => "incomplete_count",
            InventoryError::InvalidState(_) => "invalid_state",
            InventoryError::Busy(_) => "busy",
            InventoryError::Storage(_) => "storage",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, InventoryError::Busy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_count_lists_missing_products() {
        let a = ProductId::new();
        let b = ProductId::new();
        let err = InventoryError::IncompleteCount {
            missing: vec![a, b],
        };
        let msg = err.to_string();
        assert!(msg.contains(&a.to_string()));
        assert!(msg.contains(&b.to_string()));
        assert_eq!(err.kind(), "incomplete_count");
    }

    #[test]
    fn only_busy_is_retryable() {
        assert!(InventoryError::busy("lock timeout").is_retryable());
        assert!(!InventoryError::storage("disk").is_retryable());
        assert!(!InventoryError::invalid_quantity("zero").is_retryable());
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = InventoryError::not_found(Entity::Session, "42");
        assert_eq!(err.to_string(), "stock count session not found: 42");
    }
}
