//! Logging setup shared by every binary.

/// Tracing subscriber initialization (filters, output format).
pub mod tracing;

pub use tracing::{init, init_with};
