//! Read model projections fed by committed movement envelopes.

pub mod available_lots;

pub use available_lots::{AvailableLotsError, AvailableLotsProjection, StockOnHand};
