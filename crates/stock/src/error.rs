//! Stock domain error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lot::LotId;

/// Per-lot deficit discovered when a plan is re-validated at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotShortfall {
    pub lot_id: LotId,
    /// Quantity the plan wanted to draw from this lot.
    pub requested: u64,
    /// Quantity the lot actually had left.
    pub available: u64,
}

impl LotShortfall {
    pub fn shortfall(&self) -> u64 {
        self.requested.saturating_sub(self.available)
    }
}

/// Stock domain error.
///
/// The split matters to callers: `Validation` and `Shortfall` are planning
/// failures that never touch persisted state, `InsufficientStock` means a
/// concurrent movement won the race (replan and retry), and `DataIntegrity`
/// means the ledger itself is corrupt (fatal, never retried).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// Malformed input (missing recipient/purpose, zero quantity, lot not
    /// belonging to the item, ...). Caught before any append.
    #[error("validation failed: {0}")]
    Validation(String),

    /// FIFO planning could not cover the request from currently visible
    /// lots. Carries the unsatisfiable remainder.
    #[error("requested {requested} but only {available} available (short {shortfall})")]
    Shortfall {
        requested: u64,
        available: u64,
        shortfall: u64,
    },

    /// Live lot state no longer covers the plan. Raised only inside the
    /// atomic commit; nothing has been written.
    #[error("insufficient stock in {} lot(s)", shortfalls.len())]
    InsufficientStock { shortfalls: Vec<LotShortfall> },

    /// Ledger replay produced an impossible state (a lot driven negative).
    #[error("ledger integrity violated: {0}")]
    DataIntegrity(String),
}

impl StockError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
