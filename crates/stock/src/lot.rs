use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a receipt lot.
///
/// Minted once when the lot is received; every later draw references it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotId(Uuid);

impl LotId {
    /// New time-ordered identifier. Prefer explicit IDs in tests.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LotId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for LotId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One receipt batch and what is left of it.
///
/// Born from exactly one IN movement at full quantity; depleted only by OUT
/// movements that reference it. `remaining_quantity` never exceeds
/// `original_quantity` and never goes below zero. An exhausted lot
/// (`remaining_quantity == 0`) is excluded from selection but kept as the
/// audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub lot_id: LotId,
    pub original_quantity: u64,
    pub remaining_quantity: u64,
    /// Price per unit at receipt, in the smallest currency unit. Fixed.
    pub unit_cost: u64,
    /// Receipt time; defines FIFO order.
    pub received_at: DateTime<Utc>,
    /// Supplier/reference, informational only.
    pub source: String,
}

impl Lot {
    /// Seed a lot from a receipt: remaining starts at the full quantity.
    pub fn received(
        lot_id: LotId,
        quantity: u64,
        unit_cost: u64,
        received_at: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            lot_id,
            original_quantity: quantity,
            remaining_quantity: quantity,
            unit_cost,
            received_at,
            source: source.into(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_quantity == 0
    }
}

/// Open lots for an item, oldest received first, plus the total they cover.
///
/// The read model handed to planners and displays. Derived, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableStock {
    pub lots: Vec<Lot>,
    pub total_available: u64,
}

impl AvailableStock {
    /// Project the open-lot view out of a full lot set (exhausted included).
    pub fn from_lots(all: &[Lot]) -> Self {
        let mut lots: Vec<Lot> = all.iter().filter(|l| !l.is_exhausted()).cloned().collect();
        lots.sort_by_key(|l| l.received_at);
        let total_available = lots.iter().map(|l| l.remaining_quantity).sum();
        Self {
            lots,
            total_available,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }
}
