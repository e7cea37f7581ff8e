//! Batch selection planning: turning a requested issue quantity into
//! concrete per-lot draws.
//!
//! Planning is a pure read-compute step over a snapshot of open lots. The
//! resulting `DrawPlan` is advisory: quantities are read at *plan* time, and
//! the aggregate re-validates every draw against live state at *commit*
//! time. Abandoning a plan has no side effects.

use serde::{Deserialize, Serialize};

use crate::error::StockError;
use crate::lot::{AvailableStock, LotId};

/// One planned draw against a lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedDraw {
    pub lot_id: LotId,
    pub quantity: u64,
    /// Unit cost read from the lot at plan time.
    pub unit_cost: u64,
}

/// An ordered set of per-lot draws covering one outbound movement.
///
/// Only the planners construct this, so a plan in hand is internally
/// consistent: non-empty, positive per-lot quantities, totals that match the
/// draws. Consistency against *live* lot state is a separate question,
/// answered at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawPlan {
    draws: Vec<PlannedDraw>,
    total_quantity: u64,
    total_value: u64,
}

impl DrawPlan {
    fn from_draws(draws: Vec<PlannedDraw>) -> Self {
        let total_quantity = draws.iter().map(|d| d.quantity).sum();
        let total_value = draws
            .iter()
            .map(|d| d.quantity.saturating_mul(d.unit_cost))
            .fold(0u64, u64::saturating_add);
        Self {
            draws,
            total_quantity,
            total_value,
        }
    }

    pub fn draws(&self) -> &[PlannedDraw] {
        &self.draws
    }

    pub fn total_quantity(&self) -> u64 {
        self.total_quantity
    }

    /// Σ quantity × unit_cost, in the smallest currency unit.
    pub fn total_value(&self) -> u64 {
        self.total_value
    }

    /// Average cost per drawn unit, rounded down. Zero for an empty plan.
    pub fn average_unit_cost(&self) -> u64 {
        if self.total_quantity == 0 {
            0
        } else {
            self.total_value / self.total_quantity
        }
    }
}

/// Auto mode: walk open lots oldest-first, draining each before the next.
///
/// Infeasible requests return `Shortfall` with the unsatisfiable remainder
/// rather than a partial plan.
pub fn plan_fifo(available: &AvailableStock, requested: u64) -> Result<DrawPlan, StockError> {
    if requested == 0 {
        return Err(StockError::validation("requested quantity must be positive"));
    }

    let mut draws = Vec::new();
    let mut still = requested;

    for lot in &available.lots {
        if still == 0 {
            break;
        }
        let take = lot.remaining_quantity.min(still);
        if take == 0 {
            continue;
        }
        draws.push(PlannedDraw {
            lot_id: lot.lot_id,
            quantity: take,
            unit_cost: lot.unit_cost,
        });
        still -= take;
    }

    if still > 0 {
        return Err(StockError::Shortfall {
            requested,
            available: available.total_available,
            shortfall: still,
        });
    }

    Ok(DrawPlan::from_draws(draws))
}

/// Manual mode: caller names the lots and per-lot quantities.
///
/// Every override must reference an open lot of this item and fit within
/// its remaining quantity; the movement total is reconciled from the sum of
/// the overrides. Zero-quantity overrides are dropped; a plan that draws
/// nothing overall is rejected. Draws come out in FIFO order regardless of
/// the order the caller listed them.
pub fn plan_manual(
    available: &AvailableStock,
    overrides: &[(LotId, u64)],
) -> Result<DrawPlan, StockError> {
    let mut wanted = std::collections::HashMap::with_capacity(overrides.len());
    for (lot_id, quantity) in overrides {
        if wanted.insert(*lot_id, *quantity).is_some() {
            return Err(StockError::Validation(format!(
                "lot {lot_id} listed more than once"
            )));
        }
    }

    let mut draws = Vec::new();
    for lot in &available.lots {
        let Some(quantity) = wanted.remove(&lot.lot_id) else {
            continue;
        };
        if quantity == 0 {
            continue;
        }
        if quantity > lot.remaining_quantity {
            return Err(StockError::Validation(format!(
                "lot {} holds {} but {} was requested",
                lot.lot_id, lot.remaining_quantity, quantity
            )));
        }
        draws.push(PlannedDraw {
            lot_id: lot.lot_id,
            quantity,
            unit_cost: lot.unit_cost,
        });
    }

    if let Some(lot_id) = wanted.keys().next() {
        return Err(StockError::Validation(format!(
            "lot {lot_id} does not belong to this item or is exhausted"
        )));
    }

    if draws.is_empty() {
        return Err(StockError::validation("plan must draw a positive quantity"));
    }

    Ok(DrawPlan::from_draws(draws))
}
