//! Ledger replay: rebuilding lot state from movement history.
//!
//! Replaying an item's full history from the beginning must reproduce its
//! lots and their remaining quantities exactly. Movements committed through
//! the aggregate always carry explicit per-lot draws; issues without draws
//! (legacy data normalized at this boundary) fall back to oldest-lot-first
//! consumption.
//!
//! Replay never lets a lot go negative: an impossible movement clamps the
//! lot at zero and is reported as a fault, which callers treat as ledger
//! corruption (fatal), never as a value to silently wrap.

use crate::lot::{Lot, LotId};
use crate::movement::{StockEvent, StockIssued};

/// Why a replay could not reproduce a consistent lot state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayFault {
    /// An issue referenced a lot the history never created.
    MissingLot { lot_id: LotId },
    /// A recorded draw exceeded what its lot had left.
    Overdrawn {
        lot_id: LotId,
        drawn: u64,
        available: u64,
    },
    /// FIFO fallback ran out of open lots before covering an issue.
    Uncovered { quantity: u64, uncovered: u64 },
}

impl core::fmt::Display for ReplayFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ReplayFault::MissingLot { lot_id } => {
                write!(f, "issue references unknown lot {lot_id}")
            }
            ReplayFault::Overdrawn {
                lot_id,
                drawn,
                available,
            } => write!(
                f,
                "lot {lot_id} overdrawn in history (drew {drawn}, had {available})"
            ),
            ReplayFault::Uncovered {
                quantity,
                uncovered,
            } => write!(
                f,
                "issue of {quantity} not covered by open lots ({uncovered} uncovered)"
            ),
        }
    }
}

/// Apply one movement to a lot set, in ledger order.
///
/// On a fault the affected lot is clamped at zero and the fault returned;
/// the lot set must not be trusted afterwards.
pub fn apply_movement(lots: &mut Vec<Lot>, event: &StockEvent) -> Result<(), ReplayFault> {
    match event {
        StockEvent::Received(e) => {
            lots.push(Lot::received(
                e.lot_id,
                e.quantity,
                e.unit_cost,
                e.occurred_at,
                e.source.clone(),
            ));
            Ok(())
        }
        StockEvent::Issued(e) if e.draws.is_empty() => apply_fifo_fallback(lots, e),
        StockEvent::Issued(e) => apply_recorded_draws(lots, e),
    }
}

fn apply_recorded_draws(lots: &mut [Lot], issued: &StockIssued) -> Result<(), ReplayFault> {
    for draw in &issued.draws {
        let lot = lots
            .iter_mut()
            .find(|l| l.lot_id == draw.lot_id)
            .ok_or(ReplayFault::MissingLot { lot_id: draw.lot_id })?;

        match lot.remaining_quantity.checked_sub(draw.quantity) {
            Some(left) => lot.remaining_quantity = left,
            None => {
                let available = lot.remaining_quantity;
                lot.remaining_quantity = 0;
                return Err(ReplayFault::Overdrawn {
                    lot_id: draw.lot_id,
                    drawn: draw.quantity,
                    available,
                });
            }
        }
    }
    Ok(())
}

/// Legacy issues carry no draw detail: consume oldest open lots first.
fn apply_fifo_fallback(lots: &mut [Lot], issued: &StockIssued) -> Result<(), ReplayFault> {
    let mut order: Vec<usize> = (0..lots.len())
        .filter(|&i| !lots[i].is_exhausted())
        .collect();
    order.sort_by_key(|&i| lots[i].received_at);

    let mut still = issued.quantity;
    for i in order {
        if still == 0 {
            break;
        }
        let take = lots[i].remaining_quantity.min(still);
        lots[i].remaining_quantity -= take;
        still -= take;
    }

    if still > 0 {
        return Err(ReplayFault::Uncovered {
            quantity: issued.quantity,
            uncovered: still,
        });
    }
    Ok(())
}
