//! `lotledger-stock` — FIFO lot ledger domain.
//!
//! Stock for an item is held in **lots** (receipt batches). Every change is a
//! movement on an append-only ledger; lot state is rebuilt by replaying that
//! ledger, so the history is the source of truth and any stored lot view is
//! a disposable read model.
//!
//! The crate is pure domain logic: replay (`replay`), batch selection
//! planning (`plan`), and the `ItemStock` aggregate whose `handle` is the
//! commit-time gatekeeper. Persistence and atomicity live in
//! `lotledger-infra`.

pub mod error;
pub mod lot;
pub mod movement;
pub mod plan;
pub mod replay;

pub use error::{LotShortfall, StockError};
pub use lot::{AvailableStock, Lot, LotId};
pub use movement::{
    Draw, IssueStock, ItemId, ItemStock, MovementId, ReceiveStock, StockCommand, StockEvent,
    StockIssued, StockReceived,
};
pub use plan::{DrawPlan, PlannedDraw, plan_fifo, plan_manual};
pub use replay::ReplayFault;
