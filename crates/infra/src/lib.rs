//! Infrastructure layer: ledger persistence, read models, the committer.
//!
//! The domain crates stay pure; everything that touches shared mutable
//! state lives here. `ledger` persists tenant-scoped movement streams,
//! `projections` maintains disposable read models fed by the event bus, and
//! `service` is the transactional committer exposed to callers.

pub mod ledger;
pub mod projections;
pub mod read_model;
pub mod service;
