//! `lotledger-events` — event mechanics shared by domain and infrastructure.
//!
//! Defines what an event **is** (the `Event` trait), how it travels
//! (`EventEnvelope`), and how it is distributed (`EventBus`). Storage lives
//! in `lotledger-infra`; this crate makes no persistence assumptions.

pub mod bus;
pub mod envelope;
pub mod event;

pub use bus::{EventBus, InMemoryEventBus, Subscription};
pub use envelope::{EventEnvelope, TenantScoped};
pub use event::Event;
