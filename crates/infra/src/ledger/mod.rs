//! Append-only movement ledger boundary.
//!
//! One stream per `(tenant, item)`. The ledger is the source of truth for
//! stock: movements are never modified or deleted, appends are atomic (the
//! whole batch or nothing), and optimistic concurrency on the stream
//! version is the sole concurrency-control primitive the system uses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use lotledger_core::{AggregateId, ExpectedVersion, TenantId};
use std::sync::Arc;

pub mod in_memory;

pub use in_memory::InMemoryMovementLedger;

/// Stream/aggregate type identifier carried on published envelopes.
pub const STOCK_STREAM: &str = "stock.item";

/// A movement ready to be appended (no sequence number yet).
///
/// Built from a typed `StockEvent` via [`PendingMovement::from_typed`]; the
/// ledger assigns the sequence number during append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMovement {
    pub entry_id: Uuid,
    pub tenant_id: TenantId,
    pub item_id: AggregateId,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A movement recorded on a stream, with its assigned sequence number.
///
/// Sequence numbers are stream-scoped, start at 1, and never change; they
/// give ordering, optimistic concurrency, and consumer idempotency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedMovement {
    pub entry_id: Uuid,
    pub tenant_id: TenantId,
    pub item_id: AggregateId,

    /// Monotonically increasing position in the item's stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl RecordedMovement {
    /// Convert into a tenant-scoped envelope for publication.
    pub fn to_envelope(&self) -> lotledger_events::EventEnvelope<JsonValue> {
        lotledger_events::EventEnvelope::new(
            self.entry_id,
            self.tenant_id,
            self.item_id,
            STOCK_STREAM,
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Ledger operation error (infrastructure-level, not domain-level).
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Optimistic concurrency check failed; a concurrent movement won.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// Cross-tenant access attempted.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Invalid batch or stream state.
    #[error("invalid append: {0}")]
    InvalidAppend(String),
}

/// Append-only, tenant-scoped movement ledger.
///
/// Implementations must:
/// - enforce tenant isolation on read and write
/// - check optimistic concurrency against the current stream version
/// - assign gapless, monotonically increasing sequence numbers
/// - persist a batch atomically (all movements or none)
pub trait MovementLedger: Send + Sync {
    /// Append movements to one item's stream.
    fn append(
        &self,
        movements: Vec<PendingMovement>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<RecordedMovement>, LedgerError>;

    /// Load the full stream for a tenant + item, in sequence order.
    ///
    /// An empty vector means the item has no movements yet.
    fn load_stream(
        &self,
        tenant_id: TenantId,
        item_id: AggregateId,
    ) -> Result<Vec<RecordedMovement>, LedgerError>;
}

impl<L> MovementLedger for Arc<L>
where
    L: MovementLedger + ?Sized,
{
    fn append(
        &self,
        movements: Vec<PendingMovement>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<RecordedMovement>, LedgerError> {
        (**self).append(movements, expected_version)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        item_id: AggregateId,
    ) -> Result<Vec<RecordedMovement>, LedgerError> {
        (**self).load_stream(tenant_id, item_id)
    }
}

impl PendingMovement {
    /// Build a pending movement from a typed event.
    ///
    /// Keeps infra decoupled from the domain while capturing the event
    /// metadata needed for later deserialization.
    pub fn from_typed<E>(
        tenant_id: TenantId,
        item_id: AggregateId,
        entry_id: Uuid,
        event: &E,
    ) -> Result<Self, LedgerError>
    where
        E: lotledger_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            LedgerError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            entry_id,
            tenant_id,
            item_id,
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
