//! Stock movement service: planning reads, transactional commits.
//!
//! This is the boundary callers use. Planning (`available_lots`,
//! `plan_fifo`, `plan_manual`) is a pure read-compute step over the
//! authoritative replayed state and never writes. Committing runs the full
//! pipeline per movement:
//!
//! ```text
//! load stream → rehydrate ItemStock → handle command → append (optimistic)
//!                                                     → publish envelopes
//! ```
//!
//! The `handle` step re-validates every planned draw against live lot state
//! *inside* the unit that appends, so a commit either lands whole or leaves
//! nothing behind. A lost optimistic-concurrency race is retried a bounded
//! number of times against freshly loaded state; a genuine deficit
//! (`InsufficientStock`) is surfaced immediately, since replanning is the
//! caller's decision.

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use lotledger_core::{Aggregate, AggregateId, AggregateRoot, ExpectedVersion, TenantId, UserId};
use lotledger_events::{Event, EventBus, EventEnvelope};
use lotledger_stock::{
    AvailableStock, DrawPlan, IssueStock, ItemId, ItemStock, LotId, MovementId, ReceiveStock,
    StockCommand, StockError, StockEvent, StockIssued, StockReceived, plan_fifo, plan_manual,
};

use crate::ledger::{LedgerError, MovementLedger, PendingMovement, RecordedMovement};

/// How many times a commit is retried after losing an optimistic race.
pub const DEFAULT_COMMIT_ATTEMPTS: u32 = 3;

/// Service-level error: the domain taxonomy plus infrastructure failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Domain failure (validation, shortfall, insufficiency, integrity).
    #[error(transparent)]
    Stock(#[from] StockError),

    /// Ledger failure other than a retryable concurrency conflict.
    #[error("ledger: {0}")]
    Ledger(LedgerError),

    /// Historical payload could not be deserialized during rehydration.
    #[error("movement deserialization failed: {0}")]
    Deserialize(String),

    /// Every commit attempt lost the optimistic race.
    #[error("commit conflicted after {attempts} attempt(s)")]
    ConflictExhausted { attempts: u32 },

    /// Publication failed after a successful append. The movement is
    /// durable; republishing is safe.
    #[error("event publication failed: {0}")]
    Publish(String),
}

/// Transactional movement committer + planning facade.
///
/// Generic over the ledger and the bus so tests run fully in memory and a
/// durable backend can be swapped in behind the same traits.
#[derive(Debug)]
pub struct StockService<L, B> {
    ledger: L,
    bus: B,
    commit_attempts: u32,
}

impl<L, B> StockService<L, B> {
    pub fn new(ledger: L, bus: B) -> Self {
        Self {
            ledger,
            bus,
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }

    /// Override the bounded retry budget for lost optimistic races.
    pub fn with_commit_attempts(mut self, attempts: u32) -> Self {
        self.commit_attempts = attempts.max(1);
        self
    }
}

impl<L, B> StockService<L, B>
where
    L: MovementLedger,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Authoritative open-lot view for an item, rebuilt from its stream.
    pub fn available_lots(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<AvailableStock, ServiceError> {
        let state = self.load_item(tenant_id, item_id)?;
        Ok(state.available()?)
    }

    /// Auto (FIFO) planning against the current snapshot.
    pub fn plan_fifo(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
        requested: u64,
    ) -> Result<DrawPlan, ServiceError> {
        let available = self.available_lots(tenant_id, item_id)?;
        Ok(plan_fifo(&available, requested)?)
    }

    /// Manual per-lot planning against the current snapshot.
    pub fn plan_manual(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
        overrides: &[(LotId, u64)],
    ) -> Result<DrawPlan, ServiceError> {
        let available = self.available_lots(tenant_id, item_id)?;
        Ok(plan_manual(&available, overrides)?)
    }

    /// Commit an inbound movement: one new lot + one ledger entry.
    pub fn commit_in(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
        quantity: u64,
        unit_cost: u64,
        source: &str,
        actor: UserId,
    ) -> Result<StockReceived, ServiceError> {
        let event = self.execute(tenant_id, item_id, || {
            StockCommand::Receive(ReceiveStock {
                tenant_id,
                item_id,
                movement_id: MovementId::new(),
                lot_id: LotId::new(),
                quantity,
                unit_cost,
                source: source.to_string(),
                actor,
                occurred_at: Utc::now(),
            })
        })?;

        match event {
            StockEvent::Received(received) => Ok(received),
            StockEvent::Issued(_) => Err(ServiceError::Ledger(LedgerError::InvalidAppend(
                "receive command produced an issue event".to_string(),
            ))),
        }
    }

    /// Commit an outbound movement according to a plan.
    ///
    /// The plan is advisory; this is the only place live state decides.
    pub fn commit_out(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
        plan: &DrawPlan,
        recipient: &str,
        purpose: &str,
        notes: Option<&str>,
        actor: UserId,
    ) -> Result<StockIssued, ServiceError> {
        let event = self.execute(tenant_id, item_id, || {
            StockCommand::Issue(IssueStock {
                tenant_id,
                item_id,
                movement_id: MovementId::new(),
                plan: plan.clone(),
                recipient: recipient.to_string(),
                purpose: purpose.to_string(),
                notes: notes.map(str::to_string),
                actor,
                occurred_at: Utc::now(),
            })
        })?;

        match event {
            StockEvent::Issued(issued) => Ok(issued),
            StockEvent::Received(_) => Err(ServiceError::Ledger(LedgerError::InvalidAppend(
                "issue command produced a receive event".to_string(),
            ))),
        }
    }

    fn load_item(&self, tenant_id: TenantId, item_id: ItemId) -> Result<ItemStock, ServiceError> {
        let history = self.ledger.load_stream(tenant_id, item_id.0)?;
        validate_loaded_stream(tenant_id, item_id.0, &history)?;

        let mut state = ItemStock::empty(item_id);
        apply_history(&mut state, &history)?;
        Ok(state)
    }

    /// Run one command through the commit pipeline with bounded retries.
    fn execute(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
        build_command: impl Fn() -> StockCommand,
    ) -> Result<StockEvent, ServiceError> {
        for attempt in 1..=self.commit_attempts {
            let history = self.ledger.load_stream(tenant_id, item_id.0)?;
            validate_loaded_stream(tenant_id, item_id.0, &history)?;
            let expected = ExpectedVersion::Exact(stream_version(&history));

            let mut state = ItemStock::empty(item_id);
            apply_history(&mut state, &history)?;

            let command = build_command();
            let decided = match state.handle(&command) {
                Ok(events) => events,
                Err(err) => {
                    if matches!(err, StockError::InsufficientStock { .. }) {
                        warn!(
                            tenant = %tenant_id,
                            item = %item_id,
                            attempt,
                            "commit rejected: plan no longer covered by live lots"
                        );
                    }
                    return Err(err.into());
                }
            };

            let pending = decided
                .iter()
                .map(|ev| PendingMovement::from_typed(tenant_id, item_id.0, Uuid::now_v7(), ev))
                .collect::<Result<Vec<_>, _>>()
                .map_err(ServiceError::Ledger)?;

            match self.ledger.append(pending, expected) {
                Ok(recorded) => {
                    // Publish only after the append is durable.
                    for movement in &recorded {
                        self.bus
                            .publish(movement.to_envelope())
                            .map_err(|e| ServiceError::Publish(format!("{e:?}")))?;
                    }
                    if let Some(event) = decided.into_iter().next() {
                        info!(
                            tenant = %tenant_id,
                            item = %item_id,
                            event_type = event.event_type(),
                            sequence = recorded[0].sequence_number,
                            "stock movement committed"
                        );
                        return Ok(event);
                    }
                    return Err(ServiceError::Ledger(LedgerError::InvalidAppend(
                        "command decided no events".to_string(),
                    )));
                }
                Err(LedgerError::Concurrency(msg)) => {
                    warn!(
                        tenant = %tenant_id,
                        item = %item_id,
                        attempt,
                        conflict = %msg,
                        "commit lost optimistic race; re-validating against fresh state"
                    );
                    continue;
                }
                Err(other) => return Err(ServiceError::Ledger(other)),
            }
        }

        Err(ServiceError::ConflictExhausted {
            attempts: self.commit_attempts,
        })
    }
}

impl From<LedgerError> for ServiceError {
    fn from(value: LedgerError) -> Self {
        ServiceError::Ledger(value)
    }
}

fn stream_version(stream: &[RecordedMovement]) -> u64 {
    stream.last().map(|m| m.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    item_id: AggregateId,
    stream: &[RecordedMovement],
) -> Result<(), ServiceError> {
    // Enforce tenant isolation even if a buggy backend returns cross-tenant
    // data, and require a strictly increasing sequence.
    let mut last = 0u64;
    for (idx, m) in stream.iter().enumerate() {
        if m.tenant_id != tenant_id {
            return Err(ServiceError::Ledger(LedgerError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            ))));
        }
        if m.item_id != item_id {
            return Err(ServiceError::Ledger(LedgerError::TenantIsolation(format!(
                "loaded stream contains wrong item_id at index {idx}"
            ))));
        }
        if m.sequence_number <= last {
            return Err(ServiceError::Ledger(LedgerError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                m.sequence_number
            ))));
        }
        last = m.sequence_number;
    }
    Ok(())
}

fn apply_history(state: &mut ItemStock, history: &[RecordedMovement]) -> Result<(), ServiceError> {
    for recorded in history {
        let event: StockEvent = serde_json::from_value(recorded.payload.clone())
            .map_err(|e| ServiceError::Deserialize(e.to_string()))?;
        state.apply(&event);
    }
    debug_assert_eq!(state.version(), stream_version(history));
    Ok(())
}
