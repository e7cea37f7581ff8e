//! Available-lots projection.
//!
//! Maintains a per-item view of lots and total availability for display.
//! This is a read-through cache over the ledger: it is updated only from
//! committed envelopes (never speculatively) and can be dropped and rebuilt
//! from history at any time. Planning against authoritative state goes
//! through the service's replay path, not through this view.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use lotledger_core::{AggregateId, TenantId};
use lotledger_events::EventEnvelope;
use lotledger_stock::{AvailableStock, ItemId, Lot, StockEvent, replay};

use crate::ledger::STOCK_STREAM;
use crate::read_model::TenantStore;

/// Read model: every lot of one item, exhausted lots included.
///
/// The open-lot view is derived on read so the stored record doubles as the
/// audit trail. A replay fault marks the record instead of wrapping a
/// quantity; a marked record should be surfaced for operator attention, not
/// planned against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockOnHand {
    pub item_id: ItemId,
    pub lots: Vec<Lot>,
    /// Set when an applied movement could not be reconciled with the lots.
    pub fault: Option<String>,
}

impl StockOnHand {
    fn new(item_id: ItemId) -> Self {
        Self {
            item_id,
            lots: Vec::new(),
            fault: None,
        }
    }

    /// Open lots oldest-first plus total available.
    pub fn available(&self) -> AvailableStock {
        AvailableStock::from_lots(&self.lots)
    }
}

/// Tenant+item cursor for idempotent application.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    item_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum AvailableLotsError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Projection keeping `StockOnHand` per item, rebuildable from envelopes.
///
/// Application is idempotent: a per-stream cursor drops duplicates and
/// rejects gaps, so at-least-once delivery from the bus is safe.
#[derive(Debug)]
pub struct AvailableLotsProjection<S>
where
    S: TenantStore<ItemId, StockOnHand>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> AvailableLotsProjection<S>
where
    S: TenantStore<ItemId, StockOnHand>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    fn cursor(&self, key: CursorKey) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => *cursors.get(&key).unwrap_or(&0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, key: CursorKey, sequence_number: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(key, sequence_number);
        }
    }

    fn clear_cursors(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }
    }

    /// Get the stock-on-hand view for one item.
    pub fn get(&self, tenant_id: TenantId, item_id: &ItemId) -> Option<StockOnHand> {
        self.store.get(tenant_id, item_id)
    }

    /// List all items with recorded movements for a tenant.
    pub fn list(&self, tenant_id: TenantId) -> Vec<StockOnHand> {
        self.store.list(tenant_id)
    }

    /// Apply one committed envelope into the view.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), AvailableLotsError> {
        if envelope.aggregate_type() != STOCK_STREAM {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let item_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let key = CursorKey { tenant_id, item_id };
        let last = self.cursor(key);

        if seq == 0 {
            return Err(AvailableLotsError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate delivery; already applied.
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(AvailableLotsError::NonMonotonicSequence { last, found: seq });
        }

        let event: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| AvailableLotsError::Deserialize(e.to_string()))?;

        let (event_tenant, event_item) = match &event {
            StockEvent::Received(e) => (e.tenant_id, e.item_id),
            StockEvent::Issued(e) => (e.tenant_id, e.item_id),
        };

        if event_tenant != tenant_id {
            return Err(AvailableLotsError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if event_item.0 != item_id {
            return Err(AvailableLotsError::TenantIsolation(
                "event item_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let mut view = self
            .store
            .get(tenant_id, &event_item)
            .unwrap_or_else(|| StockOnHand::new(event_item));

        if let Err(fault) = replay::apply_movement(&mut view.lots, &event) {
            view.fault.get_or_insert(fault.to_string());
        }

        self.store.upsert(tenant_id, event_item, view);
        self.update_cursor(key, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch out of a full envelope set.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), AvailableLotsError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                self.clear_cursors(t);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
